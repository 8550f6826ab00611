use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use tracing::warn;

use crate::backing::{BackingCache, CacheDescriptor, LockPolicy, StoredValue};
use crate::error::CapacityError;
use crate::keys::CacheKey;
use crate::stats::{CacheInfo, CacheStats};
use crate::value::Arg;

static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a cache slot.
///
/// A cache passed as an argument is keyed by this id, never by its contents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheId(u64);

impl CacheId {
    pub fn new() -> Self {
        CacheId(NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl Default for CacheId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CacheId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A backing cache together with its lock, identity and counters.
///
/// The storage mutex is only held for single operations. The optional
/// re-entrant lock is what callers hold across check-miss-compute-store, so a
/// memoized function may recurse into itself on the same thread.
pub struct CacheSlot {
    id: CacheId,
    descriptor: CacheDescriptor,
    store: Mutex<Box<dyn BackingCache>>,
    lock: Option<ReentrantMutex<()>>,
    stats: CacheStats,
}

impl CacheSlot {
    pub fn new(descriptor: CacheDescriptor) -> Self {
        let store = descriptor.instantiate();
        let lock = match descriptor.params.lock {
            LockPolicy::Reentrant => Some(ReentrantMutex::new(())),
            LockPolicy::None => None,
        };
        Self {
            id: CacheId::new(),
            descriptor,
            store: Mutex::new(store),
            lock,
            stats: CacheStats::new(),
        }
    }

    pub fn id(&self) -> CacheId {
        self.id
    }

    pub fn descriptor(&self) -> &CacheDescriptor {
        &self.descriptor
    }

    /// Takes the slot lock, if the slot has one.
    pub fn guard(&self) -> Option<ReentrantMutexGuard<'_, ()>> {
        self.lock.as_ref().map(ReentrantMutex::lock)
    }

    /// Looks `key` up, counting a hit or a miss when the `stats` feature is on.
    pub fn lookup(&self, key: &CacheKey) -> Option<StoredValue> {
        let found = self.store.lock().get(key).ok();
        #[cfg(feature = "stats")]
        {
            if found.is_some() {
                self.stats.record_hit();
            } else {
                self.stats.record_miss();
            }
        }
        found
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.store.lock().contains(key)
    }

    pub fn store(&self, key: CacheKey, value: StoredValue) -> Result<(), CapacityError> {
        self.store.lock().set(key, value).map_err(|err| {
            warn!(cache = %self.id, error = %err, "value too large to cache, skipping");
            err
        })
    }

    pub fn remove(&self, key: &CacheKey) -> Option<StoredValue> {
        self.store.lock().remove(key)
    }

    /// Empties the cache and resets its counters.
    pub fn clear(&self) {
        self.store.lock().clear();
        self.stats.reset();
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn info(&self) -> CacheInfo {
        let store = self.store.lock();
        CacheInfo {
            hits: self.stats.hits(),
            misses: self.stats.misses(),
            max_size: store.max_size(),
            current_size: store.current_size(),
        }
    }

    /// This cache as a call argument, keyed by identity.
    pub fn as_arg(&self) -> Arg {
        Arg::Cache(self.id)
    }
}

impl fmt::Debug for CacheSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheSlot")
            .field("id", &self.id)
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}
