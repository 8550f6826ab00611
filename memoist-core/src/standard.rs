//! Reference backing caches.
//!
//! These are plain, single-threaded containers; the engine serializes access
//! to them. [`BoundedCache`] covers the FIFO, LRU, LFU, random and time-aware
//! LRU replacement policies with optional expiry. Capacity is measured in the weights reported
//! by the cache's [`SizeOf`], one per entry by default.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::backing::{BackingCache, CacheParams, Capacity, SizeOf, StoredValue, Timer};
use crate::cache_entry::CacheEntry;
use crate::error::{CapacityError, KeyMissError};
use crate::eviction_policy::EvictionPolicy;
use crate::keys::CacheKey;
use crate::utils::{find_min_frequency_key, find_tlru_key, move_key_to_end, remove_from_order};

/// A cache with a capacity bound, an eviction policy and optional expiry.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use memoist_core::{BackingCache, BoundedCache, CacheKey, CacheParams, Capacity, EvictionPolicy, Hashable};
///
/// let mut cache = BoundedCache::new(EvictionPolicy::FIFO, &CacheParams::new(Capacity::Bounded(1), None), None);
/// let a = CacheKey::untyped(vec![Hashable::Int(1)], vec![]);
/// let b = CacheKey::untyped(vec![Hashable::Int(2)], vec![]);
/// cache.set(a.clone(), Arc::new("a")).unwrap();
/// cache.set(b.clone(), Arc::new("b")).unwrap();
/// assert!(!cache.contains(&a));
/// assert!(cache.contains(&b));
/// ```
pub struct BoundedCache {
    map: HashMap<CacheKey, CacheEntry>,
    order: VecDeque<CacheKey>,
    policy: EvictionPolicy,
    max_size: Capacity,
    ttl: Option<Duration>,
    size_of: SizeOf,
    timer: Timer,
    frequency_weight: f64,
    current: usize,
}

impl BoundedCache {
    pub fn new(policy: EvictionPolicy, params: &CacheParams, ttl: Option<Duration>) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            policy,
            max_size: params.max_size,
            ttl,
            size_of: params.size_of.clone(),
            timer: params.timer.clone(),
            frequency_weight: params.frequency_weight.unwrap_or(1.0),
            current: 0,
        }
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn take(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.map.remove(key)?;
        remove_from_order(&mut self.order, key);
        self.current -= entry.size;
        Some(entry)
    }

    fn expire(&mut self, now: f64) {
        if self.ttl.is_none() {
            return;
        }
        let expired: Vec<CacheKey> = self
            .map
            .iter()
            .filter(|(_, entry)| entry.is_expired(self.ttl, now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            self.take(&key);
        }
    }

    fn victim(&self, now: f64) -> Option<CacheKey> {
        match self.policy {
            EvictionPolicy::FIFO | EvictionPolicy::LRU => self.order.front().cloned(),
            EvictionPolicy::LFU => find_min_frequency_key(&self.map, &self.order),
            EvictionPolicy::Random => {
                if self.order.is_empty() {
                    None
                } else {
                    self.order.get(fastrand::usize(..self.order.len())).cloned()
                }
            }
            EvictionPolicy::TLRU => {
                find_tlru_key(&self.map, &self.order, self.ttl, now, self.frequency_weight)
            }
        }
    }
}

impl BackingCache for BoundedCache {
    fn contains(&self, key: &CacheKey) -> bool {
        let now = self.timer.now();
        self.map
            .get(key)
            .is_some_and(|entry| !entry.is_expired(self.ttl, now))
    }

    fn get(&mut self, key: &CacheKey) -> Result<StoredValue, KeyMissError> {
        let now = self.timer.now();
        let expired = match self.map.get(key) {
            Some(entry) => entry.is_expired(self.ttl, now),
            None => return Err(KeyMissError),
        };
        if expired {
            self.take(key);
            return Err(KeyMissError);
        }

        match self.policy {
            EvictionPolicy::LRU => move_key_to_end(&mut self.order, key),
            EvictionPolicy::LFU => {
                if let Some(entry) = self.map.get_mut(key) {
                    entry.increment_frequency();
                }
            }
            EvictionPolicy::TLRU => {
                move_key_to_end(&mut self.order, key);
                if let Some(entry) = self.map.get_mut(key) {
                    entry.increment_frequency();
                }
            }
            EvictionPolicy::FIFO | EvictionPolicy::Random => {}
        }
        self.map
            .get(key)
            .map(|entry| entry.value.clone())
            .ok_or(KeyMissError)
    }

    fn set(&mut self, key: CacheKey, value: StoredValue) -> Result<(), CapacityError> {
        let size = self.size_of.measure(&value);
        if let Capacity::Bounded(capacity) = self.max_size {
            if size > capacity {
                return Err(CapacityError { size, capacity });
            }
        }

        let now = self.timer.now();
        self.take(&key);
        self.expire(now);

        if let Capacity::Bounded(capacity) = self.max_size {
            while self.current + size > capacity {
                match self.victim(now) {
                    Some(victim) => {
                        self.take(&victim);
                    }
                    None => break,
                }
            }
        }

        self.map.insert(key.clone(), CacheEntry::new(value, now, size));
        self.order.push_back(key);
        self.current += size;
        Ok(())
    }

    fn remove(&mut self, key: &CacheKey) -> Option<StoredValue> {
        self.take(key).map(|entry| entry.value)
    }

    fn current_size(&self) -> usize {
        self.current
    }

    fn max_size(&self) -> Capacity {
        self.max_size
    }

    fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
        self.current = 0;
    }
}

/// A cache that never evicts; entries may still expire.
pub struct UnboundedCache {
    map: HashMap<CacheKey, CacheEntry>,
    ttl: Option<Duration>,
    size_of: SizeOf,
    timer: Timer,
    current: usize,
}

impl UnboundedCache {
    pub fn new(params: &CacheParams, ttl: Option<Duration>) -> Self {
        Self {
            map: HashMap::new(),
            ttl,
            size_of: params.size_of.clone(),
            timer: params.timer.clone(),
            current: 0,
        }
    }

    fn take(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.map.remove(key)?;
        self.current -= entry.size;
        Some(entry)
    }
}

impl BackingCache for UnboundedCache {
    fn contains(&self, key: &CacheKey) -> bool {
        let now = self.timer.now();
        self.map
            .get(key)
            .is_some_and(|entry| !entry.is_expired(self.ttl, now))
    }

    fn get(&mut self, key: &CacheKey) -> Result<StoredValue, KeyMissError> {
        let now = self.timer.now();
        match self.map.get(key) {
            Some(entry) if !entry.is_expired(self.ttl, now) => Ok(entry.value.clone()),
            Some(_) => {
                self.take(key);
                Err(KeyMissError)
            }
            None => Err(KeyMissError),
        }
    }

    fn set(&mut self, key: CacheKey, value: StoredValue) -> Result<(), CapacityError> {
        let size = self.size_of.measure(&value);
        let now = self.timer.now();
        self.take(&key);
        if self.ttl.is_some() {
            let ttl = self.ttl;
            let expired: Vec<CacheKey> = self
                .map
                .iter()
                .filter(|(_, entry)| entry.is_expired(ttl, now))
                .map(|(key, _)| key.clone())
                .collect();
            for key in expired {
                self.take(&key);
            }
        }
        self.map.insert(key, CacheEntry::new(value, now, size));
        self.current += size;
        Ok(())
    }

    fn remove(&mut self, key: &CacheKey) -> Option<StoredValue> {
        self.take(key).map(|entry| entry.value)
    }

    fn current_size(&self) -> usize {
        self.current
    }

    fn max_size(&self) -> Capacity {
        Capacity::Unbounded
    }

    fn clear(&mut self) {
        self.map.clear();
        self.current = 0;
    }
}

/// A cache that stores nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCache;

impl BackingCache for NoCache {
    fn contains(&self, _key: &CacheKey) -> bool {
        false
    }

    fn get(&mut self, _key: &CacheKey) -> Result<StoredValue, KeyMissError> {
        Err(KeyMissError)
    }

    fn set(&mut self, _key: CacheKey, _value: StoredValue) -> Result<(), CapacityError> {
        Ok(())
    }

    fn remove(&mut self, _key: &CacheKey) -> Option<StoredValue> {
        None
    }

    fn current_size(&self) -> usize {
        0
    }

    fn max_size(&self) -> Capacity {
        Capacity::Bounded(0)
    }

    fn clear(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Hashable;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn key(n: i64) -> CacheKey {
        CacheKey::untyped(vec![Hashable::Int(n)], vec![])
    }

    fn bounded(policy: EvictionPolicy, capacity: usize) -> BoundedCache {
        BoundedCache::new(policy, &CacheParams::new(Capacity::Bounded(capacity), None), None)
    }

    fn value_of(cache: &mut dyn BackingCache, n: i64) -> Option<i64> {
        cache
            .get(&key(n))
            .ok()
            .and_then(|v| v.downcast_ref::<i64>().copied())
    }

    /// Manual clock, advanced by the test.
    fn manual_timer() -> (Timer, Arc<AtomicU64>) {
        let now = Arc::new(AtomicU64::new(0));
        let clock = Arc::clone(&now);
        (
            Timer::new(move || clock.load(Ordering::SeqCst) as f64),
            now,
        )
    }

    #[test]
    fn test_fifo_eviction() {
        let mut cache = bounded(EvictionPolicy::FIFO, 2);
        cache.set(key(1), Arc::new(1i64)).unwrap();
        cache.set(key(2), Arc::new(2i64)).unwrap();
        // a hit does not protect the oldest entry
        assert_eq!(value_of(&mut cache, 1), Some(1));
        cache.set(key(3), Arc::new(3i64)).unwrap();

        assert!(!cache.contains(&key(1)));
        assert!(cache.contains(&key(2)));
        assert!(cache.contains(&key(3)));
    }

    #[test]
    fn test_lru_eviction() {
        let mut cache = bounded(EvictionPolicy::LRU, 2);
        cache.set(key(1), Arc::new(1i64)).unwrap();
        cache.set(key(2), Arc::new(2i64)).unwrap();
        assert_eq!(value_of(&mut cache, 1), Some(1));
        cache.set(key(3), Arc::new(3i64)).unwrap();

        assert!(cache.contains(&key(1)));
        assert!(!cache.contains(&key(2)));
        assert!(cache.contains(&key(3)));
    }

    #[test]
    fn test_lfu_eviction() {
        let mut cache = bounded(EvictionPolicy::LFU, 2);
        cache.set(key(1), Arc::new(1i64)).unwrap();
        cache.set(key(2), Arc::new(2i64)).unwrap();
        value_of(&mut cache, 1);
        value_of(&mut cache, 1);
        value_of(&mut cache, 2);
        cache.set(key(3), Arc::new(3i64)).unwrap();

        assert!(cache.contains(&key(1)));
        assert!(!cache.contains(&key(2)));
    }

    #[test]
    fn test_random_eviction_respects_capacity() {
        let mut cache = bounded(EvictionPolicy::Random, 3);
        for n in 0..20 {
            cache.set(key(n), Arc::new(n)).unwrap();
        }
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.current_size(), 3);
        assert!(cache.contains(&key(19)));
    }

    #[test]
    fn test_overwrite_does_not_grow() {
        let mut cache = bounded(EvictionPolicy::LRU, 2);
        cache.set(key(1), Arc::new(1i64)).unwrap();
        cache.set(key(1), Arc::new(10i64)).unwrap();
        assert_eq!(cache.current_size(), 1);
        assert_eq!(value_of(&mut cache, 1), Some(10));
    }

    #[test]
    fn test_weighted_capacity() {
        let params = CacheParams::new(Capacity::Bounded(10), None).with_args(
            &crate::CacheArgs::new().size_of(SizeOf::new(|v| {
                v.downcast_ref::<usize>().copied().unwrap_or(1)
            })),
        );
        let mut cache = BoundedCache::new(EvictionPolicy::FIFO, &params, None);
        cache.set(key(1), Arc::new(6usize)).unwrap();
        cache.set(key(2), Arc::new(3usize)).unwrap();
        assert_eq!(cache.current_size(), 9);

        cache.set(key(3), Arc::new(4usize)).unwrap();
        assert!(!cache.contains(&key(1)));
        assert_eq!(cache.current_size(), 7);

        let err = cache.set(key(4), Arc::new(11usize)).unwrap_err();
        assert_eq!(err, CapacityError { size: 11, capacity: 10 });
        assert!(cache.contains(&key(2)));
    }

    #[test]
    fn test_ttl_expiry_with_manual_clock() {
        let (timer, now) = manual_timer();
        let params = CacheParams::new(Capacity::Bounded(10), None)
            .with_args(&crate::CacheArgs::new().timer(timer));
        let mut cache = BoundedCache::new(EvictionPolicy::LRU, &params, Some(Duration::from_secs(5)));

        cache.set(key(1), Arc::new(1i64)).unwrap();
        now.store(4, Ordering::SeqCst);
        assert_eq!(value_of(&mut cache, 1), Some(1));

        now.store(5, Ordering::SeqCst);
        assert!(!cache.contains(&key(1)));
        assert!(cache.get(&key(1)).is_err());
        assert_eq!(cache.current_size(), 0);
    }

    #[test]
    fn test_tlru_evicts_entry_closest_to_expiry() {
        let (timer, now) = manual_timer();
        let params = CacheParams::new(Capacity::Bounded(2), None)
            .with_args(&crate::CacheArgs::new().timer(timer));
        let mut cache = BoundedCache::new(EvictionPolicy::TLRU, &params, Some(Duration::from_secs(10)));

        cache.set(key(1), Arc::new(1i64)).unwrap();
        now.store(8, Ordering::SeqCst);
        cache.set(key(2), Arc::new(2i64)).unwrap();
        // key 1 is read last, but has almost no life left
        assert_eq!(value_of(&mut cache, 1), Some(1));
        now.store(9, Ordering::SeqCst);
        cache.set(key(3), Arc::new(3i64)).unwrap();

        assert!(!cache.contains(&key(1)));
        assert!(cache.contains(&key(2)));
        assert!(cache.contains(&key(3)));
    }

    #[test]
    fn test_unbounded_never_evicts() {
        let mut cache = UnboundedCache::new(&CacheParams::default(), None);
        for n in 0..500 {
            cache.set(key(n), Arc::new(n)).unwrap();
        }
        assert_eq!(cache.current_size(), 500);
        assert_eq!(cache.max_size(), Capacity::Unbounded);
        assert!(cache.remove(&key(0)).is_some());
        assert_eq!(cache.current_size(), 499);
    }

    #[test]
    fn test_unbounded_ttl_expires() {
        let (timer, now) = manual_timer();
        let params = CacheParams::default().with_args(&crate::CacheArgs::new().timer(timer));
        let mut cache = UnboundedCache::new(&params, Some(Duration::from_secs(1)));
        cache.set(key(1), Arc::new(1i64)).unwrap();
        now.store(2, Ordering::SeqCst);
        assert!(value_of(&mut cache, 1).is_none());
    }

    #[test]
    fn test_no_cache_stores_nothing() {
        let mut cache = NoCache;
        cache.set(key(1), Arc::new(1i64)).unwrap();
        assert!(!cache.contains(&key(1)));
        assert_eq!(cache.current_size(), 0);
    }

    #[test]
    fn test_clear() {
        let mut cache = bounded(EvictionPolicy::LRU, 4);
        cache.set(key(1), Arc::new(1i64)).unwrap();
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.current_size(), 0);
    }
}
