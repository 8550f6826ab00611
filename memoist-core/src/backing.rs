//! Interface to the storage collaborator.
//!
//! The engine never evicts anything itself: it talks to a [`BackingCache`]
//! through a handful of operations and builds new ones from a serializable
//! [`CacheDescriptor`]. Reference implementations live in [`crate::standard`].

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

use crate::error::{CapacityError, KeyMissError};
use crate::eviction_policy::EvictionPolicy;
use crate::keys::CacheKey;
use crate::memory_estimator::MemoryEstimator;
use crate::outcome::Outcome;
use crate::standard::{BoundedCache, NoCache, UnboundedCache};

/// What a backing cache stores: a type-erased, shared [`Outcome`].
pub type StoredValue = Arc<dyn Any + Send + Sync>;

/// Storage operations the engine relies on.
///
/// Implementations need not be thread-safe: the engine always calls them
/// behind a mutex.
pub trait BackingCache: Send {
    fn contains(&self, key: &CacheKey) -> bool;

    /// Returns the value, or [`KeyMissError`] when absent or expired.
    fn get(&mut self, key: &CacheKey) -> Result<StoredValue, KeyMissError>;

    /// Stores a value, evicting as needed. Fails when the value alone
    /// weighs more than the cache may hold.
    fn set(&mut self, key: CacheKey, value: StoredValue) -> Result<(), CapacityError>;

    fn remove(&mut self, key: &CacheKey) -> Option<StoredValue>;

    /// Total weight of the stored values, as measured by the cache's [`SizeOf`].
    fn current_size(&self) -> usize;

    fn max_size(&self) -> Capacity;

    fn clear(&mut self);
}

/// Capacity bound of a cache. Serialized as a number, or `null` when unbounded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Capacity {
    Bounded(usize),
    Unbounded,
}

impl Capacity {
    pub fn limit(self) -> Option<usize> {
        match self {
            Capacity::Bounded(limit) => Some(limit),
            Capacity::Unbounded => None,
        }
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capacity::Bounded(limit) => write!(f, "{limit}"),
            Capacity::Unbounded => f.write_str("unbounded"),
        }
    }
}

type SizeFn = dyn Fn(&(dyn Any + Send + Sync)) -> usize + Send + Sync;

/// Weight function used for capacity accounting. Defaults to a constant 1.
#[derive(Clone)]
pub struct SizeOf(Arc<SizeFn>);

static CONSTANT_SIZE: Lazy<SizeOf> = Lazy::new(|| SizeOf(Arc::new(|_| 1)));

impl SizeOf {
    /// Every value weighs 1, so capacity counts entries.
    pub fn constant() -> Self {
        CONSTANT_SIZE.clone()
    }

    /// Weighs raw stored values.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&(dyn Any + Send + Sync)) -> usize + Send + Sync + 'static,
    {
        SizeOf(Arc::new(f))
    }

    /// Weighs successful results of type `R`; cached failures weigh 1.
    ///
    /// # Examples
    ///
    /// ```
    /// use memoist_core::SizeOf;
    ///
    /// let by_length = SizeOf::of(|text: &String| text.len());
    /// ```
    pub fn of<R, F>(f: F) -> Self
    where
        R: 'static,
        F: Fn(&R) -> usize + Send + Sync + 'static,
    {
        SizeOf(Arc::new(move |value| match value.downcast_ref::<Outcome<R>>() {
            Some(Outcome::Value(result)) => f(result),
            _ => 1,
        }))
    }

    /// Weighs results by their estimated memory footprint.
    pub fn memory<R: MemoryEstimator + 'static>() -> Self {
        Self::of(|result: &R| result.estimate_memory())
    }

    pub fn measure(&self, value: &StoredValue) -> usize {
        (self.0)(&**value)
    }
}

impl Default for SizeOf {
    fn default() -> Self {
        Self::constant()
    }
}

impl PartialEq for SizeOf {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for SizeOf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SizeOf(..)")
    }
}

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);
static MONOTONIC: Lazy<Timer> = Lazy::new(|| Timer(Arc::new(|| EPOCH.elapsed().as_secs_f64())));

/// Clock source in seconds, used for time-to-live bookkeeping.
#[derive(Clone)]
pub struct Timer(Arc<dyn Fn() -> f64 + Send + Sync>);

impl Timer {
    /// Seconds elapsed since the first use of the monotonic clock.
    pub fn monotonic() -> Self {
        MONOTONIC.clone()
    }

    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        Timer(Arc::new(f))
    }

    pub fn now(&self) -> f64 {
        (self.0)()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::monotonic()
    }
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Timer(..)")
    }
}

/// Locking around check-miss-compute-store.
///
/// With [`LockPolicy::None`], concurrent misses on one key may both compute
/// and both store; the last write wins.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockPolicy {
    #[default]
    Reentrant,
    None,
}

/// Extra construction arguments passed through the `cache_args` parameter.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CacheArgs {
    pub size_of: Option<SizeOf>,
    pub timer: Option<Timer>,
    pub lock: Option<LockPolicy>,
    pub frequency_weight: Option<f64>,
}

impl CacheArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size_of(mut self, size_of: SizeOf) -> Self {
        self.size_of = Some(size_of);
        self
    }

    pub fn timer(mut self, timer: Timer) -> Self {
        self.timer = Some(timer);
        self
    }

    pub fn lock(mut self, lock: LockPolicy) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Exponent applied to hit counts by the time-aware LRU class.
    pub fn frequency_weight(mut self, weight: f64) -> Self {
        self.frequency_weight = Some(weight);
        self
    }
}

/// Parameters a cache is constructed with.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheParams {
    pub max_size: Capacity,
    #[serde(default, with = "seconds")]
    pub time_to_live: Option<Duration>,
    #[serde(skip)]
    pub size_of: SizeOf,
    #[serde(skip)]
    pub timer: Timer,
    #[serde(default)]
    pub lock: LockPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_weight: Option<f64>,
}

impl CacheParams {
    pub fn new(max_size: Capacity, time_to_live: Option<Duration>) -> Self {
        Self {
            max_size,
            time_to_live,
            size_of: SizeOf::default(),
            timer: Timer::default(),
            lock: LockPolicy::default(),
            frequency_weight: None,
        }
    }

    pub fn with_args(mut self, args: &CacheArgs) -> Self {
        if let Some(size_of) = &args.size_of {
            self.size_of = size_of.clone();
        }
        if let Some(timer) = &args.timer {
            self.timer = timer.clone();
        }
        if let Some(lock) = args.lock {
            self.lock = lock;
        }
        if let Some(weight) = args.frequency_weight {
            self.frequency_weight = Some(weight);
        }
        self
    }
}

impl Default for CacheParams {
    fn default() -> Self {
        Self::new(Capacity::Bounded(128), None)
    }
}

mod seconds {
    use std::time::Duration;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        value.map(|d| d.as_secs_f64()).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(d)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(D::Error::custom))
            .transpose()
    }
}

/// Builds caches of a user-defined class.
pub trait CacheFactory: Send + Sync {
    fn name(&self) -> &str;

    fn build(&self, params: &CacheParams) -> Box<dyn BackingCache>;
}

/// The kind of cache a decorated callable is backed by.
#[derive(Clone)]
pub enum CacheClass {
    Lru,
    Fifo,
    Lfu,
    Random,
    /// Least recently used, with entries expiring after `time_to_live`.
    Ttl,
    /// Time-aware LRU: recency, hit count and remaining life decide the victim.
    Tlru,
    Unbounded,
    UnboundedTtl,
    /// Stores nothing: every call is a miss.
    NoCache,
    Custom(Arc<dyn CacheFactory>),
}

impl CacheClass {
    pub fn custom(factory: impl CacheFactory + 'static) -> Self {
        CacheClass::Custom(Arc::new(factory))
    }

    pub fn name(&self) -> &str {
        match self {
            CacheClass::Lru => "lru",
            CacheClass::Fifo => "fifo",
            CacheClass::Lfu => "lfu",
            CacheClass::Random => "random",
            CacheClass::Ttl => "ttl",
            CacheClass::Tlru => "tlru",
            CacheClass::Unbounded => "unbounded",
            CacheClass::UnboundedTtl => "unbounded_ttl",
            CacheClass::NoCache => "no_cache",
            CacheClass::Custom(factory) => factory.name(),
        }
    }

    /// Looks up a built-in class by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "lru" => CacheClass::Lru,
            "fifo" => CacheClass::Fifo,
            "lfu" => CacheClass::Lfu,
            "random" | "rr" => CacheClass::Random,
            "ttl" => CacheClass::Ttl,
            "tlru" => CacheClass::Tlru,
            "unbounded" => CacheClass::Unbounded,
            "unbounded_ttl" => CacheClass::UnboundedTtl,
            "no_cache" | "none" => CacheClass::NoCache,
            _ => return None,
        })
    }

    /// Whether `time_to_live` means anything to this class.
    pub fn expires(&self) -> bool {
        matches!(
            self,
            CacheClass::Ttl | CacheClass::Tlru | CacheClass::UnboundedTtl | CacheClass::Custom(_)
        )
    }

    /// Whether `max_size` means anything to this class.
    pub fn bounded(&self) -> bool {
        !matches!(
            self,
            CacheClass::Unbounded | CacheClass::UnboundedTtl | CacheClass::NoCache
        )
    }

    pub fn build(&self, params: &CacheParams) -> Box<dyn BackingCache> {
        let ttl = params.time_to_live;
        match self {
            CacheClass::Lru => Box::new(BoundedCache::new(EvictionPolicy::LRU, params, None)),
            CacheClass::Fifo => Box::new(BoundedCache::new(EvictionPolicy::FIFO, params, None)),
            CacheClass::Lfu => Box::new(BoundedCache::new(EvictionPolicy::LFU, params, None)),
            CacheClass::Random => Box::new(BoundedCache::new(EvictionPolicy::Random, params, None)),
            CacheClass::Ttl => Box::new(BoundedCache::new(EvictionPolicy::LRU, params, ttl)),
            CacheClass::Tlru => Box::new(BoundedCache::new(EvictionPolicy::TLRU, params, ttl)),
            CacheClass::Unbounded => Box::new(UnboundedCache::new(params, None)),
            CacheClass::UnboundedTtl => Box::new(UnboundedCache::new(params, ttl)),
            CacheClass::NoCache => Box::new(NoCache),
            CacheClass::Custom(factory) => factory.build(params),
        }
    }
}

impl PartialEq for CacheClass {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CacheClass::Custom(a), CacheClass::Custom(b)) => Arc::ptr_eq(a, b),
            (CacheClass::Custom(_), _) | (_, CacheClass::Custom(_)) => false,
            _ => self.name() == other.name(),
        }
    }
}

impl fmt::Debug for CacheClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheClass({})", self.name())
    }
}

impl Serialize for CacheClass {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for CacheClass {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let name = String::deserialize(d)?;
        CacheClass::from_name(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown cache class `{name}`")))
    }
}

/// Everything needed to build an equivalent, independent cache.
///
/// # Examples
///
/// ```
/// use memoist_core::{CacheClass, CacheDescriptor, CacheParams, Capacity};
///
/// let descriptor = CacheDescriptor::new(CacheClass::Fifo, CacheParams::new(Capacity::Bounded(2), None));
/// let a = descriptor.instantiate();
/// let b = descriptor.instantiate();
/// assert_eq!(a.max_size(), b.max_size());
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheDescriptor {
    pub class: CacheClass,
    #[serde(flatten)]
    pub params: CacheParams,
}

impl CacheDescriptor {
    pub fn new(class: CacheClass, params: CacheParams) -> Self {
        Self { class, params }
    }

    pub fn instantiate(&self) -> Box<dyn BackingCache> {
        debug!(
            class = self.class.name(),
            max_size = %self.params.max_size,
            time_to_live = ?self.params.time_to_live,
            "instantiating cache"
        );
        self.class.build(&self.params)
    }
}
