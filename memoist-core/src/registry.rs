//! Decoration and the memoized entry point.
//!
//! [`Decorate`] resolves the configuration of one callable and classifies its
//! shape; the resulting [`Memoized`] decides, per call, which cache to use and
//! runs check-miss-compute-store against it. Per-receiver caches live in a
//! [`Registry`] side table keyed by receiver address, holding the receiver only
//! weakly.

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::ReentrantMutexGuard;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::backing::{CacheDescriptor, StoredValue};
use crate::config::{decoration_defaults, decoration_schema, Defaults, MemoConfig};
use crate::error::{ConfigurationError, KeyDerivationError, MemoError};
use crate::keys::{receiver_state, reduce_call, CacheKey, KeyFunction};
use crate::outcome::{Fault, Frame, Outcome, TraceFilter};
use crate::params::{resolve, BindOptions, ConfigValue, ConfigurationRecord};
use crate::shape::{CallableShape, Transformer};
use crate::slot::CacheSlot;
use crate::stats::CacheInfo;
use crate::supplier::{CacheLock, CacheSupplier, LockSupplier};
use crate::value::{object_address, Arg, CallArgs, ObjectRef, Receiver};

static NEXT_CALLABLE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a decorated callable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallableId(u64);

impl CallableId {
    fn new() -> Self {
        CallableId(NEXT_CALLABLE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for CallableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct InstanceCache {
    receiver: Weak<dyn Receiver>,
    slot: Arc<CacheSlot>,
}

impl InstanceCache {
    fn new(receiver: &ObjectRef, template: &CacheDescriptor) -> Self {
        Self {
            receiver: Arc::downgrade(receiver),
            slot: Arc::new(CacheSlot::new(template.clone())),
        }
    }

    fn belongs_to(&self, receiver: &ObjectRef) -> bool {
        self.receiver
            .upgrade()
            .is_some_and(|live| object_address(&live) == object_address(receiver))
    }
}

/// Side table of per-receiver caches.
///
/// Entries are keyed by (receiver address, callable). A stale entry left by a
/// dropped receiver is never handed to a new object at the same address, and
/// every [`SWEEP_INTERVAL`] new entries the table drops the caches of
/// receivers that are gone. Receivers that want their caches gone as soon as
/// they drop call [`Registry::release`] from their `Drop`.
///
/// # Examples
///
/// ```
/// use memoist_core::{Receiver, Registry};
///
/// struct Session;
///
/// impl Receiver for Session {}
///
/// impl Drop for Session {
///     fn drop(&mut self) {
///         Registry::global().release(self);
///     }
/// }
/// ```
#[derive(Default)]
pub struct Registry {
    instances: DashMap<(usize, CallableId), InstanceCache>,
    inserted: AtomicUsize,
}

/// New per-instance caches between two sweeps of dead receivers.
pub const SWEEP_INTERVAL: usize = 64;

static GLOBAL_REGISTRY: Lazy<Arc<Registry>> = Lazy::new(|| Arc::new(Registry::new()));

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> Arc<Registry> {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    /// The cache of `callable` for `receiver`, created from `template` on first use.
    pub fn instance_slot(
        &self,
        receiver: &ObjectRef,
        callable: CallableId,
        template: &CacheDescriptor,
    ) -> Arc<CacheSlot> {
        let (slot, stale) = match self.instances.entry((object_address(receiver), callable)) {
            Entry::Occupied(mut entry) => {
                if entry.get().belongs_to(receiver) {
                    return Arc::clone(&entry.get().slot);
                }
                let fresh = InstanceCache::new(receiver, template);
                let slot = Arc::clone(&fresh.slot);
                (slot, Some(entry.insert(fresh)))
            }
            Entry::Vacant(entry) => {
                let fresh = InstanceCache::new(receiver, template);
                let slot = Arc::clone(&fresh.slot);
                entry.insert(fresh);
                (slot, None)
            }
        };
        // dropped outside the shard lock: stored values may own receivers
        drop(stale);

        if (self.inserted.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_INTERVAL == 0 {
            let swept = self.purge();
            if swept > 0 {
                debug!(swept, "dropped caches of dead receivers");
            }
        }
        slot
    }

    /// The cache of `callable` for `receiver`, if one was created.
    pub fn existing_slot(&self, receiver: &ObjectRef, callable: CallableId) -> Option<Arc<CacheSlot>> {
        self.instances
            .get(&(object_address(receiver), callable))
            .filter(|entry| entry.belongs_to(receiver))
            .map(|entry| Arc::clone(&entry.slot))
    }

    /// Drops every cache held for `receiver`. Returns how many were dropped.
    ///
    /// Safe to call from the receiver's `Drop`.
    pub fn release(&self, receiver: &dyn Receiver) -> usize {
        let address = receiver.address();
        let keys: Vec<_> = self
            .instances
            .iter()
            .filter(|entry| entry.key().0 == address)
            .map(|entry| *entry.key())
            .collect();
        let released = keys
            .iter()
            .filter_map(|key| self.instances.remove(key))
            .count();
        if released > 0 {
            debug!(receiver = receiver.type_name(), released, "released per-instance caches");
        }
        released
    }

    /// Drops caches whose receiver is gone. Returns how many were dropped.
    pub fn purge(&self) -> usize {
        let dead: Vec<_> = self
            .instances
            .iter()
            .filter(|entry| entry.receiver.strong_count() == 0)
            .map(|entry| *entry.key())
            .collect();
        dead.iter()
            .filter_map(|key| {
                self.instances
                    .remove_if(key, |_, entry| entry.receiver.strong_count() == 0)
            })
            .count()
    }

    /// Number of live per-instance caches.
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("instances", &self.instances.len())
            .finish()
    }
}

/// Typed flag and cache description, as reported by [`Memoized::cache_parameters`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CacheParameters {
    pub typed: bool,
    #[serde(flatten)]
    pub cache: CacheDescriptor,
}

enum Storage {
    Bypass,
    Shared {
        template: CacheDescriptor,
        slot: OnceCell<Arc<CacheSlot>>,
    },
    PerInstance(CacheDescriptor),
    /// Handed out by the caller, possibly per receiver.
    External(CacheSupplier),
}

impl Storage {
    fn template(&self) -> Option<&CacheDescriptor> {
        match self {
            Storage::Bypass | Storage::External(_) => None,
            Storage::Shared { template, .. } | Storage::PerInstance(template) => Some(template),
        }
    }

    fn describe(&self) -> &str {
        match self {
            Storage::Bypass => "none",
            Storage::External(_) => "external",
            Storage::Shared { template, .. } | Storage::PerInstance(template) => {
                template.class.name()
            }
        }
    }
}

/// The caller's lock when one is supplied, else the slot's own.
fn hold<'a>(
    slot: &'a CacheSlot,
    lock: Option<&'a CacheLock>,
) -> Option<ReentrantMutexGuard<'a, ()>> {
    match lock {
        Some(lock) => Some(lock.lock()),
        None => slot.guard(),
    }
}

type CallFn<R> = dyn Fn(&CallArgs) -> Result<R, Fault> + Send + Sync;

/// A memoized callable.
///
/// Calling it looks the arguments up in the cache chosen for this call and
/// only runs the wrapped callable on a miss. Failures the configuration
/// allows are stored and replayed like values.
pub struct Memoized<R> {
    id: CallableId,
    name: String,
    shape: CallableShape,
    config: MemoConfig,
    configuration: ConfigurationRecord,
    key_function: KeyFunction,
    receiver_param: Option<String>,
    bound: Option<ObjectRef>,
    cache_attribute: String,
    trace_filter: TraceFilter,
    storage: Storage,
    lock: Option<LockSupplier>,
    registry: Arc<Registry>,
    call: Arc<CallFn<R>>,
}

impl<R> Memoized<R>
where
    R: Clone + Send + Sync + 'static,
{
    /// Calls through the cache.
    pub fn call(&self, args: &CallArgs) -> Result<R, MemoError> {
        let args = self.with_bound(args);
        let receiver = self.receiver(&args)?;

        let Some(slot) = self.slot_for(receiver.as_ref()) else {
            return self.invoke(&args).map_err(MemoError::from);
        };

        let key = self.key(&args, receiver.as_ref())?;
        let lock = self.lock_for(receiver.as_ref());
        let _guard = hold(&slot, lock.as_ref());

        if let Some(stored) = slot.lookup(&key) {
            match stored.downcast_ref::<Outcome<R>>() {
                Some(outcome) => {
                    trace!(callable = %self.name, cache = %slot.id(), "cache hit");
                    return outcome.replay().map_err(MemoError::from);
                }
                None => warn!(
                    callable = %self.name,
                    cache = %slot.id(),
                    "stored value has an unexpected type, recomputing"
                ),
            }
        }
        trace!(callable = %self.name, cache = %slot.id(), "cache miss");

        let outcome = Arc::new(Outcome::capture(
            || self.invoke(&args),
            &self.config.failures,
            &self.trace_filter,
        )?);
        let stored: StoredValue = outcome.clone();
        // a value too large for the cache is returned without being stored
        let _ = slot.store(key, stored);
        outcome.replay().map_err(MemoError::from)
    }

    /// Reads a property through the cache.
    pub fn get(&self, receiver: &ObjectRef) -> Result<R, MemoError> {
        self.call(&CallArgs::new().arg(Arc::clone(receiver)))
    }

    /// Calls the wrapped callable directly, bypassing the cache.
    pub fn uncached(&self, args: &CallArgs) -> Result<R, Fault> {
        (self.call)(&self.with_bound(args))
    }

    /// The cache used for `receiver` (or the bound receiver), if caching is on.
    ///
    /// Per-instance caches need a receiver and are created on first access.
    pub fn cache(&self, receiver: Option<&ObjectRef>) -> Option<Arc<CacheSlot>> {
        let receiver = receiver.or(self.bound.as_ref());
        self.slot_for(receiver)
    }

    pub fn cache_clear(&self, receiver: Option<&ObjectRef>) {
        let receiver = receiver.or(self.bound.as_ref());
        if let Some(slot) = self.slot_for(receiver) {
            let lock = self.lock_for(receiver);
            let _guard = hold(&slot, lock.as_ref());
            slot.clear();
        }
    }

    pub fn cache_info(&self, receiver: Option<&ObjectRef>) -> Option<CacheInfo> {
        let receiver = receiver.or(self.bound.as_ref());
        self.slot_for(receiver).map(|slot| {
            let lock = self.lock_for(receiver);
            let _guard = hold(&slot, lock.as_ref());
            slot.info()
        })
    }

    pub fn cache_parameters(&self, receiver: Option<&ObjectRef>) -> Option<CacheParameters> {
        self.cache(receiver).map(|slot| CacheParameters {
            typed: self.config.typed,
            cache: slot.descriptor().clone(),
        })
    }

    /// The configuration parameters relevant to this callable, with the cache
    /// reported by its description under `cache`.
    pub fn configuration(&self) -> ConfigurationRecord {
        self.configuration.clone()
    }

    pub fn config(&self) -> &MemoConfig {
        &self.config
    }

    pub fn shape(&self) -> CallableShape {
        self.shape
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> CallableId {
        self.id
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    fn with_bound<'a>(&self, args: &'a CallArgs) -> Cow<'a, CallArgs> {
        match &self.bound {
            Some(receiver) => Cow::Owned(args.with_receiver(Arc::clone(receiver))),
            None => Cow::Borrowed(args),
        }
    }

    fn invoke(&self, args: &CallArgs) -> Result<R, Fault> {
        (self.call)(args).map_err(|mut fault| {
            fault.enter(Frame::caller());
            fault
        })
    }

    fn receiver(&self, args: &CallArgs) -> Result<Option<ObjectRef>, MemoError> {
        let Some(param) = &self.receiver_param else {
            return Ok(None);
        };
        match args.get(0) {
            Some(Arg::Object(receiver)) => Ok(Some(Arc::clone(receiver))),
            Some(other) => Err(MemoError::InvalidReceiver {
                callable: self.name.clone(),
                found: other.type_name(),
            }),
            None => Err(MemoError::MissingReceiver {
                callable: self.name.clone(),
                param: param.clone(),
            }),
        }
    }

    fn slot_for(&self, receiver: Option<&ObjectRef>) -> Option<Arc<CacheSlot>> {
        match &self.storage {
            Storage::Bypass => None,
            Storage::Shared { template, slot } => Some(Arc::clone(
                slot.get_or_init(|| Arc::new(CacheSlot::new(template.clone()))),
            )),
            Storage::PerInstance(template) => {
                Some(self.registry.instance_slot(receiver?, self.id, template))
            }
            Storage::External(cache) => cache.get(receiver),
        }
    }

    fn lock_for(&self, receiver: Option<&ObjectRef>) -> Option<CacheLock> {
        self.lock.as_ref().and_then(|lock| lock.get(receiver))
    }

    /// The receiver never enters the key by identity: it is either left out
    /// or replaced by its state.
    fn key(&self, args: &CallArgs, receiver: Option<&ObjectRef>) -> Result<CacheKey, KeyDerivationError> {
        let skip = usize::from(receiver.is_some());
        let mut call = reduce_call(&args.positional()[skip..], args.keyword())?;
        if let Some(receiver) = receiver.filter(|_| self.config.stateful.is_on()) {
            let state = receiver_state(receiver, self.config.stateful.accessor(), &self.cache_attribute)?;
            call.prepend(state, receiver.type_name());
        }
        Ok(self.key_function.derive_call(call))
    }
}

impl<R> fmt::Debug for Memoized<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoized")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("shape", &self.shape)
            .field("configuration", &self.configuration)
            .finish_non_exhaustive()
    }
}

/// Builder for a memoized callable.
///
/// Parameters may be given positionally, in the order `max_size, time_to_live,
/// typed, exceptions, stateful, shared, key, cache_class, cache_args`, or by
/// name. Anything left out comes from the defaults table.
///
/// # Examples
///
/// ```
/// use memoist_core::{CallArgs, Decorate};
///
/// let square = Decorate::function()
///     .max_size(16_usize)
///     .build("square", &["n"], |args: &CallArgs| Ok(args.int(0)? * args.int(0)?))
///     .unwrap();
///
/// assert_eq!(square.call(&CallArgs::new().arg(7)).unwrap(), 49);
/// assert_eq!(square.cache_info(None).unwrap().misses, 1);
/// ```
#[derive(Default)]
pub struct Decorate {
    transformer: Transformer,
    defaults: Option<Arc<Defaults>>,
    registry: Option<Arc<Registry>>,
    options: BindOptions,
    positional: Vec<ConfigValue>,
    keyword: Vec<(String, ConfigValue)>,
    cache: Option<CacheSupplier>,
    lock: Option<LockSupplier>,
}

impl Decorate {
    pub fn new(transformer: Transformer) -> Self {
        Self {
            transformer,
            ..Self::default()
        }
    }

    /// A free function or an ordinary method, told apart by its first parameter.
    pub fn function() -> Self {
        Self::new(Transformer::Function)
    }

    pub fn property() -> Self {
        Self::new(Transformer::Property)
    }

    pub fn static_method() -> Self {
        Self::new(Transformer::StaticMethod)
    }

    pub fn class_method() -> Self {
        Self::new(Transformer::ClassMethod)
    }

    /// Uses `defaults` instead of the global table.
    pub fn with_defaults(mut self, defaults: Arc<Defaults>) -> Self {
        self.defaults = Some(defaults);
        self
    }

    /// Keeps per-instance caches in `registry` instead of the global one.
    pub fn with_registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Rejects excess positional and unknown keyword parameters.
    pub fn strict(mut self, strict: bool) -> Self {
        self.options.strict = strict;
        self
    }

    /// Next positional parameter.
    pub fn arg(mut self, value: impl Into<ConfigValue>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Named parameter.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        let name = name.into();
        self.keyword.retain(|(n, _)| *n != name);
        self.keyword.push((name, value.into()));
        self
    }

    pub fn max_size(self, max_size: impl Into<ConfigValue>) -> Self {
        self.set("max_size", max_size)
    }

    pub fn time_to_live(self, time_to_live: impl Into<ConfigValue>) -> Self {
        self.set("time_to_live", time_to_live)
    }

    pub fn typed(self, typed: bool) -> Self {
        self.set("typed", typed)
    }

    pub fn exceptions(self, policy: impl Into<ConfigValue>) -> Self {
        self.set("exceptions", policy)
    }

    /// `true` keys on the state the receiver reports; a [`StateAccessor`](crate::StateAccessor)
    /// keys on whatever it returns.
    pub fn stateful(self, stateful: impl Into<ConfigValue>) -> Self {
        self.set("stateful", stateful)
    }

    pub fn shared(self, shared: bool) -> Self {
        self.set("shared", shared)
    }

    pub fn key(self, key: KeyFunction) -> Self {
        self.set("key", key)
    }

    pub fn cache_class(self, class: impl Into<ConfigValue>) -> Self {
        self.set("cache_class", class)
    }

    pub fn cache_args(self, args: crate::backing::CacheArgs) -> Self {
        self.set("cache_args", args)
    }

    /// Takes the cache from `cache` instead of building one.
    ///
    /// A getter that looks the cache up from the receiver is only allowed on
    /// methods; when it finds no cache the call goes straight through. The
    /// cache parameters are then ignored.
    pub fn shared_with(mut self, cache: CacheSupplier) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Holds `lock` across check-miss-compute-store instead of the cache's own lock.
    pub fn lock(mut self, lock: LockSupplier) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Memoizes `call`, declared with parameter names `params`.
    pub fn build<R, F>(self, name: &str, params: &[&str], call: F) -> Result<Memoized<R>, ConfigurationError>
    where
        R: Clone + Send + Sync + 'static,
        F: Fn(&CallArgs) -> Result<R, Fault> + Send + Sync + 'static,
    {
        self.finish(name, params, Arc::new(call), None)
    }

    /// Memoizes `call` as a method bound to `receiver`.
    ///
    /// The receiver is prepended to every call, so callers pass only the
    /// remaining arguments.
    pub fn bind<R, F>(
        self,
        receiver: ObjectRef,
        name: &str,
        params: &[&str],
        call: F,
    ) -> Result<Memoized<R>, ConfigurationError>
    where
        R: Clone + Send + Sync + 'static,
        F: Fn(&CallArgs) -> Result<R, Fault> + Send + Sync + 'static,
    {
        self.finish(name, params, Arc::new(call), Some(receiver))
    }

    fn finish<R>(
        self,
        name: &str,
        params: &[&str],
        call: Arc<CallFn<R>>,
        bound: Option<ObjectRef>,
    ) -> Result<Memoized<R>, ConfigurationError> {
        let defaults: &Defaults = self.defaults.as_deref().unwrap_or_else(|| Defaults::global());

        let record = resolve(
            &decoration_schema(),
            &self.positional,
            &self.keyword,
            defaults,
            &decoration_defaults(),
            self.options,
        )?;
        let config = MemoConfig::from_record(&record)?;

        let shape = CallableShape::classify(
            name,
            params,
            self.transformer,
            &defaults.receiver_aliases(),
            bound.is_some(),
        )?;
        if config.stateful.accessor().is_some() && !shape.is_method() {
            return Err(ConfigurationError::StateAccessorOnFunction(name.to_string()));
        }
        let getter = if self.cache.as_ref().is_some_and(CacheSupplier::needs_receiver) {
            Some("shared cache")
        } else if self.lock.as_ref().is_some_and(LockSupplier::needs_receiver) {
            Some("lock")
        } else {
            None
        };
        if let Some(what) = getter.filter(|_| !shape.takes_receiver()) {
            return Err(ConfigurationError::ReceiverGetterOnFunction {
                callable: name.to_string(),
                what,
            });
        }

        let storage = match (self.cache, config.descriptor()) {
            (Some(cache), _) => Storage::External(cache),
            (None, None) => Storage::Bypass,
            (None, Some(template)) if !config.shared && per_instance(shape) => {
                Storage::PerInstance(template)
            }
            (None, Some(template)) => Storage::Shared {
                template,
                slot: OnceCell::new(),
            },
        };
        let configuration = relevant_configuration(&record, &config, shape, &storage);
        let id = CallableId::new();

        debug!(
            callable = name,
            id = %id,
            shape = %shape,
            cache = storage.describe(),
            "memoized callable"
        );

        Ok(Memoized {
            id,
            name: name.to_string(),
            shape,
            key_function: config.key_function(),
            config,
            configuration,
            receiver_param: shape
                .takes_receiver()
                .then(|| params.first().map(|p| p.to_string()))
                .flatten(),
            bound,
            cache_attribute: defaults.cache_attribute(),
            trace_filter: defaults.trace_filter(),
            storage,
            lock: self.lock,
            registry: self.registry.unwrap_or_else(Registry::global),
            call,
        })
    }
}

impl fmt::Debug for Decorate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decorate")
            .field("transformer", &self.transformer)
            .field("positional", &self.positional)
            .field("keyword", &self.keyword)
            .field("strict", &self.options.strict)
            .finish_non_exhaustive()
    }
}

/// Shapes that get one cache per receiver when `shared` is off.
fn per_instance(shape: CallableShape) -> bool {
    matches!(shape, CallableShape::UnboundMethod | CallableShape::Property)
}

fn relevant_configuration(
    record: &ConfigurationRecord,
    config: &MemoConfig,
    shape: CallableShape,
    storage: &Storage,
) -> ConfigurationRecord {
    let mut relevant = record.clone();
    if config.key.is_some() {
        relevant.remove("typed");
    } else {
        relevant.remove("key");
    }
    if !shape.is_method() {
        relevant.remove("stateful");
    }
    if !matches!(
        shape,
        CallableShape::UnboundMethod | CallableShape::Property | CallableShape::ClassMethod
    ) {
        relevant.remove("shared");
    }
    relevant.remove("cache_class");
    relevant.remove("cache_args");
    if let Some(template) = storage.template() {
        relevant.insert_first("cache", ConfigValue::Cache(template.clone()));
    }
    relevant
}
