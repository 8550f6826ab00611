//! # Memoist Core
//!
//! The memoization engine behind `memoist`.
//!
//! Given a callable and its arguments, the engine decides whether a result was
//! already computed and, if not, computes and stores one. It owns the parts
//! that make this correct for arbitrary arguments; storage itself is delegated
//! to a [`BackingCache`].
//!
//! ## Features
//!
//! - **Key Canonicalization**: nested sequences and mappings reduce to stable,
//!   hashable keys; mappings are order-independent, caches key by identity
//! - **Stateful Methods**: a receiver's observable state can stand in for the receiver
//! - **Layered Configuration**: call-site values, a defaults table and per-parameter fallbacks
//! - **Cached Failures**: chosen failure kinds are stored and replayed with a clean trace
//! - **Cache Placement**: one cache per callable, or one per receiver with weak references
//!
//! ## Module Organization
//!
//! - [`params`] - parameter resolution against a declared schema
//! - [`keys`] - argument reduction and cache keys
//! - [`outcome`] - failure capture and replay
//! - [`registry`] - decoration, memoized entry points and per-instance caches
//! - [`backing`] / [`standard`] - the storage interface and its reference implementations
//! - [`supplier`] - caches and locks handed in by the caller
//!
//! ## Example
//!
//! ```
//! use memoist_core::{call_args, Decorate};
//!
//! let add = Decorate::function()
//!     .build("add", &["a", "b"], |args| Ok(args.int(0)? + args.int(1)?))
//!     .unwrap();
//!
//! assert_eq!(add.call(&call_args![2, 3]).unwrap(), 5);
//! assert_eq!(add.call(&call_args![2, 3]).unwrap(), 5);
//! assert_eq!(add.cache_info(None).unwrap().hits, 1);
//! ```
mod cache_entry;
mod error;
mod eviction_policy;
mod memory_estimator;
mod shape;
mod slot;
mod stats;
mod value;

pub mod backing;
pub mod config;
pub mod keys;
pub mod outcome;
pub mod params;
pub mod registry;
pub mod standard;
pub mod supplier;
pub mod utils;

pub use backing::{
    BackingCache, CacheArgs, CacheClass, CacheDescriptor, CacheFactory, CacheParams, Capacity,
    LockPolicy, SizeOf, StoredValue, Timer,
};
pub use cache_entry::CacheEntry;
pub use config::{decoration_schema, Defaults, MemoConfig, Stateful, DECORATION_PARAMS};
pub use error::{
    CapacityError, ConfigurationError, KeyDerivationError, KeyMissError, MemoError,
    UnhashableKeyError,
};
pub use eviction_policy::EvictionPolicy;
pub use keys::{make_key, receiver_state, reduce, CacheKey, Hashable, KeyFunction, StateAccessor};
pub use memory_estimator::MemoryEstimator;
pub use outcome::{FailurePolicy, Fault, Frame, Outcome, TraceFilter};
pub use params::{
    resolve, BindOptions, ConfigValue, ConfigurationRecord, DefaultSource, ParamKind, ParamSpec,
    UNSET_SUFFIX,
};
pub use registry::{CacheParameters, CallableId, Decorate, Memoized, Registry, SWEEP_INTERVAL};
pub use shape::{CallableShape, Transformer};
pub use slot::{CacheId, CacheSlot};
pub use standard::{BoundedCache, NoCache, UnboundedCache};
pub use supplier::{CacheLock, CacheSupplier, LockSupplier, Supplier};
pub use stats::{CacheInfo, CacheStats};
pub use value::{Arg, AsAny, Attr, CallArgs, Hashing, ObjectRef, Receiver, State};
