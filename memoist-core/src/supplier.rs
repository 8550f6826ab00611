//! Caller-supplied caches and locks.
//!
//! By default a memoized callable owns its cache and the cache's lock. A
//! [`Supplier`] hands either one out from somewhere else: a fixed value shared
//! by several callables, or a getter that looks it up from the receiver of
//! each call, for receivers that keep their own cache.

use std::fmt;
use std::sync::Arc;

use parking_lot::ReentrantMutex;

use crate::slot::CacheSlot;
use crate::value::ObjectRef;

/// A lock held across check-miss-compute-store in place of the cache's own.
pub type CacheLock = Arc<ReentrantMutex<()>>;

type GetterFn<T> = dyn Fn(&ObjectRef) -> Option<T> + Send + Sync;

/// Source of a cache or lock for one call.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use memoist_core::{call_args, CacheClass, CacheDescriptor, CacheParams, CacheSlot, Decorate, Supplier};
///
/// let shared = Arc::new(CacheSlot::new(CacheDescriptor::new(CacheClass::Lru, CacheParams::default())));
/// let double = Decorate::function()
///     .shared_with(Supplier::fixed(Arc::clone(&shared)))
///     .build("double", &["n"], |args| Ok(args.int(0)? * 2))
///     .unwrap();
///
/// double.call(&call_args![4]).unwrap();
/// assert_eq!(shared.info().current_size, 1);
/// ```
pub enum Supplier<T> {
    /// The same value for every call.
    Fixed(T),
    /// Looked up from the receiver. `None` means no cache (the call goes
    /// straight through) or no lock override.
    Receiver(Arc<GetterFn<T>>),
}

impl<T: Clone> Supplier<T> {
    pub fn fixed(value: T) -> Self {
        Supplier::Fixed(value)
    }

    pub fn from_receiver<F>(getter: F) -> Self
    where
        F: Fn(&ObjectRef) -> Option<T> + Send + Sync + 'static,
    {
        Supplier::Receiver(Arc::new(getter))
    }

    /// Whether the value depends on the receiver of the call.
    pub fn needs_receiver(&self) -> bool {
        matches!(self, Supplier::Receiver(_))
    }

    pub fn get(&self, receiver: Option<&ObjectRef>) -> Option<T> {
        match self {
            Supplier::Fixed(value) => Some(value.clone()),
            Supplier::Receiver(getter) => receiver.and_then(|receiver| getter(receiver)),
        }
    }
}

impl<T> Clone for Supplier<T>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        match self {
            Supplier::Fixed(value) => Supplier::Fixed(value.clone()),
            Supplier::Receiver(getter) => Supplier::Receiver(Arc::clone(getter)),
        }
    }
}

impl<T> fmt::Debug for Supplier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Supplier::Fixed(_) => f.write_str("Supplier::Fixed(..)"),
            Supplier::Receiver(_) => f.write_str("Supplier::Receiver(..)"),
        }
    }
}

/// Where a callable's cache comes from when it is not its own.
pub type CacheSupplier = Supplier<Arc<CacheSlot>>;

/// Where a callable's lock comes from when it is not its cache's.
pub type LockSupplier = Supplier<CacheLock>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Receiver;

    struct Owner {
        lock: CacheLock,
    }

    impl Receiver for Owner {}

    #[test]
    fn test_fixed_ignores_receiver() {
        let supplier = Supplier::fixed(7_i64);
        assert!(!supplier.needs_receiver());
        assert_eq!(supplier.get(None), Some(7));
    }

    #[test]
    fn test_receiver_getter() {
        let supplier: LockSupplier = Supplier::from_receiver(|receiver: &ObjectRef| {
            receiver.downcast_ref::<Owner>().map(|owner| Arc::clone(&owner.lock))
        });
        let owner = Arc::new(Owner {
            lock: Arc::new(ReentrantMutex::new(())),
        });
        let receiver: ObjectRef = owner.clone();

        assert!(supplier.needs_receiver());
        assert!(supplier.get(None).is_none());
        let lock = supplier.get(Some(&receiver)).unwrap();
        assert!(Arc::ptr_eq(&lock, &owner.lock));
    }
}
