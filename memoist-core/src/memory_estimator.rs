use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Estimates how many bytes a cached value occupies.
///
/// Used through [`SizeOf::memory`](crate::SizeOf::memory) so that a backing
/// cache with a bounded `max_size` counts bytes instead of entries.
///
/// The default implementation only accounts for the stack size of the value.
/// Types owning heap data should override it.
///
/// # Examples
///
/// ```
/// use memoist_core::MemoryEstimator;
///
/// struct Report {
///     title: String,
///     rows: Vec<u32>,
/// }
///
/// impl MemoryEstimator for Report {
///     fn estimate_memory(&self) -> usize {
///         std::mem::size_of::<Self>() + self.title.capacity() + self.rows.capacity() * 4
///     }
/// }
/// ```
pub trait MemoryEstimator {
    fn estimate_memory(&self) -> usize {
        std::mem::size_of_val(self)
    }
}

macro_rules! stack_only {
    ($($t:ty),* $(,)?) => {
        $(impl MemoryEstimator for $t {})*
    };
}

stack_only!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, bool, char, ());

impl MemoryEstimator for String {
    fn estimate_memory(&self) -> usize {
        std::mem::size_of::<Self>() + self.capacity()
    }
}

impl MemoryEstimator for &'static str {
    fn estimate_memory(&self) -> usize {
        std::mem::size_of::<Self>()
    }
}

impl<T: MemoryEstimator> MemoryEstimator for Vec<T> {
    fn estimate_memory(&self) -> usize {
        let spare = self.capacity() - self.len();
        std::mem::size_of::<Self>()
            + self.iter().map(T::estimate_memory).sum::<usize>()
            + spare * std::mem::size_of::<T>()
    }
}

impl<T: MemoryEstimator> MemoryEstimator for Option<T> {
    fn estimate_memory(&self) -> usize {
        match self {
            Some(value) => (std::mem::size_of::<Self>() + value.estimate_memory())
                .saturating_sub(std::mem::size_of::<T>()),
            None => std::mem::size_of::<Self>(),
        }
    }
}

impl<T: MemoryEstimator, E: MemoryEstimator> MemoryEstimator for Result<T, E> {
    fn estimate_memory(&self) -> usize {
        std::mem::size_of::<Self>()
            + match self {
                Ok(value) => value.estimate_memory().saturating_sub(std::mem::size_of::<T>()),
                Err(err) => err.estimate_memory().saturating_sub(std::mem::size_of::<E>()),
            }
    }
}

impl<A: MemoryEstimator, B: MemoryEstimator> MemoryEstimator for (A, B) {
    fn estimate_memory(&self) -> usize {
        self.0.estimate_memory() + self.1.estimate_memory()
    }
}

impl<T: MemoryEstimator + ?Sized> MemoryEstimator for Box<T> {
    fn estimate_memory(&self) -> usize {
        std::mem::size_of::<Self>() + (**self).estimate_memory()
    }
}

// Shared data is attributed in full to every holder.
impl<T: MemoryEstimator + ?Sized> MemoryEstimator for Arc<T> {
    fn estimate_memory(&self) -> usize {
        std::mem::size_of::<Self>() + (**self).estimate_memory()
    }
}

impl<K: MemoryEstimator, V: MemoryEstimator, S> MemoryEstimator for HashMap<K, V, S> {
    fn estimate_memory(&self) -> usize {
        std::mem::size_of::<Self>()
            + self
                .iter()
                .map(|(k, v)| k.estimate_memory() + v.estimate_memory())
                .sum::<usize>()
    }
}

impl<K: MemoryEstimator, V: MemoryEstimator> MemoryEstimator for BTreeMap<K, V> {
    fn estimate_memory(&self) -> usize {
        std::mem::size_of::<Self>()
            + self
                .iter()
                .map(|(k, v)| k.estimate_memory() + v.estimate_memory())
                .sum::<usize>()
    }
}
