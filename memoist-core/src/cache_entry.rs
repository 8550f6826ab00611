use std::time::Duration;

use crate::backing::StoredValue;

/// A stored value with the bookkeeping the standard caches need.
///
/// `inserted_at` is read from the cache's [`Timer`](crate::Timer), in seconds,
/// so expiry follows whatever clock the cache was built with.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use memoist_core::CacheEntry;
///
/// let entry = CacheEntry::new(Arc::new(42), 10.0, 1);
/// assert!(!entry.is_expired(Some(Duration::from_secs(5)), 12.0));
/// assert!(entry.is_expired(Some(Duration::from_secs(5)), 15.0));
/// assert!(!entry.is_expired(None, 1e9));
/// ```
#[derive(Clone)]
pub struct CacheEntry {
    pub value: StoredValue,
    pub inserted_at: f64,
    pub frequency: u64,
    /// Weight reported by the cache's `SizeOf` when the entry was stored.
    pub size: usize,
}

impl CacheEntry {
    pub fn new(value: StoredValue, inserted_at: f64, size: usize) -> Self {
        Self {
            value,
            inserted_at,
            frequency: 0,
            size,
        }
    }

    /// True once `ttl` has fully elapsed at time `now`. No TTL never expires.
    pub fn is_expired(&self, ttl: Option<Duration>, now: f64) -> bool {
        match ttl {
            Some(ttl) => now - self.inserted_at >= ttl.as_secs_f64(),
            None => false,
        }
    }

    /// Counts a hit, for the LFU policy.
    pub fn increment_frequency(&mut self) {
        self.frequency = self.frequency.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_new_entry_not_expired() {
        let entry = CacheEntry::new(Arc::new(42), 0.0, 1);
        assert!(!entry.is_expired(Some(Duration::from_secs(10)), 9.9));
        assert_eq!(entry.frequency, 0);
    }

    #[test]
    fn test_expires_exactly_at_ttl() {
        let entry = CacheEntry::new(Arc::new("data"), 100.0, 1);
        assert!(entry.is_expired(Some(Duration::from_secs(1)), 101.0));
    }

    #[test]
    fn test_frequency_saturates() {
        let mut entry = CacheEntry::new(Arc::new(()), 0.0, 1);
        entry.frequency = u64::MAX;
        entry.increment_frequency();
        assert_eq!(entry.frequency, u64::MAX);
    }
}
