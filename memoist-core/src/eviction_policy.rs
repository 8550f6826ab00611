/// Policy used by [`BoundedCache`](crate::BoundedCache) to pick a victim when full.
///
/// * `FIFO` - evicts in insertion order; hits do not reorder.
/// * `LRU` - evicts the least recently read or written entry (default).
/// * `LFU` - evicts the entry with the fewest hits; ties go to the oldest.
/// * `Random` - evicts a uniformly chosen entry.
/// * `TLRU` - time-aware LRU: evicts the lowest `(hits + 1)^weight × recency × remaining life`,
///   so entries close to expiring go first.
///
/// # Examples
///
/// ```
/// use memoist_core::EvictionPolicy;
///
/// assert_eq!(EvictionPolicy::default(), EvictionPolicy::LRU);
///
/// let policy: EvictionPolicy = "lfu".into();
/// assert_eq!(policy, EvictionPolicy::LFU);
///
/// let unknown: EvictionPolicy = "mru".into();
/// assert_eq!(unknown, EvictionPolicy::LRU);
/// ```
///
/// | Policy | Eviction | Cache Hit |
/// |--------|----------|-----------|
/// | FIFO   | O(1)     | O(1)      |
/// | LRU    | O(1)     | O(n)      |
/// | LFU    | O(n)     | O(1)      |
/// | Random | O(n)     | O(1)      |
/// | TLRU   | O(n)     | O(n)      |
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum EvictionPolicy {
    FIFO,
    #[default]
    LRU,
    LFU,
    Random,
    TLRU,
}

/// Case-insensitive conversion; unrecognized names fall back to LRU.
impl From<&str> for EvictionPolicy {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "fifo" => EvictionPolicy::FIFO,
            "lfu" => EvictionPolicy::LFU,
            "random" | "rr" => EvictionPolicy::Random,
            "tlru" => EvictionPolicy::TLRU,
            _ => EvictionPolicy::LRU,
        }
    }
}
