use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::Duration;

use crate::cache_entry::CacheEntry;

/// Moves `key` to the back (most recent end) of the order queue.
///
/// Keys not in the queue are left alone.
///
/// # Examples
///
/// ```
/// use std::collections::VecDeque;
/// use memoist_core::utils::move_key_to_end;
///
/// let mut order = VecDeque::from(vec!["a", "b", "c"]);
/// move_key_to_end(&mut order, &"a");
/// assert_eq!(order, VecDeque::from(vec!["b", "c", "a"]));
/// ```
pub fn move_key_to_end<K: PartialEq + Clone>(order: &mut VecDeque<K>, key: &K) {
    if let Some(pos) = order.iter().position(|k| k == key) {
        if let Some(k) = order.remove(pos) {
            order.push_back(k);
        }
    }
}

/// Removes `key` from the order queue, if present.
pub fn remove_from_order<K: PartialEq>(order: &mut VecDeque<K>, key: &K) {
    if let Some(pos) = order.iter().position(|k| k == key) {
        order.remove(pos);
    }
}

/// The key with the fewest hits, scanning in queue order so ties go to the oldest.
pub fn find_min_frequency_key<K: Eq + Hash + Clone>(
    map: &HashMap<K, CacheEntry>,
    order: &VecDeque<K>,
) -> Option<K> {
    let mut min_key = None;
    let mut min_freq = u64::MAX;

    for key in order {
        if let Some(entry) = map.get(key) {
            if min_key.is_none() || entry.frequency < min_freq {
                min_freq = entry.frequency;
                min_key = Some(key.clone());
            }
        }
    }

    min_key
}

/// The key with the lowest time-aware score, `(hits + 1)^weight × recency × remaining life`.
///
/// Recency grows towards the back of the queue. Remaining life is the
/// fraction of `ttl` left at `now`; without a TTL it is always 1. Ties go to
/// the oldest key.
pub fn find_tlru_key<K: Eq + Hash + Clone>(
    map: &HashMap<K, CacheEntry>,
    order: &VecDeque<K>,
    ttl: Option<Duration>,
    now: f64,
    frequency_weight: f64,
) -> Option<K> {
    let mut best_key = None;
    let mut best_score = f64::MAX;

    for (idx, key) in order.iter().enumerate() {
        let Some(entry) = map.get(key) else {
            continue;
        };
        let life = match ttl {
            Some(ttl) if !ttl.is_zero() => {
                (1.0 - (now - entry.inserted_at) / ttl.as_secs_f64()).clamp(0.0, 1.0)
            }
            _ => 1.0,
        };
        let hits = (entry.frequency as f64 + 1.0).powf(frequency_weight);
        let score = hits * (idx + 1) as f64 * life;
        if best_key.is_none() || score < best_score {
            best_score = score;
            best_key = Some(key.clone());
        }
    }

    best_key
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_move_missing_key_is_noop() {
        let mut order = VecDeque::from(vec![1, 2]);
        move_key_to_end(&mut order, &3);
        assert_eq!(order, VecDeque::from(vec![1, 2]));
    }

    #[test]
    fn test_min_frequency_prefers_oldest_on_tie() {
        let mut map = HashMap::new();
        for (key, freq) in [("a", 3), ("b", 1), ("c", 1)] {
            let mut entry = CacheEntry::new(Arc::new(()), 0.0, 1);
            entry.frequency = freq;
            map.insert(key, entry);
        }
        let order = VecDeque::from(vec!["a", "b", "c"]);
        assert_eq!(find_min_frequency_key(&map, &order), Some("b"));
    }

    fn entry(inserted_at: f64, frequency: u64) -> CacheEntry {
        let mut entry = CacheEntry::new(Arc::new(()), inserted_at, 1);
        entry.frequency = frequency;
        entry
    }

    #[test]
    fn test_tlru_without_ttl_is_recency_and_hits() {
        let map = HashMap::from([("a", entry(0.0, 0)), ("b", entry(0.0, 0))]);
        let order = VecDeque::from(vec!["a", "b"]);
        assert_eq!(find_tlru_key(&map, &order, None, 0.0, 1.0), Some("a"));

        // enough hits outweigh being least recent
        let map = HashMap::from([("a", entry(0.0, 3)), ("b", entry(0.0, 0))]);
        assert_eq!(find_tlru_key(&map, &order, None, 0.0, 1.0), Some("b"));
        // unless frequency is weighted away
        assert_eq!(find_tlru_key(&map, &order, None, 0.0, 0.0), Some("a"));
    }

    #[test]
    fn test_tlru_prefers_entries_close_to_expiry() {
        let map = HashMap::from([("old", entry(0.0, 5)), ("new", entry(9.0, 0))]);
        let order = VecDeque::from(vec!["new", "old"]);
        let victim = find_tlru_key(&map, &order, Some(Duration::from_secs(10)), 9.5, 1.0);
        assert_eq!(victim, Some("old"));
    }

    #[test]
    fn test_min_frequency_empty() {
        let map: HashMap<&str, CacheEntry> = HashMap::new();
        assert_eq!(find_min_frequency_key(&map, &VecDeque::new()), None);
    }
}
