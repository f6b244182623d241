//! Insertion-ordered, bounded set of already-queued message timestamps.

use std::collections::{HashSet, VecDeque};

/// Remembers which top-level messages were queued during this process lifetime.
///
/// Once the set grows past `capacity`, the `evict_count` oldest entries (by
/// insertion order) are dropped.
#[derive(Debug, Clone)]
pub struct DedupSet {
    order: VecDeque<String>,
    members: HashSet<String>,
    capacity: usize,
    evict_count: usize,
}

impl DedupSet {
    pub fn new(capacity: usize, evict_count: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity + 1),
            members: HashSet::with_capacity(capacity + 1),
            capacity,
            evict_count: evict_count.clamp(1, capacity.max(1)),
        }
    }

    /// Records `ts`; returns `false` if it was already present.
    pub fn insert(&mut self, ts: &str) -> bool {
        if self.members.contains(ts) {
            return false;
        }

        self.members.insert(ts.to_string());
        self.order.push_back(ts.to_string());

        if self.order.len() > self.capacity {
            for evicted in self.order.drain(..self.evict_count.min(self.order.len())) {
                self.members.remove(&evicted);
            }
        }

        true
    }

    pub fn contains(&self, ts: &str) -> bool {
        self.members.contains(ts)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_repeats() {
        let mut set = DedupSet::new(10, 5);

        assert!(set.insert("1.0"));
        assert!(!set.insert("1.0"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn trims_oldest_half_in_insertion_order() {
        let mut set = DedupSet::new(1000, 500);

        // Timestamps that would sort differently from their insertion order.
        let stamps: Vec<String> = (0..1001).map(|i| format!("{}.{:06}", 2000 - i, i)).collect();
        for ts in &stamps {
            assert!(set.insert(ts));
        }

        assert_eq!(set.len(), 501);
        for ts in &stamps[..500] {
            assert!(!set.contains(ts), "{ts} should have been evicted");
        }
        for ts in &stamps[500..] {
            assert!(set.contains(ts), "{ts} should have been retained");
        }
    }

    #[test]
    fn evicted_entries_can_be_queued_again() {
        let mut set = DedupSet::new(2, 1);

        set.insert("a");
        set.insert("b");
        set.insert("c");

        assert!(!set.contains("a"));
        assert!(set.insert("a"));
        assert!(!set.contains("b"));
    }
}
