//! Change tracking for harvestable state
//!
//! Each component records the keys it modified since the last harvest.
//! A harvest drains the tracker in one swap, so "what changed" never
//! requires re-scanning the full state.
//!
//! Keys are kept in a `BTreeSet` so drained output is deterministic.

use std::collections::BTreeSet;

/// Set of keys modified since the last drain.
#[derive(Debug, Clone)]
pub struct ChangeTracker<K: Ord> {
    pending: BTreeSet<K>,
}

impl<K: Ord> Default for ChangeTracker<K> {
    fn default() -> Self {
        Self {
            pending: BTreeSet::new(),
        }
    }
}

impl<K: Ord> ChangeTracker<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `key` as changed. Marking twice is a no-op.
    pub fn mark(&mut self, key: K) {
        self.pending.insert(key);
    }

    /// Forget a pending change (the entry was dropped before harvest).
    pub fn unmark(&mut self, key: &K) -> bool {
        self.pending.remove(key)
    }

    pub fn is_marked(&self, key: &K) -> bool {
        self.pending.contains(key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Take every pending key, leaving the tracker empty.
    pub fn drain(&mut self) -> BTreeSet<K> {
        std::mem::take(&mut self.pending)
    }

    /// Drop pending keys that no longer satisfy `keep`.
    pub fn retain(&mut self, keep: impl FnMut(&K) -> bool) {
        self.pending.retain(keep);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_is_idempotent() {
        let mut tracker = ChangeTracker::new();
        tracker.mark(3);
        tracker.mark(3);
        tracker.mark(1);
        assert_eq!(tracker.len(), 2);
        assert!(tracker.is_marked(&1));
    }

    #[test]
    fn test_drain_clears() {
        let mut tracker = ChangeTracker::new();
        tracker.mark(5);
        tracker.mark(2);

        let drained: Vec<i32> = tracker.drain().into_iter().collect();
        assert_eq!(drained, vec![2, 5]);
        assert!(tracker.is_empty());
        assert!(tracker.drain().is_empty());
    }

    #[test]
    fn test_unmark_and_retain() {
        let mut tracker = ChangeTracker::new();
        for k in 0..6 {
            tracker.mark(k);
        }
        assert!(tracker.unmark(&0));
        assert!(!tracker.unmark(&0));
        tracker.retain(|k| k % 2 == 0);
        assert_eq!(tracker.drain().into_iter().collect::<Vec<_>>(), vec![2, 4]);
    }
}
