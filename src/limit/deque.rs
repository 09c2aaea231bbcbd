//! Bounded event deque.
//!
//! An ordered sequence with the newest entry at the head and the oldest at the
//! tail. Insertion happens only at the head and removal only as a contiguous
//! run ending at the tail, which is all a sliding window needs.

use std::collections::vec_deque::{Drain, VecDeque};

/// Ring-buffer backed deque with head insertion and tail eviction.
#[derive(Debug, Clone)]
pub struct EventDeque<T> {
    /// Index 0 is the head (newest), the last index is the tail (oldest)
    items: VecDeque<T>,
}

impl<T> EventDeque<T> {
    /// Create an empty deque.
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    /// Insert an entry at the head.
    pub fn push_front(&mut self, item: T) {
        self.items.push_front(item);
    }

    /// Remove tail entries until at most `keep_max` remain.
    ///
    /// The returned iterator yields the removed entries; dropping it without
    /// consuming it still removes them.
    pub fn evict_count_suffix(&mut self, keep_max: usize) -> Drain<'_, T> {
        let start = keep_max.min(self.items.len());
        self.items.drain(start..)
    }

    /// Remove the contiguous run of expired entries ending at the tail.
    ///
    /// Walks from the tail toward the head and stops at the first entry for
    /// which `is_expired` is false. A deque with fewer than two entries has no
    /// span to measure and is left untouched.
    pub fn evict_time_suffix<F>(&mut self, mut is_expired: F) -> Drain<'_, T>
    where
        F: FnMut(&T) -> bool,
    {
        let len = self.items.len();
        if len < 2 {
            return self.items.drain(len..);
        }

        let expired = self
            .items
            .iter()
            .rev()
            .take_while(|&item| is_expired(item))
            .count();

        self.items.drain(len - expired..)
    }

    /// The newest entry.
    pub fn head(&self) -> Option<&T> {
        self.items.front()
    }

    /// The oldest entry.
    pub fn tail(&self) -> Option<&T> {
        self.items.back()
    }

    /// Iterate from head (newest) to tail (oldest).
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

impl<T> Default for EventDeque<T> {
    fn default() -> Self {
        Self::new()
    }
}
