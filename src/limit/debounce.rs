//! Time-windowed deduplication of triggers.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

struct DebounceState<T> {
    /// Key -> instant at which the key may fire again
    entries: HashMap<T, Instant>,
    duration: Duration,
}

/// Suppresses repeat triggers for the same key within a fixed duration.
///
/// Expired entries are dropped lazily when they are next observed, or in bulk
/// by [`purge_expired`](Self::purge_expired).
pub struct Debouncer<T> {
    state: Mutex<DebounceState<T>>,
}

impl<T: Eq + Hash> Debouncer<T> {
    pub fn new(duration: Duration) -> Self {
        Self {
            state: Mutex::new(DebounceState {
                entries: HashMap::new(),
                duration,
            }),
        }
    }

    /// Run `trigger` for `key` unless the key fired within the window.
    ///
    /// The key is only recorded when `trigger` returns `true`, so a trigger
    /// that declines can be retried right away. Returns whether the key was
    /// recorded. `trigger` runs under the lock and must not call back into
    /// this debouncer.
    pub fn exceeds_limit<F>(&self, key: T, trigger: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        self.exceeds_limit_at(key, Instant::now(), trigger)
    }

    pub fn exceeds_limit_at<F>(&self, key: T, now: Instant, trigger: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        let mut state = self.state.lock();

        if let Some(&expires_at) = state.entries.get(&key) {
            if now < expires_at {
                trace!("Trigger suppressed");
                return false;
            }
            state.entries.remove(&key);
        }

        if !trigger() {
            return false;
        }

        let expires_at = now + state.duration;
        state.entries.insert(key, expires_at);
        true
    }

    /// Change the window for keys recorded from now on.
    pub fn set_duration(&self, duration: Duration) {
        self.state.lock().duration = duration;
    }

    pub fn duration(&self) -> Duration {
        self.state.lock().duration
    }

    /// Whether `key` is currently suppressed.
    pub fn contains(&self, key: &T) -> bool {
        self.contains_at(key, Instant::now())
    }

    pub fn contains_at(&self, key: &T, now: Instant) -> bool {
        self.state
            .lock()
            .entries
            .get(key)
            .is_some_and(|expires_at| now < *expires_at)
    }

    /// Drop every expired entry and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub fn purge_expired_at(&self, now: Instant) -> usize {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|_, expires_at| now < *expires_at);
        let removed = before - state.entries.len();
        if removed > 0 {
            trace!(removed = removed, "Purged expired debounce entries");
        }
        removed
    }

    /// Number of recorded entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }
}
