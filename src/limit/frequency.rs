//! Sliding-window frequency aggregator.
//!
//! Keeps a running total over a window of recent samples and answers
//! "how fast is this happening" as `total / span`, where the span is the time
//! between the oldest and newest retained sample. The total is maintained
//! incrementally: added on insert, subtracted for every evicted sample.

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::deque::EventDeque;

/// A timestamped value fed into the aggregator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// The counted amount
    pub value: f64,
    /// When the sample was recorded
    pub at: Instant,
}

/// Rule deciding which samples stay in the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Keep samples at most this old, measured against the newest sample.
    Time(Duration),
    /// Keep at most this many samples.
    Count(usize),
}

impl Default for Retention {
    fn default() -> Self {
        Retention::Time(Duration::from_secs(4))
    }
}

impl fmt::Display for Retention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Retention::Time(window) => write!(f, "time({:?})", window),
            Retention::Count(max) => write!(f, "count({})", max),
        }
    }
}

struct WindowState {
    total: f64,
    samples: EventDeque<Sample>,
    retention: Retention,
}

impl WindowState {
    fn push(&mut self, value: f64, at: Instant) {
        // Samples must stay ordered newest-first; a stale timestamp is pulled
        // forward to the current head.
        let at = match self.samples.head() {
            Some(head) if at < head.at => head.at,
            _ => at,
        };

        self.samples.push_front(Sample { value, at });
        self.total += value;
        self.apply_retention();
    }

    fn apply_retention(&mut self) {
        let (evicted, removed) = match self.retention {
            Retention::Time(window) => {
                let Some(newest) = self.samples.head().map(|s| s.at) else {
                    return;
                };
                sum_values(
                    self.samples
                        .evict_time_suffix(|s| newest.saturating_duration_since(s.at) > window),
                )
            }
            Retention::Count(max) => sum_values(self.samples.evict_count_suffix(max)),
        };

        if evicted == 0 {
            return;
        }

        self.total -= removed;
        if self.samples.is_empty() {
            self.total = 0.0;
        }

        trace!(
            evicted = evicted,
            retained = self.samples.len(),
            total = self.total,
            retention = %self.retention,
            "Evicted samples from window"
        );
    }

    /// Time between the oldest and newest sample, if there are at least two.
    fn span(&self) -> Option<Duration> {
        if self.samples.len() < 2 {
            return None;
        }
        let head = self.samples.head()?;
        let tail = self.samples.tail()?;
        Some(head.at.saturating_duration_since(tail.at))
    }
}

fn sum_values(evicted: impl Iterator<Item = Sample>) -> (usize, f64) {
    evicted.fold((0, 0.0), |(count, sum), sample| (count + 1, sum + sample.value))
}

/// A thread-safe sliding-window frequency aggregator.
///
/// All operations take the same instance-wide lock for their full duration,
/// so the total and the retained samples are always observed together.
pub struct FrequencyAggregator {
    state: Mutex<WindowState>,
}

impl FrequencyAggregator {
    /// Create an empty aggregator with the given retention policy.
    pub fn new(retention: Retention) -> Self {
        Self {
            state: Mutex::new(WindowState {
                total: 0.0,
                samples: EventDeque::new(),
                retention,
            }),
        }
    }

    /// Record a sample taken now.
    pub fn put(&self, value: f64) {
        self.put_at(value, Instant::now());
    }

    /// Record a sample taken at `at`.
    ///
    /// A timestamp older than the newest retained sample is treated as if it
    /// arrived together with that sample. Non-finite values are dropped, since
    /// they would poison the running total for good.
    pub fn put_at(&self, value: f64, at: Instant) {
        if !value.is_finite() {
            debug!(value = value, "Ignoring non-finite sample");
            return;
        }
        self.state.lock().push(value, at);
    }

    /// Current rate in units per second.
    ///
    /// Returns `0.0` when fewer than two samples are retained or when all
    /// retained samples share one timestamp.
    pub fn get_frequency(&self) -> f64 {
        self.get_frequency_with(|span| span.as_secs_f64())
    }

    /// Current rate with a caller-chosen divisor.
    ///
    /// `divisor` maps the measured span to the denominator, e.g.
    /// `|span| span.as_secs_f64() / 60.0` for a per-minute rate. A zero or
    /// non-finite divisor yields `0.0`.
    pub fn get_frequency_with<F>(&self, divisor: F) -> f64
    where
        F: FnOnce(Duration) -> f64,
    {
        let state = self.state.lock();

        let Some(span) = state.span() else {
            return 0.0;
        };
        if span.is_zero() {
            return 0.0;
        }

        let divisor = divisor(span);
        if divisor == 0.0 || !divisor.is_finite() {
            return 0.0;
        }

        state.total / divisor
    }

    /// Replace the retention policy and apply it immediately.
    pub fn set_retention(&self, retention: Retention) {
        let mut state = self.state.lock();
        state.retention = retention;
        state.apply_retention();
    }

    pub fn retention(&self) -> Retention {
        self.state.lock().retention
    }

    /// Sum of the retained sample values.
    pub fn total(&self) -> f64 {
        self.state.lock().total
    }

    /// Number of retained samples.
    pub fn len(&self) -> usize {
        self.state.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().samples.is_empty()
    }

    /// Copy of the retained samples, newest first.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.state.lock().samples.iter().copied().collect()
    }
}

impl Default for FrequencyAggregator {
    fn default() -> Self {
        Self::new(Retention::default())
    }
}
