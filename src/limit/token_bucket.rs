//! Token bucket limiter.
//!
//! Tokens accrue continuously at `fill_rate` per second up to `capacity`.
//! Refill is computed lazily from the time elapsed since the last refill at
//! the moment the bucket is accessed; there is no background timer.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};

/// How often the waiting consumers re-check the token level by default.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

struct BucketState {
    capacity: f64,
    fill_rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl BucketState {
    /// Token level at `now`, without persisting it.
    ///
    /// A non-positive fill rate never adds tokens. Only the upper bound is
    /// clamped here.
    fn refilled(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        let added = self.fill_rate.max(0.0) * elapsed;
        (self.tokens + added).min(self.capacity)
    }

    /// Persist the refill up to `now`.
    fn settle(&mut self, now: Instant) -> f64 {
        self.tokens = self.refilled(now);
        self.last_refill = self.last_refill.max(now);
        self.tokens
    }
}

/// A thread-safe token bucket.
///
/// The amount drawn on each access is chosen by a caller-supplied decision
/// function that sees the refilled token level. Returning `0.0` declines.
///
/// The bucket trusts the decision function: asking for more tokens than are
/// available is not rejected or clamped, and drives the level negative. The
/// bucket then has to refill past zero before it is usable again.
///
/// A zero or negative fill rate means the bucket never refills. A negative
/// rate is treated exactly like zero: the level does not decay over time, it
/// only drops through consumption.
pub struct TokenBucket {
    state: Mutex<BucketState>,
    poll_interval: Duration,
}

impl TokenBucket {
    /// Create a bucket holding `initial_tokens`.
    ///
    /// `initial_tokens` is not clamped to `capacity`; the first refill clamps
    /// the upper bound.
    pub fn new(initial_tokens: f64, capacity: f64, fill_rate: f64) -> Self {
        Self::new_at(initial_tokens, capacity, fill_rate, Instant::now())
    }

    /// Create a bucket whose refill clock starts at `now`.
    pub fn new_at(initial_tokens: f64, capacity: f64, fill_rate: f64, now: Instant) -> Self {
        Self {
            state: Mutex::new(BucketState {
                capacity,
                fill_rate,
                tokens: initial_tokens,
                last_refill: now,
            }),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set how often the waiting consumers poll the token level.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Refill, then draw whatever `decide` returns.
    ///
    /// Returns the amount drawn. When `decide` returns `0.0` nothing is
    /// persisted, so the elapsed time keeps counting toward the next refill.
    pub fn consume<F>(&self, decide: F) -> f64
    where
        F: FnOnce(f64) -> f64,
    {
        self.consume_at(Instant::now(), decide)
    }

    pub fn consume_at<F>(&self, now: Instant, decide: F) -> f64
    where
        F: FnOnce(f64) -> f64,
    {
        let mut state = self.state.lock();

        let available = state.refilled(now);
        let amount = decide(available);
        if amount == 0.0 {
            trace!(available = available, "Consumption declined");
            return 0.0;
        }

        state.tokens = available - amount;
        state.last_refill = state.last_refill.max(now);

        trace!(
            amount = amount,
            remaining = state.tokens,
            "Consumed tokens"
        );
        amount
    }

    /// Refill and return the current token level.
    ///
    /// The refill is persisted, so this advances the refill clock.
    pub fn get_current_tokens(&self) -> f64 {
        self.get_current_tokens_at(Instant::now())
    }

    pub fn get_current_tokens_at(&self, now: Instant) -> f64 {
        self.state.lock().settle(now)
    }

    /// Block until at least one token is available, then consume.
    ///
    /// Polls at the bucket's poll interval without holding the lock while
    /// sleeping. With a non-positive fill rate and a drained bucket this never
    /// returns.
    pub fn consume_with_wait<F>(&self, decide: F) -> f64
    where
        F: FnOnce(f64) -> f64,
    {
        while self.get_current_tokens() < 1.0 {
            trace!(poll_interval = ?self.poll_interval, "Waiting for tokens");
            std::thread::sleep(self.poll_interval);
        }

        self.consume(decide)
    }

    /// Async counterpart of [`consume_with_wait`](Self::consume_with_wait).
    ///
    /// There is no built-in deadline; wrap the future in
    /// `tokio::time::timeout` to bound the wait. Dropping the future between
    /// polls leaves the bucket unchanged.
    pub async fn consume_with_wait_async<F>(&self, decide: F) -> f64
    where
        F: FnOnce(f64) -> f64,
    {
        while self.get_current_tokens() < 1.0 {
            trace!(poll_interval = ?self.poll_interval, "Waiting for tokens");
            tokio::time::sleep(self.poll_interval).await;
        }

        self.consume(decide)
    }

    /// Change the fill rate.
    ///
    /// Tokens accrued so far are settled at the old rate first.
    pub fn set_fill_rate(&self, fill_rate: f64) {
        let mut state = self.state.lock();
        state.settle(Instant::now());
        debug!(from = state.fill_rate, to = fill_rate, "Updating fill rate");
        state.fill_rate = fill_rate;
    }

    /// Change the capacity.
    ///
    /// Tokens accrued so far are settled against the old capacity first; the
    /// new capacity applies from the next refill.
    pub fn set_capacity(&self, capacity: f64) {
        let mut state = self.state.lock();
        state.settle(Instant::now());
        debug!(from = state.capacity, to = capacity, "Updating capacity");
        state.capacity = capacity;
    }

    pub fn capacity(&self) -> f64 {
        self.state.lock().capacity
    }

    pub fn fill_rate(&self) -> f64 {
        self.state.lock().fill_rate
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const EPSILON: f64 = 1e-9;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_consume_and_refill_scenario() {
        let start = Instant::now();
        let bucket = TokenBucket::new_at(10.0, 20.0, 5.0, start);

        let drawn = bucket.consume_at(start, |_| 5.0);
        assert_eq!(drawn, 5.0);
        assert!((bucket.get_current_tokens_at(start) - 5.0).abs() < EPSILON);

        // 2s at 5/s refills to 15, then 10 are drawn
        let later = start + secs(2);
        bucket.consume_at(later, |available| {
            assert!((available - 15.0).abs() < EPSILON);
            10.0
        });
        assert!((bucket.get_current_tokens_at(later) - 5.0).abs() < EPSILON);
    }

    #[test]
    fn test_refill_is_capped_at_capacity() {
        let start = Instant::now();
        let bucket = TokenBucket::new_at(0.0, 20.0, 5.0, start);

        assert!((bucket.get_current_tokens_at(start + secs(60)) - 20.0).abs() < EPSILON);
    }

    #[test]
    fn test_refill_is_proportional_to_elapsed_time() {
        let start = Instant::now();
        let bucket = TokenBucket::new_at(0.0, 100.0, 2.5, start);

        let tokens = bucket.get_current_tokens_at(start + secs(5));
        assert!((tokens - 12.5).abs() < EPSILON);
    }

    #[test]
    fn test_over_consumption_goes_negative() {
        let start = Instant::now();
        let bucket = TokenBucket::new_at(5.0, 20.0, 5.0, start);

        bucket.consume_at(start, |_| 10.0);
        assert!((bucket.get_current_tokens_at(start) + 5.0).abs() < EPSILON);

        // 1s refills 5 tokens, which only brings the level back to zero
        let tokens = bucket.get_current_tokens_at(start + secs(1));
        assert!(tokens.abs() < EPSILON);
    }

    #[test]
    fn test_decide_sees_refilled_tokens() {
        let start = Instant::now();
        let bucket = TokenBucket::new_at(2.0, 20.0, 1.0, start);

        let drawn = bucket.consume_at(start + secs(1), |available| available.min(5.0));

        assert!((drawn - 3.0).abs() < EPSILON);
        assert!(bucket.get_current_tokens_at(start + secs(1)).abs() < EPSILON);
    }

    #[test]
    fn test_decline_preserves_elapsed_time() {
        let start = Instant::now();
        let bucket = TokenBucket::new_at(0.0, 100.0, 1.0, start);

        for i in 1..=10u64 {
            let drawn = bucket.consume_at(start + secs(i), |_| 0.0);
            assert_eq!(drawn, 0.0);
        }

        // Same as refill alone over 10s; repeated declines neither lose nor
        // double-count time
        let tokens = bucket.get_current_tokens_at(start + secs(10));
        assert!((tokens - 10.0).abs() < EPSILON);
    }

    #[test]
    fn test_get_current_tokens_is_monotonic_without_consumption() {
        let bucket = TokenBucket::new(3.0, 10.0, 50.0);

        let mut previous = bucket.get_current_tokens();
        for _ in 0..20 {
            thread::sleep(Duration::from_millis(5));
            let current = bucket.get_current_tokens();
            assert!(current >= previous);
            assert!(current <= 10.0);
            previous = current;
        }
    }

    #[test]
    fn test_initial_tokens_not_clamped_until_refill() {
        let start = Instant::now();
        let bucket = TokenBucket::new_at(20.0, 10.0, 1.0, start);

        bucket.consume_at(start, |available| {
            assert_eq!(available, 10.0);
            0.0
        });
    }

    #[test]
    fn test_non_positive_fill_rate_never_refills() {
        let start = Instant::now();
        let zero = TokenBucket::new_at(1.0, 10.0, 0.0, start);
        let negative = TokenBucket::new_at(1.0, 10.0, -5.0, start);

        zero.consume_at(start, |_| 1.0);
        negative.consume_at(start, |_| 1.0);

        assert_eq!(zero.get_current_tokens_at(start + secs(100)), 0.0);
        assert_eq!(negative.get_current_tokens_at(start + secs(100)), 0.0);

        // A negative rate does not drain a full bucket either
        let resting = TokenBucket::new_at(4.0, 10.0, -5.0, start);
        assert_eq!(resting.get_current_tokens_at(start + secs(100)), 4.0);
    }

    #[test]
    fn test_earlier_instant_does_not_rewind_clock() {
        let start = Instant::now();
        let bucket = TokenBucket::new_at(0.0, 100.0, 1.0, start + secs(10));

        assert_eq!(bucket.get_current_tokens_at(start), 0.0);
        let tokens = bucket.get_current_tokens_at(start + secs(12));
        assert!((tokens - 2.0).abs() < EPSILON);
    }

    #[test]
    fn test_set_fill_rate_applies_going_forward() {
        let bucket = TokenBucket::new(0.0, 1000.0, 0.0);

        bucket.set_fill_rate(100.0);
        assert_eq!(bucket.fill_rate(), 100.0);

        thread::sleep(Duration::from_millis(50));
        let tokens = bucket.get_current_tokens();
        assert!(tokens > 0.0);
        assert!(tokens < 1000.0);
    }

    #[test]
    fn test_set_capacity_applies_on_next_refill() {
        let bucket = TokenBucket::new(10.0, 10.0, 0.0);

        bucket.set_capacity(4.0);

        assert_eq!(bucket.capacity(), 4.0);
        assert_eq!(bucket.get_current_tokens(), 4.0);
    }

    #[test]
    fn test_consume_with_wait_blocks_until_token() {
        let started = Instant::now();
        let bucket = TokenBucket::new(0.0, 5.0, 20.0).with_poll_interval(Duration::from_millis(5));

        let drawn = bucket.consume_with_wait(|_| 1.0);

        assert_eq!(drawn, 1.0);
        // One token at 20/s takes 50ms
        assert!(started.elapsed() >= Duration::from_millis(45));
    }

    #[test]
    fn test_consume_with_wait_returns_immediately_when_available() {
        let bucket = TokenBucket::new(5.0, 10.0, 2.0);
        let started = Instant::now();

        bucket.consume_with_wait(|_| 2.0);

        assert!(started.elapsed() < DEFAULT_POLL_INTERVAL);
        let tokens = bucket.get_current_tokens();
        assert!((tokens - 3.0).abs() < 0.1);
    }

    #[tokio::test]
    async fn test_consume_with_wait_async() {
        let bucket = TokenBucket::new(0.0, 5.0, 20.0).with_poll_interval(Duration::from_millis(5));

        let drawn = bucket.consume_with_wait_async(|available| available.min(1.0)).await;

        assert!((drawn - 1.0).abs() < EPSILON);
    }

    #[tokio::test]
    async fn test_consume_with_wait_async_can_be_bounded_by_timeout() {
        let bucket = TokenBucket::new(0.0, 5.0, 0.0).with_poll_interval(Duration::from_millis(5));

        let result = tokio::time::timeout(
            Duration::from_millis(30),
            bucket.consume_with_wait_async(|_| 1.0),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(bucket.get_current_tokens(), 0.0);
    }

    #[test]
    fn test_concurrent_consumers_never_overdraw() {
        let bucket = Arc::new(TokenBucket::new(100.0, 100.0, 0.0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let bucket = bucket.clone();
                thread::spawn(move || {
                    let mut drawn = 0.0;
                    for _ in 0..50 {
                        drawn += bucket.consume(|available| if available >= 1.0 { 1.0 } else { 0.0 });
                    }
                    drawn
                })
            })
            .collect();

        let total: f64 = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(total, 100.0);
        assert_eq!(bucket.get_current_tokens(), 0.0);
    }
}
