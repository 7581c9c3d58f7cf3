use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::clock::duration_to_nanos;
use crate::error::{ThrottleError, ThrottleResult};

/// Token reservoir for a single key.
///
/// The balance and both timestamps sit behind one small per-bucket mutex,
/// so a refill and the consume that follows it happen as a single step.
/// Timestamps are nanoseconds from the owning store's clock origin.
pub struct TokenBucket {
    capacity: u32,
    refill_rate: f64, // tokens per second
    state: Mutex<BucketState>,
}

#[derive(Debug, Clone, Copy)]
struct BucketState {
    tokens: f64,
    last_refill: u64,
    last_seen: u64,
}

impl BucketState {
    fn refill(&mut self, refill_rate: f64, capacity: u32, now: u64) {
        let elapsed = now.saturating_sub(self.last_refill);
        let tokens_to_add = refill_rate * (elapsed as f64 / 1_000_000_000.0);

        if tokens_to_add > 0.0 {
            self.tokens = (self.tokens + tokens_to_add).min(f64::from(capacity));
            self.last_refill = now;
        }
    }

    fn consume(&mut self, cost: u32) -> bool {
        let cost = f64::from(cost);
        if self.tokens < cost {
            return false;
        }
        self.tokens -= cost;
        true
    }
}

impl TokenBucket {
    /// Creates a full bucket, rejecting a zero capacity or a negative,
    /// NaN or infinite refill rate.
    pub fn new(capacity: u32, refill_rate: f64, now: Duration) -> ThrottleResult<Self> {
        validate_params(capacity, refill_rate)?;
        let now = duration_to_nanos(now);

        Ok(Self {
            capacity,
            refill_rate,
            state: Mutex::new(BucketState {
                tokens: f64::from(capacity),
                last_refill: now,
                last_seen: now,
            }),
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Current balance without applying any pending refill.
    pub fn tokens(&self) -> f64 {
        self.state().tokens
    }

    /// Refills to `now`, then reports the balance.
    pub fn available_tokens(&self, now: Duration) -> f64 {
        let mut state = self.state();
        state.refill(self.refill_rate, self.capacity, duration_to_nanos(now));
        state.tokens
    }

    /// Credits the tokens accrued since the last refill.
    ///
    /// A `now` at or before the last refill adds nothing, and `last_refill`
    /// only moves forward.
    pub fn refill(&self, now: Duration) {
        self.state()
            .refill(self.refill_rate, self.capacity, duration_to_nanos(now));
    }

    /// Deducts `cost` if the balance covers it. Either the whole cost is
    /// taken or the balance is left untouched.
    pub fn try_consume(&self, cost: u32) -> bool {
        cost == 0 || self.state().consume(cost)
    }

    /// One admission attempt at `now`: refill, record the attempt for idle
    /// tracking, then consume. No other caller can observe the bucket
    /// between the refill and the consume.
    ///
    /// Returns whether `cost` was taken and the balance left afterwards.
    pub fn try_acquire(&self, cost: u32, now: Duration) -> (bool, f64) {
        let now = duration_to_nanos(now);
        let mut state = self.state();

        state.refill(self.refill_rate, self.capacity, now);
        state.last_seen = state.last_seen.max(now);
        let allowed = cost == 0 || state.consume(cost);

        (allowed, state.tokens)
    }

    /// How long until `cost` tokens are available, refilling to `now` first.
    ///
    /// Returns `Some(Duration::ZERO)` when they already are, and `None` when
    /// the bucket can never hold them (zero refill rate, or `cost` above
    /// capacity).
    pub fn time_until_available(&self, cost: u32, now: Duration) -> Option<Duration> {
        let balance = self.available_tokens(now);
        let required = f64::from(cost);

        if balance >= required {
            return Some(Duration::ZERO);
        }
        if cost > self.capacity || self.refill_rate <= 0.0 {
            return None;
        }

        Duration::try_from_secs_f64((required - balance) / self.refill_rate).ok()
    }

    /// Records an admission attempt for idle tracking.
    pub fn touch(&self, now: Duration) {
        let mut state = self.state();
        state.last_seen = state.last_seen.max(duration_to_nanos(now));
    }

    pub fn idle_for(&self, now: Duration) -> Duration {
        let last_seen = self.state().last_seen;
        Duration::from_nanos(duration_to_nanos(now).saturating_sub(last_seen))
    }

    // Every update leaves the state consistent, so a poisoned lock is
    // still safe to use.
    fn state(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = *self.state();
        f.debug_struct("TokenBucket")
            .field("capacity", &self.capacity)
            .field("refill_rate", &self.refill_rate)
            .field("tokens", &state.tokens)
            .field("last_refill_nanos", &state.last_refill)
            .finish()
    }
}

pub(crate) fn validate_params(capacity: u32, refill_rate: f64) -> ThrottleResult<()> {
    if capacity == 0 {
        return Err(ThrottleError::InvalidCapacity);
    }
    if !refill_rate.is_finite() || refill_rate < 0.0 {
        return Err(ThrottleError::InvalidRefillRate(refill_rate));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn test_token_bucket_creation() {
        let bucket = TokenBucket::new(10, 2.0, Duration::ZERO).unwrap();
        assert_eq!(bucket.capacity(), 10);
        assert_eq!(bucket.refill_rate(), 2.0);
        assert_eq!(bucket.tokens(), 10.0);
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        assert!(matches!(
            TokenBucket::new(0, 1.0, Duration::ZERO),
            Err(ThrottleError::InvalidCapacity)
        ));
        assert!(matches!(
            TokenBucket::new(5, -0.5, Duration::ZERO),
            Err(ThrottleError::InvalidRefillRate(_))
        ));
        assert!(TokenBucket::new(5, f64::NAN, Duration::ZERO).is_err());
        assert!(TokenBucket::new(5, f64::INFINITY, Duration::ZERO).is_err());
        assert!(TokenBucket::new(5, 0.0, Duration::ZERO).is_ok());
    }

    #[test]
    fn test_token_consumption() {
        let bucket = TokenBucket::new(10, 2.0, Duration::ZERO).unwrap();
        assert!(bucket.try_consume(5));
        assert_eq!(bucket.tokens(), 5.0);
        assert!(bucket.try_consume(5));
        assert_eq!(bucket.tokens(), 0.0);
        assert!(!bucket.try_consume(1));
        assert_eq!(bucket.tokens(), 0.0);
    }

    #[test]
    fn test_failed_consume_leaves_balance() {
        let bucket = TokenBucket::new(3, 1.0, Duration::ZERO).unwrap();
        assert!(bucket.try_consume(2));
        assert!(!bucket.try_consume(2));
        assert_eq!(bucket.tokens(), 1.0);
    }

    #[test]
    fn test_zero_cost_always_succeeds() {
        let bucket = TokenBucket::new(1, 0.0, Duration::ZERO).unwrap();
        assert!(bucket.try_consume(1));
        assert!(bucket.try_consume(0));
        assert_eq!(bucket.tokens(), 0.0);
    }

    #[test]
    fn test_refill_adds_elapsed_tokens() {
        let bucket = TokenBucket::new(10, 2.0, Duration::ZERO).unwrap();
        assert!(bucket.try_consume(10));

        bucket.refill(secs(1.5));
        assert_eq!(bucket.tokens(), 3.0);
    }

    #[test]
    fn test_capacity_overflow_prevention() {
        let bucket = TokenBucket::new(5, 1000.0, Duration::ZERO).unwrap();
        assert!(bucket.try_consume(3));

        bucket.refill(secs(10.0));
        assert_eq!(bucket.tokens(), 5.0);
    }

    #[test]
    fn test_clock_going_backwards_adds_nothing() {
        let bucket = TokenBucket::new(4, 1.0, secs(10.0)).unwrap();
        assert!(bucket.try_consume(4));

        bucket.refill(secs(5.0));
        assert_eq!(bucket.tokens(), 0.0);

        // The earlier timestamp must not have rewound last_refill.
        bucket.refill(secs(11.0));
        assert_eq!(bucket.tokens(), 1.0);
    }

    #[test]
    fn test_zero_rate_never_refills() {
        let bucket = TokenBucket::new(2, 0.0, Duration::ZERO).unwrap();
        assert!(bucket.try_consume(2));
        bucket.refill(secs(3600.0));
        assert_eq!(bucket.tokens(), 0.0);
    }

    #[test]
    fn test_time_until_available() {
        let bucket = TokenBucket::new(3, 0.5, Duration::ZERO).unwrap();
        assert_eq!(bucket.time_until_available(3, Duration::ZERO), Some(Duration::ZERO));

        assert!(bucket.try_consume(3));
        assert_eq!(bucket.time_until_available(3, Duration::ZERO), Some(secs(6.0)));
        assert_eq!(bucket.time_until_available(3, secs(2.0)), Some(secs(4.0)));
        assert_eq!(bucket.time_until_available(4, secs(2.0)), None);
    }

    #[test]
    fn test_time_until_available_without_refill() {
        let bucket = TokenBucket::new(1, 0.0, Duration::ZERO).unwrap();
        assert!(bucket.try_consume(1));
        assert_eq!(bucket.time_until_available(1, secs(1.0)), None);
    }

    #[test]
    fn test_idle_tracking() {
        let bucket = TokenBucket::new(1, 1.0, secs(1.0)).unwrap();
        assert_eq!(bucket.idle_for(secs(4.0)), secs(3.0));

        bucket.touch(secs(3.0));
        bucket.touch(secs(2.0));
        assert_eq!(bucket.idle_for(secs(4.0)), secs(1.0));
    }

    #[test]
    fn test_acquire_refills_before_consuming() {
        let bucket = TokenBucket::new(4, 2.0, Duration::ZERO).unwrap();
        assert_eq!(bucket.try_acquire(4, Duration::ZERO), (true, 0.0));
        assert_eq!(bucket.try_acquire(1, secs(0.25)), (false, 0.5));

        // Credits the remaining interval and spends it in the same call.
        assert_eq!(bucket.try_acquire(3, secs(1.5)), (true, 0.0));
        assert_eq!(bucket.idle_for(secs(2.0)), secs(0.5));
    }

    #[test]
    fn test_acquire_after_refill_is_linearizable() {
        const N: usize = 32;
        let bucket = Arc::new(TokenBucket::new(N as u32, N as f64, Duration::ZERO).unwrap());
        assert!(bucket.try_consume(N as u32));

        // Every caller arrives after one second has accrued N tokens, so any
        // serial order admits all of them.
        let barrier = Arc::new(Barrier::new(N));
        let handles: Vec<_> = (0..N)
            .map(|_| {
                let bucket = bucket.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    bucket.try_acquire(1, secs(1.0)).0
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|allowed| *allowed)
            .count();
        assert_eq!(admitted, N);
        assert_eq!(bucket.tokens(), 0.0);
    }
}
