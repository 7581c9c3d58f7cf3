//! Process-wide keyed bucket store.
//!
//! Buckets live in a sharded [`DashMap`]. An admission check for a known key
//! only takes a shared guard on that key's shard plus the bucket's own lock,
//! so unrelated keys never contend on a common lock. Creation goes through
//! the map's entry API, which constructs at most one bucket per key.

use dashmap::mapref::one::Ref;
use dashmap::DashMap;
use std::time::Duration;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};
use crate::error::{ThrottleError, ThrottleResult};
use crate::token_bucket::{validate_params, TokenBucket};

pub const DEFAULT_CAPACITY: u32 = 10;
pub const DEFAULT_REFILL_RATE: f64 = 1.0;

/// Keyed token-bucket store.
///
/// Capacity and refill rate are passed on every call but only take effect
/// when a key's bucket is created. Later calls with different values reuse
/// the existing bucket unchanged; [`BucketStore::reset`] is the way to apply
/// new parameters to a key.
pub struct BucketStore<C: Clock = SystemClock> {
    buckets: DashMap<String, TokenBucket>,
    clock: C,
}

impl BucketStore<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock::new())
    }
}

impl Default for BucketStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> BucketStore<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            buckets: DashMap::new(),
            clock,
        }
    }

    /// Attempts to take `cost` tokens from `key`'s bucket.
    ///
    /// Returns `Ok(false)` when the bucket cannot cover the cost. Errors are
    /// reserved for invalid arguments, in which case no bucket is created.
    pub fn try_consume(
        &self,
        key: &str,
        cost: u32,
        capacity: u32,
        refill_rate: f64,
    ) -> ThrottleResult<bool> {
        if key.is_empty() {
            return Err(ThrottleError::EmptyKey);
        }
        validate_params(capacity, refill_rate)?;

        let now = self.clock.now();
        let bucket = self.get_or_create(key, capacity, refill_rate, now)?;

        let (allowed, remaining) = bucket.try_acquire(cost, now);

        debug!(key, cost, allowed, remaining, "Admission decision");

        Ok(allowed)
    }

    /// [`BucketStore::try_consume`] with a capacity of 10 tokens refilling at
    /// 1 token per second.
    pub fn try_consume_default(&self, key: &str, cost: u32) -> ThrottleResult<bool> {
        self.try_consume(key, cost, DEFAULT_CAPACITY, DEFAULT_REFILL_RATE)
    }

    /// Drops `key`'s bucket. Returns whether one existed.
    pub fn reset(&self, key: &str) -> bool {
        let removed = self.buckets.remove(key).is_some();
        if removed {
            debug!(key, "Bucket reset");
        }
        removed
    }

    pub fn reset_all(&self) {
        self.buckets.clear();
        debug!("All buckets reset");
    }

    /// Number of tracked keys. Taken shard by shard, so it is a snapshot
    /// rather than an exact figure under concurrent mutation.
    pub fn count(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.buckets.contains_key(key)
    }

    /// Balance of an existing bucket after refilling it. Unknown keys are
    /// not created.
    pub fn available_tokens(&self, key: &str) -> Option<f64> {
        let now = self.clock.now();
        self.buckets
            .get(key)
            .map(|bucket| bucket.available_tokens(now))
    }

    /// Time until `key` could admit `cost` tokens.
    ///
    /// `None` for unknown keys and for buckets that can never hold `cost`.
    pub fn retry_after(&self, key: &str, cost: u32) -> Option<Duration> {
        let now = self.clock.now();
        self.buckets
            .get(key)
            .and_then(|bucket| bucket.time_until_available(cost, now))
    }

    /// Removes buckets with no admission attempt for longer than `max_idle`.
    ///
    /// Never called implicitly; a removed key starts again with a full
    /// bucket on its next request.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = self.clock.now();
        let mut evicted = 0;

        self.buckets.retain(|_, bucket| {
            let keep = bucket.idle_for(now) <= max_idle;
            if !keep {
                evicted += 1;
            }
            keep
        });

        if evicted > 0 {
            debug!(evicted, remaining = self.buckets.len(), "Evicted idle buckets");
        }
        evicted
    }

    fn get_or_create(
        &self,
        key: &str,
        capacity: u32,
        refill_rate: f64,
        now: Duration,
    ) -> ThrottleResult<Ref<'_, String, TokenBucket>> {
        loop {
            if let Some(bucket) = self.buckets.get(key) {
                return Ok(bucket);
            }

            // A concurrent reset can remove the bucket again before the
            // lookup, so retry until one is found.
            self.buckets
                .entry(key.to_owned())
                .or_try_insert_with(|| {
                    trace!(key, capacity, refill_rate, "Creating bucket");
                    TokenBucket::new(capacity, refill_rate, now)
                })?;
        }
    }
}
