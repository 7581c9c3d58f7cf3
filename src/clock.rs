//! Time sources for bucket refill.
//!
//! Buckets never read the wall clock directly; they receive a [`Duration`]
//! measured from an arbitrary fixed origin. This keeps the refill arithmetic
//! independent of how time is obtained and lets tests drive time by hand.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A source of timestamps, expressed as the time elapsed since some origin.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

/// Monotonic clock anchored at its creation instant.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Hand-driven clock for deterministic tests.
///
/// Clones share the same underlying time, so a test can keep a handle while
/// the store owns another. Unlike [`SystemClock`] it may be moved backwards.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(duration_to_nanos(by), Ordering::AcqRel);
    }

    pub fn set(&self, at: Duration) {
        self.nanos.store(duration_to_nanos(at), Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Acquire))
    }
}

pub(crate) fn duration_to_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

pub(crate) fn duration_to_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
