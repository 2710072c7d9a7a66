//! Injected time source (spec.md §9 "Clock"), so tests can drive expiration
//! deterministically without sleeping.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// A source of the current time, injected everywhere the cache makes a
/// time-dependent decision (expiration, last-access refresh).
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current UTC instant.
    fn now(&self) -> SystemTime;
}

/// The real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A clock that starts at the wall-clock time it was created and can be
/// advanced manually. Used by integration tests to simulate the passage of
/// time without real sleeps (spec.md §8 scenario 5, "Expiration").
#[derive(Debug, Clone)]
pub struct TestClock {
    offset_secs: Arc<AtomicU64>,
    base: SystemTime,
}

impl TestClock {
    /// Creates a new test clock anchored at the current wall-clock time.
    #[must_use]
    pub fn new() -> Self {
        Self { offset_secs: Arc::new(AtomicU64::new(0)), base: SystemTime::now() }
    }

    /// Advances the clock by `duration`.
    pub fn advance(&self, duration: Duration) {
        self.offset_secs.fetch_add(duration.as_secs(), Ordering::SeqCst);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> SystemTime {
        self.base + Duration::from_secs(self.offset_secs.load(Ordering::SeqCst))
    }
}

/// Converts a [`SystemTime`] to seconds since the Unix epoch, saturating at 0.
pub fn to_unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}
