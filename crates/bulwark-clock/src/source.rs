//! Physical time sources.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use bulwark_core::Timestamp;

/// A source of physical time in microseconds since the Unix epoch.
pub trait TimeSource: Send + Sync {
    /// Current physical time.
    fn now_micros(&self) -> i64;
}

/// The host's wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_micros(&self) -> i64 {
        chrono::Utc::now().timestamp_micros()
    }
}

/// A hand-driven time source for tests and replay.
#[derive(Debug)]
pub struct ManualTimeSource {
    micros: AtomicI64,
}

impl ManualTimeSource {
    /// Start at `start`.
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            micros: AtomicI64::new(start.as_micros()),
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let delta = i64::try_from(by.as_micros()).unwrap_or(i64::MAX);
        // fetch_update never fails when the closure always returns Some.
        let _ = self
            .micros
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                Some(v.saturating_add(delta))
            });
    }

    /// Jump to an arbitrary instant, including backwards.
    pub fn set(&self, to: Timestamp) {
        self.micros.store(to.as_micros(), Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_micros(&self) -> i64 {
        self.micros.load(Ordering::SeqCst)
    }
}
