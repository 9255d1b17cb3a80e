//! Retry with exponential backoff.
//!
//! Used for isolation-boundary spawns, the only operation in the gate that is
//! retried automatically. Action faults are never retried.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Configuration for retry behavior with exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on the exponential growth.
    pub max_delay: Duration,
    /// Multiplier applied per retry (typically 2.0).
    pub exponential_base: f64,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    #[must_use]
    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        exponential_base: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            exponential_base,
        }
    }

    /// A configuration that makes exactly one attempt.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            exponential_base: 2.0,
        }
    }

    /// Defaults for spawning an isolation boundary.
    #[must_use]
    pub fn spawn() -> Self {
        Self::new(
            2,
            Duration::from_millis(100),
            Duration::from_secs(2),
            2.0,
        )
    }

    /// Delay before retry number `retry` (1-indexed); zero for `0`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let raw_ms = self.initial_delay.as_millis() as f64 * self.exponential_base.powi(exponent);
        let capped_ms = raw_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms.max(0.0) as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::spawn()
    }
}

/// Result of a retried operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T, E> {
    /// The operation succeeded after `attempts` tries.
    Success {
        /// The produced value.
        value: T,
        /// Total attempts made, including the successful one.
        attempts: u32,
    },
    /// Every allowed attempt failed, or the error was not retryable.
    Exhausted {
        /// The final error.
        error: E,
        /// Total attempts made.
        attempts: u32,
    },
}

impl<T, E> RetryOutcome<T, E> {
    /// Number of attempts made.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Success { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// Converts to a `Result`, discarding the attempt count.
    #[allow(clippy::missing_errors_doc)]
    pub fn into_result(self) -> Result<T, E> {
        match self {
            Self::Success { value, .. } => Ok(value),
            Self::Exhausted { error, .. } => Err(error),
        }
    }
}

/// Run `operation` until it succeeds, the error is not retryable, or the
/// retry budget is spent. `operation` receives the 0-indexed attempt number.
pub async fn retry<T, E, Fut, F, P>(
    config: &RetryConfig,
    mut operation: F,
    is_retryable: P,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 0;
    loop {
        match operation(attempt).await {
            Ok(value) => {
                return RetryOutcome::Success {
                    value,
                    attempts: attempt.saturating_add(1),
                };
            },
            Err(error) => {
                if attempt >= config.max_retries || !is_retryable(&error) {
                    return RetryOutcome::Exhausted {
                        error,
                        attempts: attempt.saturating_add(1),
                    };
                }
                attempt = attempt.saturating_add(1);
                let delay = config.delay_for_retry(attempt);
                debug!(attempt, delay_ms = delay.as_millis(), %error, "retrying after failure");
                tokio::time::sleep(delay).await;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delays_grow_and_cap() {
        let config = RetryConfig::new(
            5,
            Duration::from_millis(100),
            Duration::from_millis(300),
            2.0,
        );
        assert_eq!(config.delay_for_retry(0), Duration::ZERO);
        assert_eq!(config.delay_for_retry(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_retry(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_retry(3), Duration::from_millis(300));
        assert_eq!(config.delay_for_retry(9), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let outcome = retry(
            &RetryConfig::spawn(),
            |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err("busy") } else { Ok(n) } }
            },
            |_| true,
        )
        .await;
        assert_eq!(outcome.attempts(), 3);
        assert_eq!(outcome.into_result().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_non_retryable() {
        let outcome: RetryOutcome<(), &str> =
            retry(&RetryConfig::spawn(), |_| async { Err("fatal") }, |_| false).await;
        assert_eq!(outcome.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausts_budget() {
        let outcome: RetryOutcome<(), &str> =
            retry(&RetryConfig::spawn(), |_| async { Err("busy") }, |_| true).await;
        assert_eq!(outcome.attempts(), 3);
        assert!(outcome.into_result().is_err());
    }
}
