//! Exponential-backoff retry for single work units.

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::{info, warn};

use crate::error::WorkError;

/// Default number of attempts per unit.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first retry; doubles on each further retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Retry policy: `max_attempts` tries, sleeping `base_delay * 2^n` between
/// them and never after the last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Backoff schedule for this policy.
    pub fn backoff(&self) -> ExponentialBuilder {
        let retries = self.max_attempts.saturating_sub(1);
        ExponentialBuilder::default()
            .with_factor(2.0)
            .with_min_delay(self.base_delay)
            .with_max_delay(self.base_delay.saturating_mul(1 << retries.min(16)))
            .with_max_times(retries as usize)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out.
    pub async fn run<T, F, Fut>(&self, label: &str, op: F) -> Result<T, WorkError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, WorkError>>,
    {
        let mut failures = 0u32;
        let result = op
            .retry(self.backoff())
            .when(|e: &WorkError| e.is_retryable())
            .notify(|e: &WorkError, delay: Duration| {
                failures += 1;
                warn!(
                    unit = label,
                    attempt = failures,
                    max_attempts = self.max_attempts,
                    error = %e,
                    "Work unit failed, retrying in {:.1}s",
                    delay.as_secs_f64()
                );
            })
            .await;

        if result.is_ok() && failures > 0 {
            info!(unit = label, "Work unit recovered after {failures} failed attempt(s)");
        }
        result
    }
}

impl WorkError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NonZeroExit { .. } | Self::Timeout { .. } | Self::Other(_)
        )
    }
}
