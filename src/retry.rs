//! Retry policy shared by the GitHub and completion clients.
//!
//! A [`RetryPolicy`] is a small stateless value: how many attempts, the base
//! delay, and a cap. Only errors for which
//! [`Error::is_retryable`](crate::error::Error::is_retryable) holds are retried
//! (rate limits, connection failures, upstream 5xx); everything else is
//! returned from the first attempt.
//!
//! Backoff doubles per attempt: `base, 2·base, 4·base, …`, capped at
//! `max_delay`. Tests use [`RetryPolicy::immediate`] for zero delay.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::RetryConfig;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// A policy that retries without sleeping.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before attempt `attempt` (0-based; attempt 0 never waits).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32 << (attempt - 1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            let delay = self.delay_for(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < self.max_attempts => {
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        "{} failed, retrying: {}",
                        what,
                        e
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
