//! Bounded exponential-backoff retry and polling.

use std::future::Future;
use std::time::{Duration, Instant};

use sheetloader_shared::{Result, RetryConfig, SheetloaderError};
use tracing::{debug, warn};

/// Retry/poll policy: at most `max_attempts` calls, sleeping
/// `min(base_delay * 2^n, max_delay)` before retry `n` (0-based).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry `retry_count` (0 = first retry).
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let multiplier = 2_u32.saturating_pow(retry_count);
        self.base_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. A server-provided `retry_after` replaces the
    /// computed delay (still capped at `max_delay`).
    pub async fn retry<T, F, Fut>(
        &self,
        op_name: &str,
        is_retryable: impl Fn(&SheetloaderError) -> bool,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts && is_retryable(&e) => {
                    let delay = e
                        .retry_after()
                        .map(|d| d.min(self.max_delay))
                        .unwrap_or_else(|| self.delay_for(attempt - 1));
                    warn!(
                        op = op_name,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Poll `op` until `status_of` reports one of `terminal_statuses`.
    ///
    /// Errors from `op` are returned immediately; running out of attempts
    /// yields a timeout error.
    pub async fn poll_until<T, S, F, Fut>(
        &self,
        terminal_statuses: &[S],
        status_of: impl Fn(&T) -> S,
        mut op: F,
    ) -> Result<T>
    where
        S: PartialEq + std::fmt::Debug,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let max_attempts = self.max_attempts.max(1);

        for attempt in 0..max_attempts {
            let value = op().await?;
            let status = status_of(&value);
            if terminal_statuses.contains(&status) {
                return Ok(value);
            }
            debug!(attempt = attempt + 1, ?status, "not terminal yet");
            if attempt + 1 < max_attempts {
                tokio::time::sleep(self.delay_for(attempt)).await;
            }
        }

        Err(SheetloaderError::Timeout {
            after: started.elapsed(),
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}
