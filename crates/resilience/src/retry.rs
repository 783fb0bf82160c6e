//! Exponential backoff for transport deliveries.

use std::time::Duration;

use tracing::warn;

use switchboard_types::RetryConfig;

/// Retry with exponential backoff.
///
/// The first attempt runs immediately; retry `k` (0-indexed) sleeps
/// `min(max_delay, base_delay * exponential_base^k)` before running. After
/// `max_retries + 1` total attempts the last failure propagates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            exponential_base: 1.0,
        }
    }

    /// Backoff before retry `retry` (0-indexed).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.exponential_base.powi(retry.min(i32::MAX as u32) as i32);
        if !factor.is_finite() {
            return self.max_delay;
        }
        let delay = self.base_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay).min(self.max_delay)
    }

    /// Run `attempt_fn` until it succeeds or retries are exhausted. The
    /// closure receives the attempt number (0-indexed).
    pub async fn run<T, E, F, Fut>(&self, mut attempt_fn: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0u32;
        loop {
            match attempt_fn(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_retries => return Err(e),
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "delivery attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
            }
        }
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            exponential_base: config.exponential_base,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(RetryConfig::default())
    }
}
