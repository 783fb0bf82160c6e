//! Token-bucket rate limiter with wait-based backpressure.

use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

use tracing::debug;

use switchboard_types::RateLimitConfig;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket derived from a [`RateLimitConfig`].
///
/// Capacity is the configured rate clamped to at least 1; tokens refill
/// continuously at that rate over the configured period. `acquire` waits
/// for a token instead of dropping — backpressure, not shedding. Dropping
/// a waiting `acquire` future takes nothing from the bucket.
pub struct RateLimiter {
    capacity: f64,
    refill_per_ms: f64,
    bucket: Option<Mutex<Bucket>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        // Finest configured granularity wins when several are set.
        let rate = [
            (config.max_per_second, 1_000u64),
            (config.max_per_minute, 60_000),
            (config.max_per_hour, 3_600_000),
        ]
        .into_iter()
        .find_map(|(count, period_ms)| count.map(|c| (c, period_ms)));

        if config.max_per_second.is_some() as u8
            + config.max_per_minute.is_some() as u8
            + config.max_per_hour.is_some() as u8
            > 1
        {
            debug!("rate limit config sets multiple rates, using the finest granularity");
        }

        match rate {
            Some((count, period_ms)) => {
                let capacity = f64::from(count.max(1));
                Self {
                    capacity,
                    refill_per_ms: capacity / period_ms as f64,
                    bucket: Some(Mutex::new(Bucket {
                        tokens: capacity,
                        last_refill: Instant::now(),
                    })),
                }
            },
            None => Self::unlimited(),
        }
    }

    /// A limiter that never waits.
    pub fn unlimited() -> Self {
        Self {
            capacity: f64::INFINITY,
            refill_per_ms: 0.0,
            bucket: None,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.bucket.is_none()
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Wait until a token is available, then take it.
    pub async fn acquire(&self) {
        loop {
            match self.try_take(Instant::now()) {
                Ok(()) => return,
                Err(wait) => tokio::time::sleep(wait).await,
            }
        }
    }

    /// Take a token now, or report how long until one is available.
    fn try_take(&self, now: Instant) -> Result<(), Duration> {
        let Some(bucket) = &self.bucket else {
            return Ok(());
        };
        let mut bucket = bucket.lock().unwrap_or_else(|e| e.into_inner());
        let elapsed_ms = now.duration_since(bucket.last_refill).as_secs_f64() * 1_000.0;
        bucket.tokens = (bucket.tokens + elapsed_ms * self.refill_per_ms).min(self.capacity);
        bucket.last_refill = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }
        let deficit = 1.0 - bucket.tokens;
        Err(Duration::from_secs_f64(
            (deficit / self.refill_per_ms).max(1.0) / 1_000.0,
        ))
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}
