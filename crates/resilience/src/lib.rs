//! Failure isolation for channel deliveries.
//!
//! One [`CircuitBreaker`] and one [`RateLimiter`] exist per channel id,
//! owned and driven by the event router. [`RetryPolicy`] wraps individual
//! delivery attempts on transport bindings. Each primitive synchronizes
//! itself; callers never hold locks across them.

pub mod breaker;
pub mod limiter;
pub mod retry;

pub use {
    breaker::{BreakerConfig, BreakerError, BreakerState, CircuitBreaker},
    limiter::RateLimiter,
    retry::RetryPolicy,
};
