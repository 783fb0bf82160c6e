//! Per-channel circuit breaker.

use std::{
    fmt,
    sync::Mutex,
    time::{Duration, Instant},
};

use {
    serde::{Deserialize, Serialize},
    tracing::{info, warn},
};

/// Breaker tuning. Defaults: open after 5 consecutive failures, stay open
/// for 60 seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_ms: 60_000,
        }
    }
}

impl BreakerConfig {
    fn recovery(&self) -> Duration {
        Duration::from_millis(self.recovery_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Either the call was rejected because the circuit is open, or the inner
/// operation itself failed.
#[derive(Debug)]
pub enum BreakerError<E> {
    Open,
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("circuit open"),
            Self::Inner(e) => e.fmt(f),
        }
    }
}

impl<E: fmt::Display + fmt::Debug> std::error::Error for BreakerError<E> {}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_started_at: Option<Instant>,
}

/// State machine: `closed → open → half_open → closed | open`.
///
/// Closed counts consecutive failures and resets on success. Open rejects
/// until the recovery window elapses. Half-open admits exactly one probe;
/// its success closes the circuit, its failure re-opens it.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_started_at: None,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    /// Run the wrapped operation, recording its outcome.
    pub async fn run<T, E, F>(&self, fut: F) -> Result<T, BreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        if !self.try_admit(Instant::now()) {
            return Err(BreakerError::Open);
        }
        match fut.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            },
            Err(e) => {
                self.record_failure(Instant::now());
                Err(BreakerError::Inner(e))
            },
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn try_admit(&self, now: Instant) -> bool {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| now.duration_since(at))
                    .unwrap_or_default();
                if elapsed >= self.config.recovery() {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_started_at = Some(now);
                    info!("circuit breaker half-open, admitting probe");
                    true
                } else {
                    false
                }
            },
            BreakerState::HalfOpen => {
                // One probe at a time. A probe abandoned for a full recovery
                // window (caller dropped mid-flight) is considered stale and
                // replaced, so the breaker cannot wedge.
                match inner.probe_started_at {
                    Some(started) if now.duration_since(started) < self.config.recovery() => false,
                    _ => {
                        inner.probe_started_at = Some(now);
                        true
                    },
                }
            },
        }
    }

    fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Closed;
                inner.consecutive_failures = 0;
                inner.probe_started_at = None;
                inner.opened_at = None;
                info!("circuit breaker closed after successful probe");
            },
            _ => {
                inner.consecutive_failures = 0;
            },
        }
    }

    fn record_failure(&self, now: Instant) {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                inner.probe_started_at = None;
                warn!("circuit breaker re-opened after failed probe");
                #[cfg(feature = "metrics")]
                metrics::counter!("switchboard_breaker_opened_total").increment(1);
            },
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                    warn!(
                        failures = inner.consecutive_failures,
                        "circuit breaker opened"
                    );
                    #[cfg(feature = "metrics")]
                    metrics::counter!("switchboard_breaker_opened_total").increment(1);
                }
            },
            BreakerState::Open => {},
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
