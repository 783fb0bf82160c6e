//! Engine configuration.

use std::{collections::HashSet, time::Duration};

use serde::{Deserialize, Serialize};

use switchboard_resilience::breaker::BreakerConfig;

/// Tuning knobs for the inbound pipeline. All fields have defaults so hosts
/// can deserialize a partial config table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum reentry generation; 0 disables intelligence responses.
    pub max_chain_depth: u32,
    /// Budget for the locked pipeline section (steps route → touch).
    pub process_timeout_ms: u64,
    /// Budget for the identity resolver.
    pub identity_timeout_ms: u64,
    /// Materialize a room when no binding matches an inbound message.
    pub auto_create_rooms: bool,
    /// Channel types that run identity resolution; `None` means all.
    pub identity_channel_types: Option<HashSet<String>>,
    /// Bound on the lock registry; idle entries beyond it are evicted LRU.
    pub lock_capacity: usize,
    /// Process-wide cap on concurrently running pipelines.
    pub max_concurrent_pipelines: Option<usize>,
    /// Circuit breaker settings shared by all transport bindings.
    pub breaker: BreakerConfig,
    /// Budget for each framework-event handler invocation.
    pub framework_handler_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_chain_depth: 3,
            process_timeout_ms: 30_000,
            identity_timeout_ms: 10_000,
            auto_create_rooms: true,
            identity_channel_types: None,
            lock_capacity: 1024,
            max_concurrent_pipelines: None,
            breaker: BreakerConfig::default(),
            framework_handler_timeout_ms: 2_000,
        }
    }
}

impl EngineConfig {
    pub(crate) fn process_timeout(&self) -> Duration {
        Duration::from_millis(self.process_timeout_ms)
    }

    pub(crate) fn identity_timeout(&self) -> Duration {
        Duration::from_millis(self.identity_timeout_ms)
    }

    pub(crate) fn framework_handler_timeout(&self) -> Duration {
        Duration::from_millis(self.framework_handler_timeout_ms)
    }
}
