//! Structured results of a pipeline run.

use serde::{Deserialize, Serialize};

use {switchboard_hooks::HookError, switchboard_types::RoomEvent};

/// Why a target binding was skipped during broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoReadAccess,
    /// Transport target without write access receives `on_event` only.
    NoDeliveryAccess,
    VisibilityFiltered,
    NotTranscodable,
    LengthExceeded,
    /// Binding exists but no adapter is registered under its channel id.
    UnknownChannel,
}

/// Outcome of one target binding during broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    Failed { error: String },
    CircuitOpen,
    Skipped { reason: SkipReason },
}

impl DeliveryStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::CircuitOpen)
    }

    pub fn is_attempted(&self) -> bool {
        !matches!(self, Self::Skipped { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub channel_id: String,
    pub event_id: String,
    #[serde(flatten)]
    pub status: DeliveryStatus,
}

/// What `process_inbound` hands back to the caller.
///
/// Blocked events are a normal outcome, not a failure: the event is
/// persisted with `status = blocked` and `blocked` is set here.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub event: Option<RoomEvent>,
    /// The idempotency key matched a stored event; `event` is the prior
    /// record and nothing was re-broadcast.
    pub deduplicated: bool,
    pub blocked: bool,
    pub blocked_reason: Option<String>,
    pub hook_errors: Vec<HookError>,
    /// Per-target results for the triggering event and every reentry event
    /// processed in the same section.
    pub delivery_results: Vec<DeliveryResult>,
}

impl ProcessOutcome {
    pub(crate) fn deduplicated(prior: RoomEvent) -> Self {
        Self {
            event: Some(prior),
            deduplicated: true,
            blocked: false,
            blocked_reason: None,
            hook_errors: Vec::new(),
            delivery_results: Vec::new(),
        }
    }

    /// Deliveries that reached their target (ignoring skips).
    pub fn delivered_count(&self) -> usize {
        self.delivery_results
            .iter()
            .filter(|r| matches!(r.status, DeliveryStatus::Delivered))
            .count()
    }
}
