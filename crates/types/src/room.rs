//! Rooms: the shared conversational container and unit of serialization.

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

use switchboard_common::{new_id, now_ms};

/// Room lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Active,
    Paused,
    Closed,
    Archived,
}

impl RoomStatus {
    /// Whether inbound events addressed to a room in this state are routed.
    pub fn accepts_inbound(self) -> bool {
        matches!(self, Self::Active | Self::Paused)
    }
}

impl std::fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Closed => "closed",
            Self::Archived => "archived",
        };
        f.write_str(s)
    }
}

/// Idle timers. Applied by an external ticker via
/// [`Room::desired_status`]; the inbound pipeline never evaluates them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomTimers {
    /// Idle time after which an active room is paused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inactive_after_ms: Option<u64>,
    /// Idle time after which an open room is closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_after_ms: Option<u64>,
}

/// A conversational room.
///
/// `event_count` and `latest_index` are store-owned counters: the store
/// maintains them during event writes and ignores caller-supplied values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    pub status: RoomStatus,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at_ms: Option<u64>,
    #[serde(default)]
    pub timers: RoomTimers,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub event_count: u64,
    /// Index of the most recent event, `None` while the room is empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_index: Option<u64>,
}

impl Room {
    pub fn new() -> Self {
        let now = now_ms();
        Self {
            id: new_id("room"),
            organization_id: None,
            status: RoomStatus::Active,
            created_at_ms: now,
            updated_at_ms: now,
            closed_at_ms: None,
            timers: RoomTimers::default(),
            metadata: Map::new(),
            event_count: 0,
            latest_index: None,
        }
    }

    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    pub fn with_timers(mut self, timers: RoomTimers) -> Self {
        self.timers = timers;
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Index the next event in this room will receive.
    pub fn next_index(&self) -> u64 {
        self.latest_index.map_or(0, |i| i + 1)
    }

    /// Evaluate idle timers against `now_ms`.
    ///
    /// Returns the state the room should transition to, or `None` when no
    /// transition is due. Closing takes precedence over pausing; closed and
    /// archived rooms never transition.
    pub fn desired_status(&self, now_ms: u64) -> Option<RoomStatus> {
        if !self.status.accepts_inbound() {
            return None;
        }
        let idle = now_ms.saturating_sub(self.updated_at_ms);
        if let Some(close_after) = self.timers.closed_after_ms
            && idle >= close_after
        {
            return Some(RoomStatus::Closed);
        }
        if self.status == RoomStatus::Active
            && let Some(inactive_after) = self.timers.inactive_after_ms
            && idle >= inactive_after
        {
            return Some(RoomStatus::Paused);
        }
        None
    }
}

impl Default for Room {
    fn default() -> Self {
        Self::new()
    }
}
