//! Participants: a sender's presence within a single room.

use serde::{Deserialize, Serialize};

use switchboard_common::{new_id, now_ms};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    #[default]
    Active,
    Left,
}

/// Room-scoped record of someone speaking through a channel. Owned by the
/// room; links to an [`crate::Identity`] once resolution succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub room_id: String,
    pub channel_id: String,
    pub role: String,
    #[serde(default)]
    pub status: ParticipantStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_id: Option<String>,
    pub joined_at_ms: u64,
    pub updated_at_ms: u64,
}

impl Participant {
    pub fn new(
        room_id: impl Into<String>,
        channel_id: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        let now = now_ms();
        Self {
            id: new_id("ptc"),
            room_id: room_id.into(),
            channel_id: channel_id.into(),
            role: role.into(),
            status: ParticipantStatus::Active,
            identity_id: None,
            joined_at_ms: now,
            updated_at_ms: now,
        }
    }

    pub fn with_identity(mut self, identity_id: impl Into<String>) -> Self {
        self.identity_id = Some(identity_id.into());
        self
    }
}
