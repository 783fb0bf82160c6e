//! Room events: the immutable record of everything that happens in a room.

use std::collections::BTreeSet;

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

use {
    crate::content::Content,
    switchboard_common::{new_id, now_ms},
};

/// Direction of an event relative to the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Kind of room event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Message,
    System,
    Typing,
    ReadReceipt,
    DeliveryReceipt,
    Presence,
    Reaction,
    Edit,
    Delete,
    ParticipantJoined,
    ParticipantLeft,
    ChannelAttached,
    ChannelDetached,
    TaskCreated,
    Observation,
}

/// Delivery state of a stored event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Delivered,
    Read,
    Failed,
    Blocked,
}

/// Where an event came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSource {
    pub channel_id: String,
    pub channel_type: String,
    pub direction: Direction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,
    /// Provider-side message id, when the adapter has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

impl EventSource {
    pub fn inbound(channel_id: impl Into<String>, channel_type: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            channel_type: channel_type.into(),
            direction: Direction::Inbound,
            participant_id: None,
            external_id: None,
        }
    }

    pub fn outbound(channel_id: impl Into<String>, channel_type: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            channel_type: channel_type.into(),
            direction: Direction::Outbound,
            participant_id: None,
            external_id: None,
        }
    }

    /// Source for events the framework itself originates (hook injections,
    /// lifecycle notices). Internal sources have no binding and are exempt
    /// from write-access checks.
    pub fn internal(name: &str) -> Self {
        Self {
            channel_id: name.to_string(),
            channel_type: "internal".to_string(),
            direction: Direction::Outbound,
            participant_id: None,
            external_id: None,
        }
    }

    pub fn with_participant(mut self, participant_id: impl Into<String>) -> Self {
        self.participant_id = Some(participant_id.into());
        self
    }
}

/// Who may observe an event during broadcast.
///
/// Serialized as its string form: `"all"`, `"none"`, `"transport"`,
/// `"intelligence"`, or a comma-separated set of channel ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Visibility {
    #[default]
    All,
    None,
    Transport,
    Intelligence,
    Channels(BTreeSet<String>),
}

impl Visibility {
    pub fn channels<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Channels(ids.into_iter().map(Into::into).collect())
    }
}

impl From<String> for Visibility {
    fn from(value: String) -> Self {
        match value.as_str() {
            "" | "all" => Self::All,
            "none" => Self::None,
            "transport" => Self::Transport,
            "intelligence" => Self::Intelligence,
            other => Self::Channels(
                other
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            ),
        }
    }
}

impl From<Visibility> for String {
    fn from(value: Visibility) -> Self {
        match value {
            Visibility::All => "all".into(),
            Visibility::None => "none".into(),
            Visibility::Transport => "transport".into(),
            Visibility::Intelligence => "intelligence".into(),
            Visibility::Channels(ids) => ids.into_iter().collect::<Vec<_>>().join(","),
        }
    }
}

/// An event stored in a room.
///
/// `index` is assigned by the store under the room's exclusive section and
/// is gap-free per room. `chain_depth` is 0 for externally triggered events
/// and parent + 1 for reentry events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomEvent {
    pub id: String,
    pub room_id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub source: EventSource,
    pub content: Content,
    pub status: EventStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub index: u64,
    #[serde(default)]
    pub chain_depth: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl RoomEvent {
    pub fn new(
        room_id: impl Into<String>,
        event_type: EventType,
        source: EventSource,
        content: Content,
    ) -> Self {
        Self {
            id: new_id("evt"),
            room_id: room_id.into(),
            event_type,
            source,
            content,
            status: EventStatus::Pending,
            blocked_by: None,
            visibility: Visibility::All,
            index: 0,
            chain_depth: 0,
            parent_event_id: None,
            correlation_id: None,
            idempotency_key: None,
            created_at_ms: now_ms(),
            metadata: Map::new(),
        }
    }

    pub fn message(room_id: impl Into<String>, source: EventSource, content: Content) -> Self {
        Self::new(room_id, EventType::Message, source, content)
    }

    /// A framework-originated system event.
    pub fn system(room_id: impl Into<String>, code: &str, data: Option<Value>) -> Self {
        Self::new(
            room_id,
            EventType::System,
            EventSource::internal("system"),
            Content::system(code, data),
        )
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Link this event under a parent, inheriting its correlation id and
    /// taking the next chain depth.
    pub fn child_of(mut self, parent: &RoomEvent) -> Self {
        self.parent_event_id = Some(parent.id.clone());
        self.correlation_id = parent
            .correlation_id
            .clone()
            .or_else(|| Some(parent.id.clone()));
        self.chain_depth = parent.chain_depth + 1;
        self
    }

    pub fn is_blocked(&self) -> bool {
        self.status == EventStatus::Blocked
    }
}
