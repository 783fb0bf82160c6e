//! Channel bindings: the attachment of a channel to a room.

use std::collections::HashSet;

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

use {
    crate::{content::ContentKind, event::Visibility},
    switchboard_common::now_ms,
};

/// Metadata key that opts a binding into receiving its own events back
/// (loopback channels). Any truthy value enables it.
pub const ALWAYS_PROCESS_KEY: &str = "_always_process";

/// What a channel is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelCategory {
    /// Delivers events outward (SMS, email, websocket, ...).
    Transport,
    /// Reacts to events by producing new ones (AI backends).
    Intelligence,
}

/// Which way messages flow through a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelDirection {
    Inbound,
    Outbound,
    Bidirectional,
}

/// Access rights of a binding within its room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelAccess {
    ReadWrite,
    ReadOnly,
    WriteOnly,
    None,
}

impl ChannelAccess {
    /// May this binding observe events (receive broadcast)?
    pub fn can_read(self) -> bool {
        matches!(self, Self::ReadWrite | Self::ReadOnly)
    }

    /// May this binding originate events?
    pub fn can_write(self) -> bool {
        matches!(self, Self::ReadWrite | Self::WriteOnly)
    }
}

/// What to do when content exceeds a binding's `max_length`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    #[default]
    Truncate,
    Reject,
}

fn default_content_kinds() -> HashSet<ContentKind> {
    HashSet::from([ContentKind::Text])
}

/// Declared rendering abilities of a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    /// Content kinds the channel renders natively.
    pub content: HashSet<ContentKind>,
    /// Character limit for textual payloads.
    pub max_length: Option<usize>,
    pub overflow: OverflowPolicy,
    /// Free-form feature flags (e.g. `"reactions"`, `"editing"`).
    pub features: HashSet<String>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            content: default_content_kinds(),
            max_length: None,
            overflow: OverflowPolicy::default(),
            features: HashSet::new(),
        }
    }
}

impl Capabilities {
    /// Text-only capabilities, the lowest common denominator.
    pub fn text_only() -> Self {
        Self::default()
    }

    pub fn with_kinds(kinds: impl IntoIterator<Item = ContentKind>) -> Self {
        Self {
            content: kinds.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_max_length(mut self, max_length: usize, overflow: OverflowPolicy) -> Self {
        self.max_length = Some(max_length);
        self.overflow = overflow;
        self
    }

    pub fn supports(&self, kind: ContentKind) -> bool {
        self.content.contains(&kind)
    }
}

/// Token-bucket rate limit. At most one of the fields should be set; when
/// several are, the finest granularity wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_per_second: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_per_minute: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_per_hour: Option<u32>,
}

impl RateLimitConfig {
    pub fn is_unlimited(&self) -> bool {
        self.max_per_second.is_none() && self.max_per_minute.is_none() && self.max_per_hour.is_none()
    }
}

/// Exponential backoff settings for transport deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 200,
            max_delay_ms: 10_000,
            exponential_base: 2.0,
        }
    }
}

/// The attachment of a channel to a room.
///
/// `channel_id` is globally unique across registered channels; a binding is
/// owned by its room and destroyed on detach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelBinding {
    pub channel_id: String,
    pub room_id: String,
    pub channel_type: String,
    pub category: ChannelCategory,
    pub direction: ChannelDirection,
    pub access: ChannelAccess,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_read_index: Option<u64>,
    pub attached_at_ms: u64,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    /// Open extension map: per-room knobs intelligence adapters read at each
    /// invocation (system prompt, temperature, tool list, ...).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ChannelBinding {
    pub fn new(
        room_id: impl Into<String>,
        channel_id: impl Into<String>,
        channel_type: impl Into<String>,
        category: ChannelCategory,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            room_id: room_id.into(),
            channel_type: channel_type.into(),
            category,
            direction: ChannelDirection::Bidirectional,
            access: ChannelAccess::ReadWrite,
            muted: false,
            visibility: Visibility::All,
            participant_id: None,
            last_read_index: None,
            attached_at_ms: now_ms(),
            capabilities: Capabilities::default(),
            rate_limit: None,
            retry: None,
            metadata: Map::new(),
        }
    }

    pub fn with_access(mut self, access: ChannelAccess) -> Self {
        self.access = access;
        self
    }

    pub fn with_direction(mut self, direction: ChannelDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_participant(mut self, participant_id: impl Into<String>) -> Self {
        self.participant_id = Some(participant_id.into());
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn muted(mut self) -> Self {
        self.muted = true;
        self
    }

    /// Whether this binding opted into receiving its own events back.
    pub fn always_process(&self) -> bool {
        self.metadata
            .get(ALWAYS_PROCESS_KEY)
            .is_some_and(|v| v.as_bool().unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_rights() {
        assert!(ChannelAccess::ReadWrite.can_read());
        assert!(ChannelAccess::ReadWrite.can_write());
        assert!(ChannelAccess::ReadOnly.can_read());
        assert!(!ChannelAccess::ReadOnly.can_write());
        assert!(!ChannelAccess::WriteOnly.can_read());
        assert!(ChannelAccess::WriteOnly.can_write());
        assert!(!ChannelAccess::None.can_read());
        assert!(!ChannelAccess::None.can_write());
    }

    #[test]
    fn default_capabilities_are_text_only() {
        let caps = Capabilities::default();
        assert!(caps.supports(ContentKind::Text));
        assert!(!caps.supports(ContentKind::Rich));
        assert!(caps.max_length.is_none());
    }

    #[test]
    fn binding_defaults() {
        let b = ChannelBinding::new("room_1", "sms-1", "sms", ChannelCategory::Transport);
        assert_eq!(b.direction, ChannelDirection::Bidirectional);
        assert_eq!(b.access, ChannelAccess::ReadWrite);
        assert!(!b.muted);
        assert_eq!(b.visibility, Visibility::All);
        assert!(!b.always_process());
    }

    #[test]
    fn always_process_reads_metadata_flag() {
        let mut b = ChannelBinding::new("room_1", "loop-1", "loop", ChannelCategory::Transport);
        b.metadata
            .insert(ALWAYS_PROCESS_KEY.into(), serde_json::Value::Bool(true));
        assert!(b.always_process());
        b.metadata
            .insert(ALWAYS_PROCESS_KEY.into(), serde_json::Value::Bool(false));
        assert!(!b.always_process());
    }

    #[test]
    fn binding_roundtrips_through_json() {
        let b = ChannelBinding::new("room_1", "llm-1", "llm", ChannelCategory::Intelligence)
            .with_access(ChannelAccess::ReadOnly)
            .with_rate_limit(RateLimitConfig {
                max_per_minute: Some(30),
                ..Default::default()
            });
        let json = serde_json::to_string(&b).unwrap();
        let back: ChannelBinding = serde_json::from_str(&json).unwrap();
        assert_eq!(b, back);
    }
}
