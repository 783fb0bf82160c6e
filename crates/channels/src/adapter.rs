//! The channel adapter contract.

use {
    anyhow::{Result, bail},
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

use switchboard_types::{
    Capabilities, ChannelBinding, ChannelCategory, ChannelDirection, Content, EventSource,
    EventType, Room, RoomEvent, Visibility,
};

/// Static description of a channel adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    /// Globally unique across registered channels.
    pub channel_id: String,
    pub channel_type: String,
    pub category: ChannelCategory,
    pub direction: ChannelDirection,
    pub capabilities: Capabilities,
}

impl ChannelDescriptor {
    pub fn transport(channel_id: impl Into<String>, channel_type: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            channel_type: channel_type.into(),
            category: ChannelCategory::Transport,
            direction: ChannelDirection::Bidirectional,
            capabilities: Capabilities::default(),
        }
    }

    pub fn intelligence(channel_id: impl Into<String>, channel_type: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            channel_type: channel_type.into(),
            category: ChannelCategory::Intelligence,
            direction: ChannelDirection::Bidirectional,
            capabilities: Capabilities::default(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// An external message as handed to `process_inbound` by webhook parsers or
/// socket readers (which live in host code).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel_id: String,
    pub channel_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,
    /// Provider-side message id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub content: Content,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl InboundMessage {
    pub fn text(
        channel_id: impl Into<String>,
        channel_type: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            channel_type: channel_type.into(),
            participant_id: None,
            external_id: None,
            idempotency_key: None,
            correlation_id: None,
            content: Content::text(text),
            metadata: Map::new(),
        }
    }

    pub fn with_participant(mut self, participant_id: impl Into<String>) -> Self {
        self.participant_id = Some(participant_id.into());
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Room state handed to adapter callbacks.
#[derive(Debug, Clone)]
pub struct RoomContext {
    pub room: Room,
}

/// An event an intelligence channel wants injected back into the room.
#[derive(Debug, Clone)]
pub struct ResponseEvent {
    pub event_type: EventType,
    pub content: Content,
    pub visibility: Option<Visibility>,
    pub metadata: Map<String, Value>,
}

impl ResponseEvent {
    pub fn message(content: Content) -> Self {
        Self {
            event_type: EventType::Message,
            content,
            visibility: None,
            metadata: Map::new(),
        }
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }
}

/// Everything a channel produced while observing an event.
#[derive(Debug, Clone, Default)]
pub struct ChannelReaction {
    /// Reentry candidates; the router applies chain-depth policy.
    pub response_events: Vec<ResponseEvent>,
    /// Task payloads persisted at the end of the pipeline run.
    pub tasks: Vec<Value>,
    /// Observation payloads persisted at the end of the pipeline run.
    pub observations: Vec<Value>,
}

impl ChannelReaction {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn respond(content: Content) -> Self {
        Self {
            response_events: vec![ResponseEvent::message(content)],
            ..Self::default()
        }
    }

    pub fn with_task(mut self, payload: Value) -> Self {
        self.tasks.push(payload);
        self
    }

    pub fn with_observation(mut self, payload: Value) -> Self {
        self.observations.push(payload);
        self
    }
}

/// A channel adapter: the glue to one external endpoint.
///
/// Transports implement [`Channel::deliver`]; intelligence channels
/// implement [`Channel::on_event`] and produce response events. Both sides
/// may override [`Channel::handle_inbound`] when canonical conversion needs
/// provider-specific work; the default maps an [`InboundMessage`] field by
/// field.
#[async_trait]
pub trait Channel: Send + Sync {
    fn descriptor(&self) -> &ChannelDescriptor;

    /// Convert an external message into the canonical room event.
    async fn handle_inbound(
        &self,
        inbound: &InboundMessage,
        ctx: &RoomContext,
    ) -> Result<RoomEvent> {
        let mut source = EventSource::inbound(&inbound.channel_id, &inbound.channel_type);
        source.participant_id = inbound.participant_id.clone();
        source.external_id = inbound.external_id.clone();

        let mut event = RoomEvent::message(&ctx.room.id, source, inbound.content.clone())
            .with_metadata(inbound.metadata.clone());
        event.idempotency_key = inbound.idempotency_key.clone();
        event.correlation_id = inbound.correlation_id.clone();
        Ok(event)
    }

    /// Deliver an event outward. Transport channels only.
    async fn deliver(
        &self,
        _event: &RoomEvent,
        _binding: &ChannelBinding,
        _ctx: &RoomContext,
    ) -> Result<()> {
        bail!(
            "channel {} does not deliver (not a transport)",
            self.descriptor().channel_id
        )
    }

    /// Observe an event. Default no-op for transports; intelligence
    /// channels react here.
    async fn on_event(
        &self,
        _event: &RoomEvent,
        _binding: &ChannelBinding,
        _ctx: &RoomContext,
    ) -> Result<ChannelReaction> {
        Ok(ChannelReaction::none())
    }

    /// Release provider resources.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
