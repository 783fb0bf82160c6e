use std::sync::Arc;

use {async_trait::async_trait, tracing::debug};

use switchboard_store::Store;

use crate::Result;

/// Where an inbound message should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Existing(String),
    /// No binding matched; the caller materializes a new room and attaches
    /// the source channel.
    CreateNew,
}

/// Pluggable channel/participant-to-room resolution.
#[async_trait]
pub trait InboundRouter: Send + Sync {
    async fn route(
        &self,
        channel_id: &str,
        channel_type: &str,
        participant_id: Option<&str>,
    ) -> Result<RouteOutcome>;
}

/// Default router: walks the binding cascade using only store queries.
pub struct StoreRouter {
    store: Arc<dyn Store>,
}

impl StoreRouter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl InboundRouter for StoreRouter {
    async fn route(
        &self,
        channel_id: &str,
        channel_type: &str,
        participant_id: Option<&str>,
    ) -> Result<RouteOutcome> {
        if let Some(binding) = self.store.find_binding_by_channel(channel_id).await? {
            // A binding pinned to a participant only matches that
            // participant; anything else falls through the cascade.
            let pinned_elsewhere = match (&binding.participant_id, participant_id) {
                (Some(bound), Some(inbound)) => bound != inbound,
                _ => false,
            };
            if !pinned_elsewhere {
                debug!(channel = channel_id, room = %binding.room_id, "routed by channel binding");
                return Ok(RouteOutcome::Existing(binding.room_id));
            }
        }

        if let Some(participant_id) = participant_id
            && let Some(binding) = self
                .store
                .find_binding_by_participant(channel_type, participant_id)
                .await?
        {
            debug!(
                channel_type,
                participant = participant_id,
                room = %binding.room_id,
                "routed by channel type + participant"
            );
            return Ok(RouteOutcome::Existing(binding.room_id));
        }

        debug!(channel = channel_id, "no binding matched, requesting room creation");
        Ok(RouteOutcome::CreateNew)
    }
}
