//! Ephemeral realtime pub/sub.
//!
//! Typing indicators, presence, and read receipts fan out to current
//! subscribers of a room and are never persisted. [`LocalBus`] is the
//! in-process implementation; the [`RealtimeBus`] trait is the seam for a
//! remote pub/sub backend.

use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use {
    anyhow::Result,
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tracing::{debug, warn},
};

use switchboard_common::{new_id, now_ms};

// ── Events ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EphemeralKind {
    TypingStart,
    TypingStop,
    PresenceOnline,
    PresenceAway,
    PresenceOffline,
    ReadReceipt,
    Custom,
}

/// A transient room event: delivered to live subscribers, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EphemeralEvent {
    pub id: String,
    pub room_id: String,
    pub kind: EphemeralKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub data: Value,
    pub timestamp_ms: u64,
}

impl EphemeralEvent {
    pub fn new(room_id: impl Into<String>, kind: EphemeralKind) -> Self {
        Self {
            id: new_id("eph"),
            room_id: room_id.into(),
            kind,
            user_id: None,
            channel_id: None,
            data: Value::Null,
            timestamp_ms: now_ms(),
        }
    }

    pub fn typing(room_id: impl Into<String>, started: bool) -> Self {
        let kind = if started {
            EphemeralKind::TypingStart
        } else {
            EphemeralKind::TypingStop
        };
        Self::new(room_id, kind)
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

// ── Bus contract ────────────────────────────────────────────────────────────

pub type SubscriptionId = u64;

/// Receives ephemeral events for a subscribed room. Errors are caught and
/// logged by the bus; they never propagate to publishers.
#[async_trait]
pub trait EphemeralSubscriber: Send + Sync {
    async fn on_event(&self, event: &EphemeralEvent) -> Result<()>;
}

/// Pub/sub of ephemeral events per room.
///
/// Delivery to a single subscriber follows publish order on this process;
/// cross-subscriber ordering is unspecified.
#[async_trait]
pub trait RealtimeBus: Send + Sync {
    async fn publish(&self, room_id: &str, event: EphemeralEvent);

    async fn subscribe(
        &self,
        room_id: &str,
        subscriber: Arc<dyn EphemeralSubscriber>,
    ) -> SubscriptionId;

    async fn unsubscribe(&self, id: SubscriptionId);

    /// Drop all subscriptions; subsequent publishes are discarded.
    async fn close(&self);
}

// ── In-process implementation ───────────────────────────────────────────────

#[derive(Default)]
struct BusState {
    closed: bool,
    /// Room id → (subscription id, subscriber), in subscription order.
    rooms: HashMap<String, Vec<(SubscriptionId, Arc<dyn EphemeralSubscriber>)>>,
    /// Subscription id → room id, for unsubscribe.
    index: HashMap<SubscriptionId, String>,
}

/// In-process [`RealtimeBus`].
#[derive(Default)]
pub struct LocalBus {
    state: RwLock<BusState>,
    next_id: AtomicU64,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self, room_id: &str) -> Vec<(SubscriptionId, Arc<dyn EphemeralSubscriber>)> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        if state.closed {
            return Vec::new();
        }
        state.rooms.get(room_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl RealtimeBus for LocalBus {
    async fn publish(&self, room_id: &str, event: EphemeralEvent) {
        let subscribers = self.snapshot(room_id);
        if subscribers.is_empty() {
            return;
        }
        debug!(room = room_id, kind = ?event.kind, count = subscribers.len(), "publishing ephemeral event");
        for (id, subscriber) in subscribers {
            if let Err(e) = subscriber.on_event(&event).await {
                warn!(room = room_id, subscription = id, error = %e, "ephemeral subscriber failed");
            }
        }
    }

    async fn subscribe(
        &self,
        room_id: &str,
        subscriber: Arc<dyn EphemeralSubscriber>,
    ) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state
            .rooms
            .entry(room_id.to_string())
            .or_default()
            .push((id, subscriber));
        state.index.insert(id, room_id.to_string());
        id
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let Some(room_id) = state.index.remove(&id) else {
            return;
        };
        let emptied = match state.rooms.get_mut(&room_id) {
            Some(subscribers) => {
                subscribers.retain(|(sub_id, _)| *sub_id != id);
                subscribers.is_empty()
            },
            None => false,
        };
        if emptied {
            state.rooms.remove(&room_id);
        }
    }

    async fn close(&self) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.closed = true;
        state.rooms.clear();
        state.index.clear();
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<EphemeralKind>>,
    }

    #[async_trait]
    impl EphemeralSubscriber for Recorder {
        async fn on_event(&self, event: &EphemeralEvent) -> Result<()> {
            self.seen.lock().unwrap().push(event.kind);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EphemeralSubscriber for Failing {
        async fn on_event(&self, _event: &EphemeralEvent) -> Result<()> {
            anyhow::bail!("subscriber exploded")
        }
    }

    #[tokio::test]
    async fn subscribers_see_events_in_publish_order() {
        let bus = LocalBus::new();
        let recorder = Arc::new(Recorder::default());
        bus.subscribe("room_1", Arc::clone(&recorder) as Arc<dyn EphemeralSubscriber>)
            .await;

        bus.publish("room_1", EphemeralEvent::typing("room_1", true))
            .await;
        bus.publish(
            "room_1",
            EphemeralEvent::new("room_1", EphemeralKind::ReadReceipt),
        )
        .await;
        bus.publish("room_1", EphemeralEvent::typing("room_1", false))
            .await;

        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec![
                EphemeralKind::TypingStart,
                EphemeralKind::ReadReceipt,
                EphemeralKind::TypingStop
            ]
        );
    }

    #[tokio::test]
    async fn events_stay_in_their_room() {
        let bus = LocalBus::new();
        let recorder = Arc::new(Recorder::default());
        bus.subscribe("room_1", Arc::clone(&recorder) as Arc<dyn EphemeralSubscriber>)
            .await;

        bus.publish("room_2", EphemeralEvent::typing("room_2", true))
            .await;
        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = LocalBus::new();
        let recorder = Arc::new(Recorder::default());
        let id = bus
            .subscribe("room_1", Arc::clone(&recorder) as Arc<dyn EphemeralSubscriber>)
            .await;
        bus.unsubscribe(id).await;
        bus.publish("room_1", EphemeralEvent::typing("room_1", true))
            .await;
        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failing_subscriber_does_not_break_others() {
        let bus = LocalBus::new();
        bus.subscribe("room_1", Arc::new(Failing) as Arc<dyn EphemeralSubscriber>)
            .await;
        let recorder = Arc::new(Recorder::default());
        bus.subscribe("room_1", Arc::clone(&recorder) as Arc<dyn EphemeralSubscriber>)
            .await;

        bus.publish("room_1", EphemeralEvent::typing("room_1", true))
            .await;
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn closed_bus_drops_publishes() {
        let bus = LocalBus::new();
        let recorder = Arc::new(Recorder::default());
        bus.subscribe("room_1", Arc::clone(&recorder) as Arc<dyn EphemeralSubscriber>)
            .await;
        bus.close().await;
        bus.publish("room_1", EphemeralEvent::typing("room_1", true))
            .await;
        assert!(recorder.seen.lock().unwrap().is_empty());
    }
}
