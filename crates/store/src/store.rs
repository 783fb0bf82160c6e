//! The persistence trait every backend implements.

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

use switchboard_types::{
    ChannelAddress, ChannelBinding, EventStatus, Identity, Observation, Participant, Room,
    RoomEvent, RoomStatus, Task, TaskStatus,
};

use crate::Result;

/// Pagination window for event listings: events strictly before
/// `before_index` (newest first when `None`), at most `limit` of them,
/// returned in ascending index order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EventWindow {
    pub before_index: Option<u64>,
    pub limit: usize,
}

impl Default for EventWindow {
    fn default() -> Self {
        Self {
            before_index: None,
            limit: 100,
        }
    }
}

/// Persistence backend for all switchboard entities.
///
/// All methods are async-capable. Cross-room access is serialized by the
/// implementation; per-room write atomicity (index assignment, idempotency)
/// is guaranteed only when the caller holds that room's exclusive section.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Rooms ───────────────────────────────────────────────────────────

    async fn create_room(&self, room: Room) -> Result<Room>;

    async fn get_room(&self, room_id: &str) -> Result<Option<Room>>;

    /// Replace a room record. The store keeps its own authoritative
    /// `event_count`/`latest_index`; caller-supplied values are ignored.
    async fn update_room(&self, room: Room) -> Result<Room>;

    /// Bump a room's activity timestamp.
    async fn touch_room(&self, room_id: &str, now_ms: u64) -> Result<()>;

    async fn delete_room(&self, room_id: &str) -> Result<()>;

    async fn list_rooms(&self, status: Option<RoomStatus>) -> Result<Vec<Room>>;

    /// Room a channel is currently bound to, if any.
    async fn find_room_by_channel(&self, channel_id: &str) -> Result<Option<Room>>;

    /// Most recently active room.
    async fn find_latest_room(&self) -> Result<Option<Room>>;

    // ── Events ──────────────────────────────────────────────────────────

    /// Persist an event, assigning the room's next gap-free index and
    /// bumping its counters. Fails with
    /// [`crate::Error::DuplicateIdempotencyKey`] when the event carries a
    /// key already present in the room. Atomic only under the caller-held
    /// room section.
    async fn add_event(&self, event: RoomEvent) -> Result<RoomEvent>;

    async fn get_event(&self, event_id: &str) -> Result<Option<RoomEvent>>;

    async fn list_events(&self, room_id: &str, window: EventWindow) -> Result<Vec<RoomEvent>>;

    async fn event_count(&self, room_id: &str) -> Result<u64>;

    async fn find_event_by_idempotency_key(
        &self,
        room_id: &str,
        key: &str,
    ) -> Result<Option<RoomEvent>>;

    /// Update delivery status; `blocked_by` must name the blocker when the
    /// status is [`EventStatus::Blocked`].
    async fn update_event_status(
        &self,
        event_id: &str,
        status: EventStatus,
        blocked_by: Option<String>,
    ) -> Result<RoomEvent>;

    // ── Bindings ────────────────────────────────────────────────────────

    /// Attach a channel to a room. A channel id may be bound to at most one
    /// room at a time.
    async fn add_binding(&self, binding: ChannelBinding) -> Result<ChannelBinding>;

    async fn get_binding(&self, room_id: &str, channel_id: &str)
    -> Result<Option<ChannelBinding>>;

    async fn update_binding(&self, binding: ChannelBinding) -> Result<ChannelBinding>;

    async fn remove_binding(&self, room_id: &str, channel_id: &str) -> Result<()>;

    async fn list_bindings(&self, room_id: &str) -> Result<Vec<ChannelBinding>>;

    async fn find_binding_by_channel(&self, channel_id: &str) -> Result<Option<ChannelBinding>>;

    /// Binding matching a channel type + participant pair, for inbound
    /// routing when the concrete channel id is not bound yet.
    async fn find_binding_by_participant(
        &self,
        channel_type: &str,
        participant_id: &str,
    ) -> Result<Option<ChannelBinding>>;

    // ── Participants ────────────────────────────────────────────────────

    async fn add_participant(&self, participant: Participant) -> Result<Participant>;

    async fn get_participant(&self, participant_id: &str) -> Result<Option<Participant>>;

    async fn update_participant(&self, participant: Participant) -> Result<Participant>;

    async fn list_participants(&self, room_id: &str) -> Result<Vec<Participant>>;

    // ── Identities ──────────────────────────────────────────────────────

    async fn create_identity(&self, identity: Identity) -> Result<Identity>;

    async fn get_identity(&self, identity_id: &str) -> Result<Option<Identity>>;

    /// Identity reachable at the given channel-type + address pair.
    async fn resolve_address(&self, channel_type: &str, address: &str)
    -> Result<Option<Identity>>;

    async fn link_address(&self, identity_id: &str, address: ChannelAddress) -> Result<Identity>;

    // ── Tasks ───────────────────────────────────────────────────────────

    async fn add_task(&self, task: Task) -> Result<Task>;

    async fn list_tasks(&self, room_id: &str, status: Option<TaskStatus>) -> Result<Vec<Task>>;

    async fn update_task_status(&self, task_id: &str, status: TaskStatus) -> Result<Task>;

    // ── Observations ────────────────────────────────────────────────────

    async fn add_observation(&self, observation: Observation) -> Result<Observation>;

    async fn list_observations(&self, room_id: &str) -> Result<Vec<Observation>>;

    // ── Read tracking ───────────────────────────────────────────────────

    /// Advance a binding's read cursor (never moves backwards).
    async fn mark_read(&self, room_id: &str, channel_id: &str, up_to_index: u64) -> Result<()>;

    async fn mark_all_read(&self, room_id: &str, channel_id: &str) -> Result<()>;

    async fn unread_count(&self, room_id: &str, channel_id: &str) -> Result<u64>;
}
