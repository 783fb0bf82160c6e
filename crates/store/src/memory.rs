//! In-memory reference store.
//!
//! Backed by `HashMap`s behind a single mutex; no persistence. This is the
//! store the engine ships with for tests and embedded use — production
//! hosts bring their own [`Store`] implementation.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;

use {
    switchboard_common::now_ms,
    switchboard_types::{
        ChannelAddress, ChannelBinding, EventStatus, Identity, Observation, Participant, Room,
        RoomEvent, RoomStatus, Task, TaskStatus,
    },
};

use crate::{Error, EventWindow, Result, store::Store};

#[derive(Default)]
struct State {
    rooms: HashMap<String, Room>,
    events: HashMap<String, RoomEvent>,
    /// Room id → event ids in index order.
    room_events: HashMap<String, Vec<String>>,
    /// Room id → bindings in attach order.
    bindings: HashMap<String, Vec<ChannelBinding>>,
    /// Channel id → room id (channels bind to at most one room).
    channel_rooms: HashMap<String, String>,
    participants: HashMap<String, Participant>,
    identities: HashMap<String, Identity>,
    tasks: HashMap<String, Task>,
    observations: HashMap<String, Vec<Observation>>,
}

/// In-memory store backed by `HashMap`s.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Store for MemoryStore {
    // ── Rooms ───────────────────────────────────────────────────────────

    async fn create_room(&self, room: Room) -> Result<Room> {
        let mut state = self.lock();
        if state.rooms.contains_key(&room.id) {
            return Err(Error::conflict(format!("room {} already exists", room.id)));
        }
        state.rooms.insert(room.id.clone(), room.clone());
        Ok(room)
    }

    async fn get_room(&self, room_id: &str) -> Result<Option<Room>> {
        Ok(self.lock().rooms.get(room_id).cloned())
    }

    async fn update_room(&self, mut room: Room) -> Result<Room> {
        let mut state = self.lock();
        let existing = state
            .rooms
            .get(&room.id)
            .ok_or_else(|| Error::not_found("room", &room.id))?;
        // Counters are store-owned; keep the authoritative values.
        room.event_count = existing.event_count;
        room.latest_index = existing.latest_index;
        state.rooms.insert(room.id.clone(), room.clone());
        Ok(room)
    }

    async fn touch_room(&self, room_id: &str, now_ms: u64) -> Result<()> {
        let mut state = self.lock();
        let room = state
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| Error::not_found("room", room_id))?;
        room.updated_at_ms = room.updated_at_ms.max(now_ms);
        Ok(())
    }

    async fn delete_room(&self, room_id: &str) -> Result<()> {
        let mut state = self.lock();
        if state.rooms.remove(room_id).is_none() {
            return Err(Error::not_found("room", room_id));
        }
        if let Some(ids) = state.room_events.remove(room_id) {
            for id in ids {
                state.events.remove(&id);
            }
        }
        if let Some(bindings) = state.bindings.remove(room_id) {
            for binding in bindings {
                state.channel_rooms.remove(&binding.channel_id);
            }
        }
        state.participants.retain(|_, p| p.room_id != room_id);
        state.tasks.retain(|_, t| t.room_id != room_id);
        state.observations.remove(room_id);
        Ok(())
    }

    async fn list_rooms(&self, status: Option<RoomStatus>) -> Result<Vec<Room>> {
        let state = self.lock();
        let mut rooms: Vec<Room> = state
            .rooms
            .values()
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        rooms.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms).then(a.id.cmp(&b.id)));
        Ok(rooms)
    }

    async fn find_room_by_channel(&self, channel_id: &str) -> Result<Option<Room>> {
        let state = self.lock();
        Ok(state
            .channel_rooms
            .get(channel_id)
            .and_then(|room_id| state.rooms.get(room_id))
            .cloned())
    }

    async fn find_latest_room(&self) -> Result<Option<Room>> {
        let state = self.lock();
        Ok(state
            .rooms
            .values()
            .max_by_key(|r| (r.updated_at_ms, r.id.clone()))
            .cloned())
    }

    // ── Events ──────────────────────────────────────────────────────────

    async fn add_event(&self, mut event: RoomEvent) -> Result<RoomEvent> {
        let mut state = self.lock();
        if let Some(key) = &event.idempotency_key {
            let duplicate = state
                .room_events
                .get(&event.room_id)
                .into_iter()
                .flatten()
                .filter_map(|id| state.events.get(id))
                .any(|e| e.idempotency_key.as_deref() == Some(key.as_str()));
            if duplicate {
                return Err(Error::DuplicateIdempotencyKey {
                    room_id: event.room_id.clone(),
                    key: key.clone(),
                });
            }
        }
        let room = state
            .rooms
            .get_mut(&event.room_id)
            .ok_or_else(|| Error::not_found("room", &event.room_id))?;
        let index = room.next_index();
        event.index = index;
        room.latest_index = Some(index);
        room.event_count += 1;
        state
            .room_events
            .entry(event.room_id.clone())
            .or_default()
            .push(event.id.clone());
        state.events.insert(event.id.clone(), event.clone());
        Ok(event)
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<RoomEvent>> {
        Ok(self.lock().events.get(event_id).cloned())
    }

    async fn list_events(&self, room_id: &str, window: EventWindow) -> Result<Vec<RoomEvent>> {
        let state = self.lock();
        let events: Vec<RoomEvent> = state
            .room_events
            .get(room_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.events.get(id))
            .filter(|e| window.before_index.is_none_or(|before| e.index < before))
            .cloned()
            .collect();
        let start = events.len().saturating_sub(window.limit);
        Ok(events[start..].to_vec())
    }

    async fn event_count(&self, room_id: &str) -> Result<u64> {
        let state = self.lock();
        Ok(state
            .rooms
            .get(room_id)
            .map(|r| r.event_count)
            .unwrap_or_default())
    }

    async fn find_event_by_idempotency_key(
        &self,
        room_id: &str,
        key: &str,
    ) -> Result<Option<RoomEvent>> {
        let state = self.lock();
        Ok(state
            .room_events
            .get(room_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.events.get(id))
            .find(|e| e.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn update_event_status(
        &self,
        event_id: &str,
        status: EventStatus,
        blocked_by: Option<String>,
    ) -> Result<RoomEvent> {
        let mut state = self.lock();
        let event = state
            .events
            .get_mut(event_id)
            .ok_or_else(|| Error::not_found("event", event_id))?;
        event.status = status;
        event.blocked_by = blocked_by;
        Ok(event.clone())
    }

    // ── Bindings ────────────────────────────────────────────────────────

    async fn add_binding(&self, binding: ChannelBinding) -> Result<ChannelBinding> {
        let mut state = self.lock();
        if !state.rooms.contains_key(&binding.room_id) {
            return Err(Error::not_found("room", &binding.room_id));
        }
        if let Some(bound_room) = state.channel_rooms.get(&binding.channel_id) {
            return Err(Error::conflict(format!(
                "channel {} is already bound to room {bound_room}",
                binding.channel_id
            )));
        }
        state
            .channel_rooms
            .insert(binding.channel_id.clone(), binding.room_id.clone());
        state
            .bindings
            .entry(binding.room_id.clone())
            .or_default()
            .push(binding.clone());
        Ok(binding)
    }

    async fn get_binding(
        &self,
        room_id: &str,
        channel_id: &str,
    ) -> Result<Option<ChannelBinding>> {
        let state = self.lock();
        Ok(state
            .bindings
            .get(room_id)
            .into_iter()
            .flatten()
            .find(|b| b.channel_id == channel_id)
            .cloned())
    }

    async fn update_binding(&self, binding: ChannelBinding) -> Result<ChannelBinding> {
        let mut state = self.lock();
        let slot = state
            .bindings
            .get_mut(&binding.room_id)
            .into_iter()
            .flatten()
            .find(|b| b.channel_id == binding.channel_id)
            .ok_or_else(|| Error::not_found("binding", &binding.channel_id))?;
        *slot = binding.clone();
        Ok(binding)
    }

    async fn remove_binding(&self, room_id: &str, channel_id: &str) -> Result<()> {
        let mut state = self.lock();
        let bindings = state
            .bindings
            .get_mut(room_id)
            .ok_or_else(|| Error::not_found("binding", channel_id))?;
        let before = bindings.len();
        bindings.retain(|b| b.channel_id != channel_id);
        if bindings.len() == before {
            return Err(Error::not_found("binding", channel_id));
        }
        state.channel_rooms.remove(channel_id);
        Ok(())
    }

    async fn list_bindings(&self, room_id: &str) -> Result<Vec<ChannelBinding>> {
        Ok(self.lock().bindings.get(room_id).cloned().unwrap_or_default())
    }

    async fn find_binding_by_channel(&self, channel_id: &str) -> Result<Option<ChannelBinding>> {
        let state = self.lock();
        let Some(room_id) = state.channel_rooms.get(channel_id) else {
            return Ok(None);
        };
        Ok(state
            .bindings
            .get(room_id)
            .into_iter()
            .flatten()
            .find(|b| b.channel_id == channel_id)
            .cloned())
    }

    async fn find_binding_by_participant(
        &self,
        channel_type: &str,
        participant_id: &str,
    ) -> Result<Option<ChannelBinding>> {
        let state = self.lock();
        Ok(state
            .bindings
            .values()
            .flatten()
            .find(|b| {
                b.channel_type == channel_type
                    && b.participant_id.as_deref() == Some(participant_id)
            })
            .cloned())
    }

    // ── Participants ────────────────────────────────────────────────────

    async fn add_participant(&self, participant: Participant) -> Result<Participant> {
        let mut state = self.lock();
        if !state.rooms.contains_key(&participant.room_id) {
            return Err(Error::not_found("room", &participant.room_id));
        }
        state
            .participants
            .insert(participant.id.clone(), participant.clone());
        Ok(participant)
    }

    async fn get_participant(&self, participant_id: &str) -> Result<Option<Participant>> {
        Ok(self.lock().participants.get(participant_id).cloned())
    }

    async fn update_participant(&self, participant: Participant) -> Result<Participant> {
        let mut state = self.lock();
        if !state.participants.contains_key(&participant.id) {
            return Err(Error::not_found("participant", &participant.id));
        }
        state
            .participants
            .insert(participant.id.clone(), participant.clone());
        Ok(participant)
    }

    async fn list_participants(&self, room_id: &str) -> Result<Vec<Participant>> {
        let state = self.lock();
        let mut participants: Vec<Participant> = state
            .participants
            .values()
            .filter(|p| p.room_id == room_id)
            .cloned()
            .collect();
        participants.sort_by(|a, b| a.joined_at_ms.cmp(&b.joined_at_ms).then(a.id.cmp(&b.id)));
        Ok(participants)
    }

    // ── Identities ──────────────────────────────────────────────────────

    async fn create_identity(&self, identity: Identity) -> Result<Identity> {
        let mut state = self.lock();
        state
            .identities
            .insert(identity.id.clone(), identity.clone());
        Ok(identity)
    }

    async fn get_identity(&self, identity_id: &str) -> Result<Option<Identity>> {
        Ok(self.lock().identities.get(identity_id).cloned())
    }

    async fn resolve_address(
        &self,
        channel_type: &str,
        address: &str,
    ) -> Result<Option<Identity>> {
        let state = self.lock();
        Ok(state
            .identities
            .values()
            .find(|i| i.has_address(channel_type, address))
            .cloned())
    }

    async fn link_address(&self, identity_id: &str, address: ChannelAddress) -> Result<Identity> {
        let mut state = self.lock();
        let identity = state
            .identities
            .get_mut(identity_id)
            .ok_or_else(|| Error::not_found("identity", identity_id))?;
        if !identity.has_address(&address.channel_type, &address.address) {
            identity.channel_addresses.push(address);
            identity.updated_at_ms = now_ms();
        }
        Ok(identity.clone())
    }

    // ── Tasks ───────────────────────────────────────────────────────────

    async fn add_task(&self, task: Task) -> Result<Task> {
        let mut state = self.lock();
        state.tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn list_tasks(&self, room_id: &str, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        let state = self.lock();
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.room_id == room_id && status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms).then(a.id.cmp(&b.id)));
        Ok(tasks)
    }

    async fn update_task_status(&self, task_id: &str, status: TaskStatus) -> Result<Task> {
        let mut state = self.lock();
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| Error::not_found("task", task_id))?;
        task.status = status;
        task.updated_at_ms = now_ms();
        Ok(task.clone())
    }

    // ── Observations ────────────────────────────────────────────────────

    async fn add_observation(&self, observation: Observation) -> Result<Observation> {
        let mut state = self.lock();
        state
            .observations
            .entry(observation.room_id.clone())
            .or_default()
            .push(observation.clone());
        Ok(observation)
    }

    async fn list_observations(&self, room_id: &str) -> Result<Vec<Observation>> {
        Ok(self
            .lock()
            .observations
            .get(room_id)
            .cloned()
            .unwrap_or_default())
    }

    // ── Read tracking ───────────────────────────────────────────────────

    async fn mark_read(&self, room_id: &str, channel_id: &str, up_to_index: u64) -> Result<()> {
        let mut state = self.lock();
        let binding = state
            .bindings
            .get_mut(room_id)
            .into_iter()
            .flatten()
            .find(|b| b.channel_id == channel_id)
            .ok_or_else(|| Error::not_found("binding", channel_id))?;
        binding.last_read_index = Some(
            binding
                .last_read_index
                .map_or(up_to_index, |cur| cur.max(up_to_index)),
        );
        Ok(())
    }

    async fn mark_all_read(&self, room_id: &str, channel_id: &str) -> Result<()> {
        let latest = {
            let state = self.lock();
            state.rooms.get(room_id).and_then(|r| r.latest_index)
        };
        match latest {
            Some(index) => self.mark_read(room_id, channel_id, index).await,
            None => Ok(()),
        }
    }

    async fn unread_count(&self, room_id: &str, channel_id: &str) -> Result<u64> {
        let state = self.lock();
        let binding = state
            .bindings
            .get(room_id)
            .into_iter()
            .flatten()
            .find(|b| b.channel_id == channel_id)
            .ok_or_else(|| Error::not_found("binding", channel_id))?;
        let count = state.rooms.get(room_id).map(|r| r.event_count).unwrap_or(0);
        Ok(match binding.last_read_index {
            // Indices are gap-free from 0, so everything past the cursor is
            // exactly count - cursor - 1 events.
            Some(cursor) => count.saturating_sub(cursor + 1),
            None => count,
        })
    }
}
