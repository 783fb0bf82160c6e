//! Engine facade: construction, registration, and room management.
//!
//! The inbound pipeline lives in `pipeline.rs`; the event router in
//! `broadcast.rs`.

use std::sync::Arc;

use {
    dashmap::DashMap,
    serde_json::json,
    tokio::sync::Semaphore,
    tracing::{info, warn},
};

use {
    switchboard_channels::{Channel, ChannelRegistry},
    switchboard_common::now_ms,
    switchboard_hooks::{HookContext, HookEngine, HookError, HookTrigger},
    switchboard_identity::{IdentityPipeline, IdentityResolver},
    switchboard_realtime::{EphemeralEvent, EphemeralKind, LocalBus, RealtimeBus},
    switchboard_resilience::{CircuitBreaker, RateLimiter},
    switchboard_routing::{InboundRouter, StoreRouter},
    switchboard_store::Store,
    switchboard_types::{ChannelBinding, Room, RoomEvent, RoomStatus},
};

use crate::{
    EngineConfig, EngineError, Result,
    events::{FrameworkEvent, FrameworkEvents, names},
    locks::RoomLocks,
};

/// The conversation orchestrator.
///
/// One instance per host process. All state shared across pipelines
/// (breakers, limiters, locks, registries) lives here; per-room persistent
/// state lives behind the [`Store`].
pub struct Switchboard {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) channels: ChannelRegistry,
    pub(crate) hooks: Arc<HookEngine>,
    pub(crate) identity: IdentityPipeline,
    pub(crate) router: Arc<dyn InboundRouter>,
    pub(crate) bus: Arc<dyn RealtimeBus>,
    pub(crate) events: FrameworkEvents,
    pub(crate) locks: RoomLocks,
    pub(crate) breakers: DashMap<String, Arc<CircuitBreaker>>,
    pub(crate) limiters: DashMap<String, Arc<RateLimiter>>,
    pub(crate) pipeline_gate: Option<Arc<Semaphore>>,
    pub(crate) config: EngineConfig,
}

/// Builder for [`Switchboard`]. Only the store is required; the router
/// defaults to [`StoreRouter`], the realtime bus to the in-process
/// [`LocalBus`], and identity to disabled.
pub struct SwitchboardBuilder {
    store: Arc<dyn Store>,
    config: EngineConfig,
    router: Option<Arc<dyn InboundRouter>>,
    bus: Option<Arc<dyn RealtimeBus>>,
    resolver: Option<Arc<dyn IdentityResolver>>,
}

impl SwitchboardBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn router(mut self, router: Arc<dyn InboundRouter>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn realtime_bus(mut self, bus: Arc<dyn RealtimeBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn identity_resolver(mut self, resolver: Arc<dyn IdentityResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn build(self) -> Switchboard {
        let config = self.config;
        let identity = match self.resolver {
            Some(resolver) => {
                let mut pipeline =
                    IdentityPipeline::new(resolver).with_timeout(config.identity_timeout());
                if let Some(types) = &config.identity_channel_types {
                    pipeline = pipeline.with_allowed_channel_types(types.iter().cloned());
                }
                pipeline
            },
            None => IdentityPipeline::disabled(),
        };
        Switchboard {
            router: self
                .router
                .unwrap_or_else(|| Arc::new(StoreRouter::new(Arc::clone(&self.store)))),
            bus: self.bus.unwrap_or_else(|| Arc::new(LocalBus::new())),
            channels: ChannelRegistry::new(),
            hooks: Arc::new(HookEngine::new()),
            identity,
            events: FrameworkEvents::new(config.framework_handler_timeout()),
            locks: RoomLocks::new(config.lock_capacity),
            breakers: DashMap::new(),
            limiters: DashMap::new(),
            pipeline_gate: config
                .max_concurrent_pipelines
                .map(|n| Arc::new(Semaphore::new(n))),
            store: self.store,
            config,
        }
    }
}

impl Switchboard {
    pub fn builder(store: Arc<dyn Store>) -> SwitchboardBuilder {
        SwitchboardBuilder {
            store,
            config: EngineConfig::default(),
            router: None,
            bus: None,
            resolver: None,
        }
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn hooks(&self) -> &HookEngine {
        &self.hooks
    }

    pub fn identity(&self) -> &IdentityPipeline {
        &self.identity
    }

    pub fn events(&self) -> &FrameworkEvents {
        &self.events
    }

    pub fn realtime(&self) -> &Arc<dyn RealtimeBus> {
        &self.bus
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Channel registry ────────────────────────────────────────────────

    /// Register a channel adapter; a replaced adapter is closed.
    pub async fn register_channel(&self, channel: Arc<dyn Channel>) {
        if let Some(previous) = self.channels.register(channel)
            && let Err(e) = previous.close().await
        {
            warn!(error = %e, "failed to close replaced channel adapter");
        }
    }

    /// Remove an adapter, dropping its breaker/limiter state and closing it.
    pub async fn unregister_channel(&self, channel_id: &str) {
        if let Some(channel) = self.channels.remove(channel_id) {
            self.reset_channel_state(channel_id);
            if let Err(e) = channel.close().await {
                warn!(channel = channel_id, error = %e, "failed to close channel adapter");
            }
        }
    }

    // ── Rooms ───────────────────────────────────────────────────────────

    pub async fn create_room(&self, room: Room) -> Result<Room> {
        let room = self.store.create_room(room).await?;
        info!(room = %room.id, "room created");
        self.events
            .emit(FrameworkEvent::new(names::ROOM_CREATED).in_room(&room.id));
        self.dispatch_lifecycle(HookTrigger::RoomCreated, &room).await;
        Ok(room)
    }

    pub async fn close_room(&self, room_id: &str) -> Result<Room> {
        let section = self.locks.acquire(room_id).await;
        let mut room = self
            .store
            .get_room(room_id)
            .await?
            .ok_or_else(|| switchboard_store::Error::not_found("room", room_id))
            .map_err(EngineError::Store)?;
        let already_closed = room.status == RoomStatus::Closed;
        if !already_closed {
            let now = now_ms();
            room.status = RoomStatus::Closed;
            room.closed_at_ms = Some(now);
            room.updated_at_ms = now;
            room = self.store.update_room(room).await?;
        }
        drop(section);

        if !already_closed {
            info!(room = room_id, "room closed");
            self.events
                .emit(FrameworkEvent::new(names::ROOM_CLOSED).in_room(room_id));
            self.dispatch_lifecycle(HookTrigger::RoomClosed, &room).await;
        }
        Ok(room)
    }

    /// Apply idle timers to open rooms. Invoked by an external ticker, never
    /// by the pipeline itself. Returns the transitions applied.
    pub async fn sweep_timers(&self, now_ms: u64) -> Result<Vec<(String, RoomStatus)>> {
        let mut candidates = self.store.list_rooms(Some(RoomStatus::Active)).await?;
        candidates.extend(self.store.list_rooms(Some(RoomStatus::Paused)).await?);

        let mut transitions = Vec::new();
        for stale in candidates {
            if stale.desired_status(now_ms).is_none() {
                continue;
            }
            let section = self.locks.acquire(&stale.id).await;
            // Re-read under the section: activity may have arrived while we
            // were waiting.
            let Some(mut room) = self.store.get_room(&stale.id).await? else {
                continue;
            };
            let Some(next) = room.desired_status(now_ms) else {
                continue;
            };
            room.status = next;
            if next == RoomStatus::Closed {
                room.closed_at_ms = Some(now_ms);
            }
            let room = self.store.update_room(room).await?;
            drop(section);

            info!(room = %room.id, status = %next, "room timer transition");
            transitions.push((room.id.clone(), next));
            if next == RoomStatus::Closed {
                self.events
                    .emit(FrameworkEvent::new(names::ROOM_CLOSED).in_room(&room.id));
                self.dispatch_lifecycle(HookTrigger::RoomClosed, &room).await;
            }
        }
        Ok(transitions)
    }

    // ── Bindings ────────────────────────────────────────────────────────

    pub async fn attach_channel(&self, binding: ChannelBinding) -> Result<ChannelBinding> {
        let section = self.locks.acquire(&binding.room_id).await;
        let binding = self.store.add_binding(binding).await?;
        drop(section);
        info!(
            room = %binding.room_id,
            channel = %binding.channel_id,
            category = ?binding.category,
            "channel attached"
        );
        Ok(binding)
    }

    pub async fn detach_channel(&self, room_id: &str, channel_id: &str) -> Result<()> {
        let section = self.locks.acquire(room_id).await;
        self.store.remove_binding(room_id, channel_id).await?;
        drop(section);
        self.reset_channel_state(channel_id);
        info!(room = room_id, channel = channel_id, "channel detached");
        Ok(())
    }

    // ── Read tracking & ephemeral ───────────────────────────────────────

    /// Advance a binding's read cursor and publish a read receipt on the
    /// realtime bus.
    pub async fn mark_read(&self, room_id: &str, channel_id: &str, up_to_index: u64) -> Result<()> {
        self.store.mark_read(room_id, channel_id, up_to_index).await?;
        self.bus
            .publish(
                room_id,
                EphemeralEvent::new(room_id, EphemeralKind::ReadReceipt)
                    .with_channel(channel_id)
                    .with_data(json!({ "up_to_index": up_to_index })),
            )
            .await;
        Ok(())
    }

    pub async fn publish_typing(&self, room_id: &str, channel_id: &str, started: bool) {
        self.bus
            .publish(
                room_id,
                EphemeralEvent::typing(room_id, started).with_channel(channel_id),
            )
            .await;
    }

    pub async fn publish_ephemeral(&self, event: EphemeralEvent) {
        let room_id = event.room_id.clone();
        self.bus.publish(&room_id, event).await;
    }

    // ── Shared internals ────────────────────────────────────────────────

    pub(crate) fn breaker_for(&self, channel_id: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(channel_id.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config.breaker)))
            .clone()
    }

    pub(crate) fn limiter_for(&self, binding: &ChannelBinding) -> Arc<RateLimiter> {
        self.limiters
            .entry(binding.channel_id.clone())
            .or_insert_with(|| {
                Arc::new(match &binding.rate_limit {
                    Some(config) => RateLimiter::new(config),
                    None => RateLimiter::unlimited(),
                })
            })
            .clone()
    }

    pub(crate) fn reset_channel_state(&self, channel_id: &str) {
        self.breakers.remove(channel_id);
        self.limiters.remove(channel_id);
    }

    /// Surface captured hook errors on the framework stream.
    pub(crate) fn note_hook_errors(&self, errors: &[HookError], room_id: &str) {
        for err in errors {
            self.events.emit(
                FrameworkEvent::new(names::HOOK_ERROR)
                    .in_room(room_id)
                    .with_data(json!({
                        "hook": err.hook,
                        "stage": err.stage,
                        "message": err.message,
                    })),
            );
        }
    }

    /// Fire room lifecycle hooks (async, side-effect only).
    async fn dispatch_lifecycle(&self, trigger: HookTrigger, room: &Room) {
        let event = RoomEvent::system(&room.id, &trigger.to_string(), None);
        let ctx = HookContext {
            room: room.clone(),
            trigger,
        };
        let errors = self.hooks.dispatch_async(trigger, &event, &ctx).await;
        self.note_hook_errors(&errors, &room.id);
    }
}
