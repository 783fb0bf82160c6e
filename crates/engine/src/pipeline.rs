//! The inbound pipeline: route → canonicalize → identity → serialized room
//! section (idempotency, sync hooks, persist, broadcast, reentry drain,
//! side effects, async hooks).

use std::{collections::VecDeque, sync::Arc};

use {
    serde_json::json,
    tracing::{debug, info, warn},
};

use {
    switchboard_channels::{Channel, InboundMessage, RoomContext},
    switchboard_common::now_ms,
    switchboard_hooks::{HookContext, HookError, HookTrigger, InjectedEvent},
    switchboard_identity::IdentityOutcome,
    switchboard_routing::{InboundRouter, RouteOutcome},
    switchboard_store::Store,
    switchboard_types::{
        ChannelBinding, EventSource, EventStatus, EventType, Observation, Room, RoomEvent, Task,
        Visibility,
    },
};

use crate::{
    CHAIN_DEPTH_BLOCKER, EngineError, ProcessOutcome, Result, Switchboard,
    events::{FrameworkEvent, names},
    outcome::DeliveryResult,
};

/// Tasks and observations accumulated across one pipeline run, persisted
/// after the reentry drain completes.
#[derive(Default)]
struct SideEffects {
    tasks: Vec<Task>,
    observations: Vec<Observation>,
}

impl SideEffects {
    fn absorb_payloads(
        &mut self,
        room_id: &str,
        source: Option<&str>,
        tasks: Vec<serde_json::Value>,
        observations: Vec<serde_json::Value>,
    ) {
        for payload in tasks {
            let mut task = Task::new(room_id, payload);
            if let Some(source) = source {
                task = task.with_source(source);
            }
            self.tasks.push(task);
        }
        for payload in observations {
            let mut observation = Observation::new(room_id, payload);
            if let Some(source) = source {
                observation = observation.with_source(source);
            }
            self.observations.push(observation);
        }
    }

    fn absorb_run(&mut self, run: &mut crate::broadcast::BroadcastRun) {
        self.tasks.append(&mut run.tasks);
        self.observations.append(&mut run.observations);
    }
}

/// Build a reentry draft from a hook injection, one generation below the
/// event being processed.
fn injected_draft(parent: &RoomEvent, injected: InjectedEvent) -> RoomEvent {
    let mut draft = RoomEvent::new(
        &parent.room_id,
        injected.event_type,
        EventSource::internal("hooks"),
        injected.content,
    )
    .child_of(parent);
    if let Some(visibility) = injected.visibility {
        draft.visibility = visibility;
    }
    draft.metadata = injected.metadata;
    draft
}

impl Switchboard {
    /// Process one external message end to end.
    ///
    /// Returns a structured outcome so callers can decide whether to ack
    /// the source webhook: blocked events and per-target delivery failures
    /// are normal outcomes, while routing, access, store, and timeout
    /// problems surface as [`EngineError`].
    pub async fn process_inbound(&self, inbound: InboundMessage) -> Result<ProcessOutcome> {
        let _permit = match &self.pipeline_gate {
            Some(gate) => Arc::clone(gate).acquire_owned().await.ok(),
            None => None,
        };

        let channel = self.channels.get(&inbound.channel_id).ok_or_else(|| {
            EngineError::UnknownChannel {
                channel_id: inbound.channel_id.clone(),
            }
        })?;

        let room = self.resolve_room(&inbound, &channel).await?;
        if !room.status.accepts_inbound() {
            return Err(EngineError::RoomClosed {
                room_id: room.id,
                status: room.status,
            });
        }

        // A read-only source must never originate a persisted event.
        if let Some(binding) = self.store.get_binding(&room.id, &inbound.channel_id).await?
            && !binding.access.can_write()
        {
            return Err(EngineError::WriteAccessDenied {
                room_id: room.id,
                channel_id: inbound.channel_id,
            });
        }

        let ctx = RoomContext { room: room.clone() };
        let mut event = channel
            .handle_inbound(&inbound, &ctx)
            .await
            .map_err(EngineError::Channel)?;
        event.room_id = room.id.clone();
        event.chain_depth = 0;

        // Identity runs before the section is taken.
        let identity = self.identity.run(&event, &room).await;
        if let Some(outcome) = &identity
            && outcome.timed_out
        {
            self.events.emit(
                FrameworkEvent::new(names::IDENTITY_TIMEOUT)
                    .in_room(&room.id)
                    .on_channel(&event.source.channel_id),
            );
        }

        // Everything from lock acquisition to the room touch shares one
        // budget; dropping the timed-out future releases the section.
        let room_id = room.id.clone();
        match tokio::time::timeout(
            self.config.process_timeout(),
            self.run_section(room, event, identity),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(room = %room_id, "pipeline exceeded its processing budget");
                self.events
                    .emit(FrameworkEvent::new(names::PROCESS_TIMEOUT).in_room(&room_id));
                Err(EngineError::ProcessTimeout {
                    room_id,
                    timeout_ms: self.config.process_timeout_ms,
                })
            },
        }
    }

    /// Resolve the target room, materializing one (with the source binding
    /// attached) when routing asks for it and config allows.
    async fn resolve_room(
        &self,
        inbound: &InboundMessage,
        channel: &Arc<dyn Channel>,
    ) -> Result<Room> {
        let route = self
            .router
            .route(
                &inbound.channel_id,
                &inbound.channel_type,
                inbound.participant_id.as_deref(),
            )
            .await?;
        match route {
            RouteOutcome::Existing(room_id) => {
                let room = self.store.get_room(&room_id).await?.ok_or_else(|| {
                    EngineError::Store(switchboard_store::Error::not_found("room", &room_id))
                })?;
                Ok(room)
            },
            RouteOutcome::CreateNew => {
                if !self.config.auto_create_rooms {
                    return Err(EngineError::RoutingFailed {
                        channel_id: inbound.channel_id.clone(),
                    });
                }
                let room = self.create_room(Room::new()).await?;
                let descriptor = channel.descriptor();
                let mut binding = ChannelBinding::new(
                    &room.id,
                    &descriptor.channel_id,
                    &descriptor.channel_type,
                    descriptor.category,
                )
                .with_direction(descriptor.direction)
                .with_capabilities(descriptor.capabilities.clone());
                if let Some(participant) = &inbound.participant_id {
                    binding = binding.with_participant(participant);
                }
                self.store.add_binding(binding).await?;
                debug!(
                    room = %room.id,
                    channel = %descriptor.channel_id,
                    "auto-created room and attached source channel"
                );
                Ok(room)
            },
        }
    }

    async fn run_section(
        &self,
        room: Room,
        event: RoomEvent,
        identity: Option<IdentityOutcome>,
    ) -> Result<ProcessOutcome> {
        let section = self.locks.acquire(&room.id).await;
        let result = self.run_locked(room, event, identity).await;
        drop(section);
        result
    }

    async fn run_locked(
        &self,
        room: Room,
        mut event: RoomEvent,
        identity: Option<IdentityOutcome>,
    ) -> Result<ProcessOutcome> {
        // Re-read now that we hold the section: counters and status are
        // only stable inside it.
        let Some(room) = self.store.get_room(&room.id).await? else {
            return Err(EngineError::Store(switchboard_store::Error::not_found(
                "room", &room.id,
            )));
        };
        if !room.status.accepts_inbound() {
            return Err(EngineError::RoomClosed {
                room_id: room.id.clone(),
                status: room.status,
            });
        }

        let mut hook_errors: Vec<HookError> = Vec::new();
        if let Some(outcome) = &identity {
            self.note_hook_errors(&outcome.errors, &room.id);
            hook_errors.extend(outcome.errors.iter().cloned());
        }

        // Idempotent replay: hand back the stored event, no new write, no
        // broadcast. Blocked duplicates replay the same way.
        if let Some(key) = &event.idempotency_key
            && let Some(prior) = self.store.find_event_by_idempotency_key(&room.id, key).await?
        {
            debug!(room = %room.id, key = %key, "idempotency hit, returning prior event");
            let mut outcome = ProcessOutcome::deduplicated(prior);
            outcome.hook_errors = hook_errors;
            return Ok(outcome);
        }

        let mut side = SideEffects::default();
        let mut queue: VecDeque<RoomEvent> = VecDeque::new();
        let mut delivery_results: Vec<DeliveryResult> = Vec::new();

        // Identity verdicts (reject / challenge) persist the event blocked.
        if let Some(outcome) = identity
            && let Some(block) = outcome.block
        {
            event.status = EventStatus::Blocked;
            event.blocked_by = Some(block.by.clone());
            event.index = room.next_index();
            let stored = self.store.add_event(event).await?;
            self.emit_blocked(&stored);

            if let Some(content) = outcome.challenge {
                // The verification request goes back to the sender only.
                let challenge = RoomEvent::new(
                    &room.id,
                    EventType::Message,
                    EventSource::internal(&block.by),
                    content,
                )
                .with_visibility(Visibility::channels([stored.source.channel_id.clone()]))
                .child_of(&stored);
                self.enqueue_reentry(&room, challenge, &mut queue, &mut side)
                    .await?;
            }
            delivery_results
                .extend(self.drain_reentry(&room, &mut queue, &mut side, &mut hook_errors).await?);
            self.persist_side_effects(side).await?;
            hook_errors.extend(self.run_after_hooks(&room, &stored).await);
            self.store.touch_room(&room.id, now_ms()).await?;
            return Ok(ProcessOutcome {
                event: Some(stored),
                deduplicated: false,
                blocked: true,
                blocked_reason: Some(block.reason),
                hook_errors,
                delivery_results,
            });
        }

        // Provisional index so hooks observe the slot the event will take;
        // the store assigns the same value at persist time.
        event.index = room.next_index();

        let hook_ctx = HookContext {
            room: room.clone(),
            trigger: HookTrigger::BeforeBroadcast,
        };
        let dispatch = self
            .hooks
            .dispatch_sync(HookTrigger::BeforeBroadcast, event, &hook_ctx)
            .await;
        self.note_hook_errors(&dispatch.errors, &room.id);
        hook_errors.extend(dispatch.errors);
        side.absorb_payloads(&room.id, None, dispatch.tasks, dispatch.observations);
        let mut event = dispatch.event;

        if let Some(blocked) = dispatch.blocked {
            event.status = EventStatus::Blocked;
            event.blocked_by = Some(blocked.by.clone());
            let stored = self.store.add_event(event).await?;
            self.emit_blocked(&stored);

            // Injections flow out even on block.
            for injected in dispatch.events {
                let draft = injected_draft(&stored, injected);
                self.enqueue_reentry(&room, draft, &mut queue, &mut side).await?;
            }
            delivery_results
                .extend(self.drain_reentry(&room, &mut queue, &mut side, &mut hook_errors).await?);
            self.persist_side_effects(side).await?;
            hook_errors.extend(self.run_after_hooks(&room, &stored).await);
            self.store.touch_room(&room.id, now_ms()).await?;
            return Ok(ProcessOutcome {
                event: Some(stored),
                deduplicated: false,
                blocked: true,
                blocked_reason: Some(blocked.reason),
                hook_errors,
                delivery_results,
            });
        }

        event.status = EventStatus::Delivered;
        let stored = self.store.add_event(event).await?;
        info!(room = %room.id, event = %stored.id, index = stored.index, "event persisted");

        let mut run = self.broadcast(&room, &stored).await?;
        side.absorb_run(&mut run);
        delivery_results.extend(run.results);

        for injected in dispatch.events {
            let draft = injected_draft(&stored, injected);
            self.enqueue_reentry(&room, draft, &mut queue, &mut side).await?;
        }
        for draft in run.reentry {
            self.enqueue_reentry(&room, draft, &mut queue, &mut side).await?;
        }
        delivery_results
            .extend(self.drain_reentry(&room, &mut queue, &mut side, &mut hook_errors).await?);

        self.persist_side_effects(side).await?;
        hook_errors.extend(self.run_after_hooks(&room, &stored).await);
        self.store.touch_room(&room.id, now_ms()).await?;

        Ok(ProcessOutcome {
            event: Some(stored),
            deduplicated: false,
            blocked: false,
            blocked_reason: None,
            hook_errors,
            delivery_results,
        })
    }

    /// Apply chain-depth policy to a reentry draft: enqueue it, or persist
    /// it blocked with a paired observation.
    async fn enqueue_reentry(
        &self,
        room: &Room,
        draft: RoomEvent,
        queue: &mut VecDeque<RoomEvent>,
        side: &mut SideEffects,
    ) -> Result<()> {
        if draft.chain_depth > self.config.max_chain_depth {
            let mut blocked = draft;
            blocked.status = EventStatus::Blocked;
            blocked.blocked_by = Some(CHAIN_DEPTH_BLOCKER.to_string());
            let stored = self.store.add_event(blocked).await?;
            warn!(
                room = %room.id,
                event = %stored.id,
                depth = stored.chain_depth,
                "reentry past chain depth limit, blocked"
            );
            self.events.emit(
                FrameworkEvent::new(names::CHAIN_DEPTH_EXCEEDED)
                    .in_room(&room.id)
                    .on_channel(&stored.source.channel_id)
                    .with_data(json!({
                        "event_id": stored.id,
                        "chain_depth": stored.chain_depth,
                    })),
            );
            side.observations.push(
                Observation::new(
                    &room.id,
                    json!({
                        "kind": "chain_depth_exceeded",
                        "event_id": stored.id,
                        "parent_event_id": stored.parent_event_id,
                        "chain_depth": stored.chain_depth,
                    }),
                )
                .with_source(&stored.source.channel_id),
            );
            return Ok(());
        }
        queue.push_back(draft);
        Ok(())
    }

    /// FIFO drain of reentry events inside the section: persist, run sync
    /// hooks, broadcast, enqueue grandchildren. Depth is tracked per event,
    /// so parallel fan-outs from one intelligence channel share a depth.
    async fn drain_reentry(
        &self,
        room: &Room,
        queue: &mut VecDeque<RoomEvent>,
        side: &mut SideEffects,
        hook_errors: &mut Vec<HookError>,
    ) -> Result<Vec<DeliveryResult>> {
        let mut results = Vec::new();
        while let Some(mut draft) = queue.pop_front() {
            draft.status = EventStatus::Delivered;
            let stored = self.store.add_event(draft).await?;
            debug!(
                room = %room.id,
                event = %stored.id,
                index = stored.index,
                depth = stored.chain_depth,
                "reentry event persisted"
            );

            let ctx = HookContext {
                room: room.clone(),
                trigger: HookTrigger::BeforeBroadcast,
            };
            let dispatch = self
                .hooks
                .dispatch_sync(HookTrigger::BeforeBroadcast, stored, &ctx)
                .await;
            self.note_hook_errors(&dispatch.errors, &room.id);
            hook_errors.extend(dispatch.errors);
            side.absorb_payloads(&room.id, None, dispatch.tasks, dispatch.observations);
            for injected in dispatch.events {
                let draft = injected_draft(&dispatch.event, injected);
                self.enqueue_reentry(room, draft, queue, side).await?;
            }

            if let Some(blocked) = dispatch.blocked {
                let updated = self
                    .store
                    .update_event_status(
                        &dispatch.event.id,
                        EventStatus::Blocked,
                        Some(blocked.by.clone()),
                    )
                    .await?;
                self.emit_blocked(&updated);
                continue;
            }

            // Hook modifications affect what targets see; the stored record
            // keeps the persisted payload.
            let mut run = self.broadcast(room, &dispatch.event).await?;
            side.absorb_run(&mut run);
            results.extend(run.results);
            for draft in run.reentry {
                self.enqueue_reentry(room, draft, queue, side).await?;
            }
        }
        Ok(results)
    }

    async fn run_after_hooks(&self, room: &Room, event: &RoomEvent) -> Vec<HookError> {
        let ctx = HookContext {
            room: room.clone(),
            trigger: HookTrigger::AfterBroadcast,
        };
        let errors = self
            .hooks
            .dispatch_async(HookTrigger::AfterBroadcast, event, &ctx)
            .await;
        self.note_hook_errors(&errors, &room.id);
        errors
    }

    async fn persist_side_effects(&self, side: SideEffects) -> Result<()> {
        for task in side.tasks {
            let task = self.store.add_task(task).await?;
            debug!(task = %task.id, room = %task.room_id, "task persisted");
        }
        for observation in side.observations {
            self.store.add_observation(observation).await?;
        }
        Ok(())
    }

    fn emit_blocked(&self, event: &RoomEvent) {
        info!(
            room = %event.room_id,
            event = %event.id,
            by = event.blocked_by.as_deref().unwrap_or_default(),
            "event blocked"
        );
        self.events.emit(
            FrameworkEvent::new(names::EVENT_BLOCKED)
                .in_room(&event.room_id)
                .on_channel(&event.source.channel_id)
                .with_data(json!({
                    "event_id": event.id,
                    "blocked_by": event.blocked_by,
                })),
        );
        #[cfg(feature = "metrics")]
        metrics::counter!("switchboard_events_blocked_total").increment(1);
    }
}
