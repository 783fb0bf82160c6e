//! The event router: per-target eligibility, transcoding, and delivery.
//!
//! Targets are evaluated concurrently; within one target the steps are
//! strictly sequential (access → visibility → transcode → length →
//! `on_event` → transport delivery under breaker, limiter, and retry).

use {
    futures::future::join_all,
    serde_json::json,
    tracing::{debug, warn},
};

use {
    switchboard_channels::{Channel, RoomContext, enforce_max_length, transcode},
    switchboard_resilience::{BreakerError, RetryPolicy},
    switchboard_store::Store,
    switchboard_types::{
        ChannelBinding, ChannelCategory, EventSource, Observation, Room, RoomEvent, Task,
        Visibility,
    },
};

use crate::{
    Result, Switchboard,
    events::{FrameworkEvent, names},
    outcome::{DeliveryResult, DeliveryStatus, SkipReason},
};

/// Everything one broadcast produced.
#[derive(Default)]
pub(crate) struct BroadcastRun {
    pub results: Vec<DeliveryResult>,
    /// Reentry drafts at parent depth + 1, not yet depth-checked.
    pub reentry: Vec<RoomEvent>,
    pub tasks: Vec<Task>,
    pub observations: Vec<Observation>,
}

#[derive(Default)]
struct TargetRun {
    result: Option<DeliveryResult>,
    reentry: Vec<RoomEvent>,
    tasks: Vec<Task>,
    observations: Vec<Observation>,
}

fn skipped(binding: &ChannelBinding, event: &RoomEvent, reason: SkipReason) -> TargetRun {
    TargetRun {
        result: Some(DeliveryResult {
            channel_id: binding.channel_id.clone(),
            event_id: event.id.clone(),
            status: DeliveryStatus::Skipped { reason },
        }),
        ..TargetRun::default()
    }
}

/// Visibility filter for one target. `none` still reaches intelligence
/// bindings: hidden events feed context building, and any responses they
/// produce follow normal chain-depth policy.
fn visibility_allows(visibility: &Visibility, binding: &ChannelBinding) -> bool {
    match visibility {
        Visibility::All => true,
        Visibility::None => binding.category == ChannelCategory::Intelligence,
        Visibility::Transport => binding.category == ChannelCategory::Transport,
        Visibility::Intelligence => binding.category == ChannelCategory::Intelligence,
        Visibility::Channels(ids) => ids.contains(&binding.channel_id),
    }
}

impl Switchboard {
    /// Broadcast a persisted event to every eligible binding in its room.
    pub(crate) async fn broadcast(&self, room: &Room, event: &RoomEvent) -> Result<BroadcastRun> {
        let bindings = self.store.list_bindings(&room.id).await?;

        // A muted originator's events persist but never emit.
        if let Some(source) = bindings
            .iter()
            .find(|b| b.channel_id == event.source.channel_id)
            && source.muted
        {
            debug!(room = %room.id, event = %event.id, "originator muted, suppressing broadcast");
            return Ok(BroadcastRun::default());
        }

        let ctx = RoomContext { room: room.clone() };
        let runs = join_all(
            bindings
                .iter()
                .filter(|b| b.channel_id != event.source.channel_id || b.always_process())
                .map(|binding| self.broadcast_to(&ctx, event, binding)),
        )
        .await;

        let mut merged = BroadcastRun::default();
        for run in runs {
            if let Some(result) = run.result {
                merged.results.push(result);
            }
            merged.reentry.extend(run.reentry);
            merged.tasks.extend(run.tasks);
            merged.observations.extend(run.observations);
        }

        let attempted = merged
            .results
            .iter()
            .filter(|r| r.status.is_attempted())
            .count();
        let failures = merged
            .results
            .iter()
            .filter(|r| r.status.is_failure())
            .count();
        if failures > 0 && failures < attempted {
            self.events.emit(
                FrameworkEvent::new(names::BROADCAST_PARTIAL_FAILURE)
                    .in_room(&room.id)
                    .with_data(json!({
                        "event_id": event.id,
                        "failed": failures,
                        "attempted": attempted,
                    })),
            );
        }
        Ok(merged)
    }

    async fn broadcast_to(
        &self,
        ctx: &RoomContext,
        event: &RoomEvent,
        binding: &ChannelBinding,
    ) -> TargetRun {
        if !binding.access.can_read() {
            return skipped(binding, event, SkipReason::NoReadAccess);
        }
        if !visibility_allows(&event.visibility, binding) {
            return skipped(binding, event, SkipReason::VisibilityFiltered);
        }

        let content = match transcode(&event.content, &binding.capabilities) {
            Ok(content) => content,
            Err(e) => {
                debug!(channel = %binding.channel_id, error = %e, "transcoding failed, skipping target");
                self.events.emit(
                    FrameworkEvent::new(names::TRANSCODING_FAILED)
                        .in_room(&binding.room_id)
                        .on_channel(&binding.channel_id)
                        .with_data(json!({ "event_id": event.id })),
                );
                return skipped(binding, event, SkipReason::NotTranscodable);
            },
        };
        let Some(content) = enforce_max_length(content, &binding.capabilities) else {
            debug!(channel = %binding.channel_id, "content exceeds target max_length, skipping");
            return skipped(binding, event, SkipReason::LengthExceeded);
        };
        let mut rendered = event.clone();
        rendered.content = content;

        let Some(channel) = self.channels.get(&binding.channel_id) else {
            warn!(channel = %binding.channel_id, "binding has no registered adapter");
            return skipped(binding, event, SkipReason::UnknownChannel);
        };

        let is_intelligence = binding.category == ChannelCategory::Intelligence;
        let mut run = TargetRun::default();

        match channel.on_event(&rendered, binding, ctx).await {
            Ok(reaction) => {
                run.tasks = reaction
                    .tasks
                    .into_iter()
                    .map(|payload| {
                        Task::new(&ctx.room.id, payload).with_source(&binding.channel_id)
                    })
                    .collect();
                run.observations = reaction
                    .observations
                    .into_iter()
                    .map(|payload| {
                        Observation::new(&ctx.room.id, payload).with_source(&binding.channel_id)
                    })
                    .collect();

                if !reaction.response_events.is_empty() {
                    if !is_intelligence {
                        debug!(channel = %binding.channel_id, "transport produced response events, ignoring");
                    } else if binding.muted {
                        // Mute silences voice, not brain: responses drop,
                        // tasks and observations above are kept.
                        debug!(channel = %binding.channel_id, "muted intelligence, discarding response events");
                    } else {
                        run.reentry = reaction
                            .response_events
                            .into_iter()
                            .map(|response| {
                                let mut draft = RoomEvent::new(
                                    &ctx.room.id,
                                    response.event_type,
                                    EventSource::outbound(
                                        &binding.channel_id,
                                        &binding.channel_type,
                                    ),
                                    response.content,
                                )
                                .child_of(event);
                                if let Some(visibility) = response.visibility {
                                    draft.visibility = visibility;
                                }
                                draft.metadata = response.metadata;
                                draft
                            })
                            .collect();
                    }
                }
            },
            Err(e) => {
                warn!(channel = %binding.channel_id, error = %e, "on_event failed");
                if is_intelligence {
                    run.result = Some(DeliveryResult {
                        channel_id: binding.channel_id.clone(),
                        event_id: event.id.clone(),
                        status: DeliveryStatus::Failed {
                            error: e.to_string(),
                        },
                    });
                    return run;
                }
                // A transport's observation failure does not gate delivery.
            },
        }

        if binding.category == ChannelCategory::Transport {
            if !binding.access.can_write() {
                // Read-only transports observe but are never delivered to.
                run.result = Some(DeliveryResult {
                    channel_id: binding.channel_id.clone(),
                    event_id: event.id.clone(),
                    status: DeliveryStatus::Skipped {
                        reason: SkipReason::NoDeliveryAccess,
                    },
                });
                return run;
            }
            let breaker = self.breaker_for(&binding.channel_id);
            let limiter = self.limiter_for(binding);
            let retry: RetryPolicy = binding.retry.map(Into::into).unwrap_or_else(RetryPolicy::none);

            let outcome = breaker
                .run(async {
                    limiter.acquire().await;
                    retry
                        .run(|_attempt| channel.deliver(&rendered, binding, ctx))
                        .await
                })
                .await;

            let status = match outcome {
                Ok(()) => {
                    debug!(channel = %binding.channel_id, event = %event.id, "delivered");
                    self.events.emit(
                        FrameworkEvent::new(names::DELIVERY_SUCCEEDED)
                            .in_room(&binding.room_id)
                            .on_channel(&binding.channel_id)
                            .with_data(json!({ "event_id": event.id })),
                    );
                    #[cfg(feature = "metrics")]
                    metrics::counter!("switchboard_deliveries_total", "status" => "ok")
                        .increment(1);
                    DeliveryStatus::Delivered
                },
                Err(BreakerError::Open) => {
                    warn!(channel = %binding.channel_id, "delivery short-circuited, circuit open");
                    self.events.emit(
                        FrameworkEvent::new(names::DELIVERY_FAILED)
                            .in_room(&binding.room_id)
                            .on_channel(&binding.channel_id)
                            .with_data(json!({
                                "event_id": event.id,
                                "reason": "circuit_open",
                            })),
                    );
                    #[cfg(feature = "metrics")]
                    metrics::counter!("switchboard_deliveries_total", "status" => "circuit_open")
                        .increment(1);
                    DeliveryStatus::CircuitOpen
                },
                Err(BreakerError::Inner(e)) => {
                    warn!(channel = %binding.channel_id, error = %e, "delivery failed");
                    self.events.emit(
                        FrameworkEvent::new(names::DELIVERY_FAILED)
                            .in_room(&binding.room_id)
                            .on_channel(&binding.channel_id)
                            .with_data(json!({
                                "event_id": event.id,
                                "error": e.to_string(),
                            })),
                    );
                    #[cfg(feature = "metrics")]
                    metrics::counter!("switchboard_deliveries_total", "status" => "failed")
                        .increment(1);
                    DeliveryStatus::Failed {
                        error: e.to_string(),
                    }
                },
            };
            run.result = Some(DeliveryResult {
                channel_id: binding.channel_id.clone(),
                event_id: event.id.clone(),
                status,
            });
        } else if run.result.is_none() {
            // The intelligence target observed the event successfully.
            run.result = Some(DeliveryResult {
                channel_id: binding.channel_id.clone(),
                event_id: event.id.clone(),
                status: DeliveryStatus::Delivered,
            });
        }
        run
    }
}
