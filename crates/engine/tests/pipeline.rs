//! End-to-end pipeline scenarios over the in-memory store.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use {anyhow::bail, async_trait::async_trait, serde_json::json};

use {
    switchboard_channels::{
        Channel, ChannelDescriptor, ChannelReaction, InboundMessage, RoomContext,
    },
    switchboard_engine::{
        CHAIN_DEPTH_BLOCKER, DeliveryStatus, EngineConfig, EngineError, SkipReason, Switchboard,
        names,
    },
    switchboard_hooks::{
        FnHook, HookContext, HookExecution, HookOutput, HookRegistration, HookTrigger,
        InjectedEvent,
    },
    switchboard_identity::{
        IdentityContext, IdentityHook, IdentityHookAction, IdentityHookRegistration,
        IdentityResolution, IdentityResolver,
    },
    switchboard_resilience::breaker::BreakerConfig,
    switchboard_store::{EventWindow, MemoryStore, Store},
    switchboard_types::{
        Capabilities, ChannelAccess, ChannelBinding, ChannelCategory, Content, ContentKind,
        EventStatus, Room, RoomEvent, Visibility,
    },
};

// ── Test channels ───────────────────────────────────────────────────────────

struct RecordingTransport {
    descriptor: ChannelDescriptor,
    delivered: Mutex<Vec<Content>>,
    deliver_calls: AtomicU32,
    on_event_calls: AtomicU32,
    fail: AtomicBool,
}

impl RecordingTransport {
    fn new(channel_id: &str, channel_type: &str) -> Arc<Self> {
        Self::with_capabilities(channel_id, channel_type, Capabilities::text_only())
    }

    fn with_capabilities(
        channel_id: &str,
        channel_type: &str,
        capabilities: Capabilities,
    ) -> Arc<Self> {
        Arc::new(Self {
            descriptor: ChannelDescriptor::transport(channel_id, channel_type)
                .with_capabilities(capabilities),
            delivered: Mutex::new(Vec::new()),
            deliver_calls: AtomicU32::new(0),
            on_event_calls: AtomicU32::new(0),
            fail: AtomicBool::new(false),
        })
    }

    fn delivered(&self) -> Vec<Content> {
        self.delivered.lock().unwrap().clone()
    }

    fn deliver_count(&self) -> u32 {
        self.deliver_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Channel for RecordingTransport {
    fn descriptor(&self) -> &ChannelDescriptor {
        &self.descriptor
    }

    async fn deliver(
        &self,
        event: &RoomEvent,
        _binding: &ChannelBinding,
        _ctx: &RoomContext,
    ) -> anyhow::Result<()> {
        self.deliver_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            bail!("provider down");
        }
        self.delivered.lock().unwrap().push(event.content.clone());
        Ok(())
    }

    async fn on_event(
        &self,
        _event: &RoomEvent,
        _binding: &ChannelBinding,
        _ctx: &RoomContext,
    ) -> anyhow::Result<ChannelReaction> {
        self.on_event_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ChannelReaction::none())
    }
}

struct EchoIntelligence {
    descriptor: ChannelDescriptor,
    /// Reply only to message events at this chain depth.
    replies_at_depth: u32,
    prefix: String,
    with_side_effects: bool,
    seen: AtomicU32,
}

impl EchoIntelligence {
    fn new(channel_id: &str, replies_at_depth: u32, prefix: &str) -> Arc<Self> {
        Arc::new(Self {
            descriptor: ChannelDescriptor::intelligence(channel_id, "llm"),
            replies_at_depth,
            prefix: prefix.to_string(),
            with_side_effects: false,
            seen: AtomicU32::new(0),
        })
    }

    fn with_side_effects(channel_id: &str, replies_at_depth: u32, prefix: &str) -> Arc<Self> {
        Arc::new(Self {
            descriptor: ChannelDescriptor::intelligence(channel_id, "llm"),
            replies_at_depth,
            prefix: prefix.to_string(),
            with_side_effects: true,
            seen: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl Channel for EchoIntelligence {
    fn descriptor(&self) -> &ChannelDescriptor {
        &self.descriptor
    }

    async fn on_event(
        &self,
        event: &RoomEvent,
        _binding: &ChannelBinding,
        _ctx: &RoomContext,
    ) -> anyhow::Result<ChannelReaction> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        let Content::Text { text } = &event.content else {
            return Ok(ChannelReaction::none());
        };
        if event.chain_depth != self.replies_at_depth {
            return Ok(ChannelReaction::none());
        }
        let mut reaction = ChannelReaction::respond(Content::text(format!(
            "{}:{}",
            self.prefix, text
        )));
        if self.with_side_effects {
            reaction = reaction
                .with_task(json!({ "kind": "follow_up", "about": text }))
                .with_observation(json!({ "kind": "seen", "text": text }));
        }
        Ok(reaction)
    }
}

// ── Setup helpers ───────────────────────────────────────────────────────────

fn engine() -> Switchboard {
    engine_with(EngineConfig::default())
}

fn engine_with(config: EngineConfig) -> Switchboard {
    Switchboard::builder(Arc::new(MemoryStore::new()))
        .config(config)
        .build()
}

async fn attach_transport(engine: &Switchboard, room: &Room, channel: &RecordingTransport) {
    engine
        .attach_channel(ChannelBinding::new(
            &room.id,
            &channel.descriptor.channel_id,
            &channel.descriptor.channel_type,
            ChannelCategory::Transport,
        ))
        .await
        .unwrap();
}

async fn attach_intelligence(engine: &Switchboard, room: &Room, channel_id: &str) {
    engine
        .attach_channel(ChannelBinding::new(
            &room.id,
            channel_id,
            "llm",
            ChannelCategory::Intelligence,
        ))
        .await
        .unwrap();
}

async fn room_events(engine: &Switchboard, room_id: &str) -> Vec<RoomEvent> {
    engine
        .store()
        .list_events(room_id, EventWindow::default())
        .await
        .unwrap()
}

// ── Scenarios ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn s1_simple_cross_channel_relay() {
    let engine = engine();
    let a = RecordingTransport::new("a", "sms");
    let b = RecordingTransport::new("b", "email");
    engine.register_channel(a.clone()).await;
    engine.register_channel(b.clone()).await;
    let room = engine.create_room(Room::new()).await.unwrap();
    attach_transport(&engine, &room, &a).await;
    attach_transport(&engine, &room, &b).await;

    let outcome = engine
        .process_inbound(InboundMessage::text("a", "sms", "hi"))
        .await
        .unwrap();

    assert_eq!(outcome.delivered_count(), 1);
    let event = outcome.event.unwrap();
    assert_eq!(event.index, 0);
    assert_eq!(event.status, EventStatus::Delivered);
    assert!(!outcome.blocked);

    assert_eq!(b.delivered(), vec![Content::text("hi")]);
    assert_eq!(a.deliver_count(), 0);
    assert_eq!(engine.events().recent_count(names::DELIVERY_SUCCEEDED), 1);
}

#[tokio::test]
async fn s2_idempotent_replay_returns_prior_event() {
    let engine = engine();
    let a = RecordingTransport::new("a", "sms");
    let b = RecordingTransport::new("b", "email");
    engine.register_channel(a.clone()).await;
    engine.register_channel(b.clone()).await;
    let room = engine.create_room(Room::new()).await.unwrap();
    attach_transport(&engine, &room, &a).await;
    attach_transport(&engine, &room, &b).await;

    let inbound = InboundMessage::text("a", "sms", "hi").with_idempotency_key("k1");
    let first = engine.process_inbound(inbound.clone()).await.unwrap();
    let second = engine.process_inbound(inbound).await.unwrap();

    assert!(!first.deduplicated);
    assert!(second.deduplicated);
    assert_eq!(
        first.event.unwrap().id,
        second.event.unwrap().id,
        "both calls must return the same stored event"
    );
    assert_eq!(engine.store().event_count(&room.id).await.unwrap(), 1);
    assert_eq!(b.deliver_count(), 1);
    assert!(second.delivery_results.is_empty());
}

#[tokio::test]
async fn s3_sync_block_stops_broadcast_but_not_async_hooks() {
    let engine = engine();
    let a = RecordingTransport::new("a", "sms");
    let b = RecordingTransport::new("b", "email");
    engine.register_channel(a.clone()).await;
    engine.register_channel(b.clone()).await;
    let room = engine.create_room(Room::new()).await.unwrap();
    attach_transport(&engine, &room, &a).await;
    attach_transport(&engine, &room, &b).await;

    engine.hooks().register(
        HookRegistration::new(
            "spam-filter",
            HookTrigger::BeforeBroadcast,
            Arc::new(FnHook(|event: &RoomEvent, _: &HookContext| {
                match &event.content {
                    Content::Text { text } if text.contains("spam") => {
                        HookOutput::block("matched spam pattern")
                    },
                    _ => HookOutput::allow(),
                }
            })),
        )
        .with_priority(0),
    );

    let async_ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&async_ran);
    engine.hooks().register(
        HookRegistration::new(
            "notify",
            HookTrigger::AfterBroadcast,
            Arc::new(FnHook(move |_: &RoomEvent, _: &HookContext| {
                flag.store(true, Ordering::SeqCst);
                HookOutput::allow()
            })),
        )
        .with_execution(HookExecution::Async),
    );

    let outcome = engine
        .process_inbound(InboundMessage::text("a", "sms", "spam here"))
        .await
        .unwrap();

    assert!(outcome.blocked);
    assert_eq!(outcome.blocked_reason.as_deref(), Some("matched spam pattern"));
    let event = outcome.event.unwrap();
    assert_eq!(event.status, EventStatus::Blocked);
    assert_eq!(event.blocked_by.as_deref(), Some("spam-filter"));

    assert_eq!(b.deliver_count(), 0);
    assert!(async_ran.load(Ordering::SeqCst), "async hooks still run on block");
    assert_eq!(engine.events().recent_count(names::EVENT_BLOCKED), 1);
}

#[tokio::test]
async fn s4_rich_content_transcodes_for_text_only_target() {
    let engine = engine();
    let a = RecordingTransport::with_capabilities(
        "a",
        "web",
        Capabilities::with_kinds([ContentKind::Text, ContentKind::Rich]),
    );
    let b = RecordingTransport::new("b", "sms");
    engine.register_channel(a.clone()).await;
    engine.register_channel(b.clone()).await;
    let room = engine.create_room(Room::new()).await.unwrap();
    attach_transport(&engine, &room, &a).await;
    attach_transport(&engine, &room, &b).await;

    let mut inbound = InboundMessage::text("a", "web", "");
    inbound.content = Content::rich("<b>Hi</b>", "Hi");
    engine.process_inbound(inbound).await.unwrap();

    assert_eq!(b.delivered(), vec![Content::text("Hi")]);
    assert_eq!(a.deliver_count(), 0);
}

#[tokio::test]
async fn s5_chain_depth_bounds_reentry() {
    let mut config = EngineConfig::default();
    config.max_chain_depth = 1;
    let engine = engine_with(config);

    let a = RecordingTransport::new("a", "sms");
    let i1 = EchoIntelligence::new("i1", 0, "i1");
    let i2 = EchoIntelligence::new("i2", 1, "i2");
    engine.register_channel(a.clone()).await;
    engine.register_channel(i1.clone()).await;
    engine.register_channel(i2.clone()).await;
    let room = engine.create_room(Room::new()).await.unwrap();
    attach_transport(&engine, &room, &a).await;
    attach_intelligence(&engine, &room, "i1").await;
    attach_intelligence(&engine, &room, "i2").await;

    engine
        .process_inbound(InboundMessage::text("a", "sms", "go"))
        .await
        .unwrap();

    let events = room_events(&engine, &room.id).await;
    assert_eq!(events.len(), 3, "original + reply + blocked grandchild");

    assert_eq!(events[0].index, 0);
    assert_eq!(events[0].chain_depth, 0);
    assert_eq!(events[0].status, EventStatus::Delivered);

    assert_eq!(events[1].index, 1);
    assert_eq!(events[1].chain_depth, 1);
    assert_eq!(events[1].source.channel_id, "i1");
    assert_eq!(events[1].status, EventStatus::Delivered);
    assert_eq!(events[1].content, Content::text("i1:go"));
    assert_eq!(events[1].parent_event_id.as_deref(), Some(events[0].id.as_str()));

    assert_eq!(events[2].index, 2);
    assert_eq!(events[2].chain_depth, 2);
    assert_eq!(events[2].source.channel_id, "i2");
    assert_eq!(events[2].status, EventStatus::Blocked);
    assert_eq!(events[2].blocked_by.as_deref(), Some(CHAIN_DEPTH_BLOCKER));

    // The blocked grandchild is never broadcast: A only sees I1's reply.
    assert_eq!(a.delivered(), vec![Content::text("i1:go")]);
    let observations = engine.store().list_observations(&room.id).await.unwrap();
    assert_eq!(observations.len(), 1, "chain-depth block pairs an observation");
    assert_eq!(
        engine.events().recent_count(names::CHAIN_DEPTH_EXCEEDED),
        1
    );
}

#[tokio::test]
async fn s6_circuit_breaker_opens_and_recovers() {
    let mut config = EngineConfig::default();
    config.breaker = BreakerConfig {
        failure_threshold: 5,
        recovery_ms: 100,
    };
    let engine = engine_with(config);

    let a = RecordingTransport::new("a", "sms");
    let b = RecordingTransport::new("b", "email");
    b.fail.store(true, Ordering::SeqCst);
    engine.register_channel(a.clone()).await;
    engine.register_channel(b.clone()).await;
    let room = engine.create_room(Room::new()).await.unwrap();
    attach_transport(&engine, &room, &a).await;
    attach_transport(&engine, &room, &b).await;

    for i in 0..5 {
        let outcome = engine
            .process_inbound(InboundMessage::text("a", "sms", &format!("m{i}")))
            .await
            .unwrap();
        assert!(matches!(
            outcome.delivery_results[0].status,
            DeliveryStatus::Failed { .. }
        ));
    }
    assert_eq!(b.deliver_count(), 5);

    // Sixth attempt short-circuits without reaching the adapter.
    let outcome = engine
        .process_inbound(InboundMessage::text("a", "sms", "m5"))
        .await
        .unwrap();
    assert!(matches!(
        outcome.delivery_results[0].status,
        DeliveryStatus::CircuitOpen
    ));
    assert_eq!(b.deliver_count(), 5);

    // After the recovery window, one probe is admitted and closes the
    // breaker on success.
    tokio::time::sleep(Duration::from_millis(120)).await;
    b.fail.store(false, Ordering::SeqCst);
    let outcome = engine
        .process_inbound(InboundMessage::text("a", "sms", "m6"))
        .await
        .unwrap();
    assert!(matches!(
        outcome.delivery_results[0].status,
        DeliveryStatus::Delivered
    ));
    assert_eq!(b.deliver_count(), 6);
}

// ── Invariants & boundary behaviors ─────────────────────────────────────────

#[tokio::test]
async fn indices_are_gap_free_and_blocked_events_name_their_blocker() {
    let engine = engine();
    let a = RecordingTransport::new("a", "sms");
    let i1 = EchoIntelligence::new("i1", 0, "i1");
    engine.register_channel(a.clone()).await;
    engine.register_channel(i1.clone()).await;
    let room = engine.create_room(Room::new()).await.unwrap();
    attach_transport(&engine, &room, &a).await;
    attach_intelligence(&engine, &room, "i1").await;

    engine.hooks().register(HookRegistration::new(
        "no-curses",
        HookTrigger::BeforeBroadcast,
        Arc::new(FnHook(|event: &RoomEvent, _: &HookContext| {
            match &event.content {
                Content::Text { text } if text.contains("curse") => HookOutput::block("language"),
                _ => HookOutput::allow(),
            }
        })),
    ));

    for text in ["one", "curse two", "three"] {
        engine
            .process_inbound(InboundMessage::text("a", "sms", text))
            .await
            .unwrap();
    }

    let events = room_events(&engine, &room.id).await;
    for (expected, event) in events.iter().enumerate() {
        assert_eq!(event.index, expected as u64);
        if event.status == EventStatus::Blocked {
            assert!(event.blocked_by.as_deref().is_some_and(|b| !b.is_empty()));
        }
    }
    let room = engine.store().get_room(&room.id).await.unwrap().unwrap();
    assert_eq!(room.event_count, events.len() as u64);
    assert_eq!(room.latest_index, Some(events.len() as u64 - 1));
}

#[tokio::test]
async fn chain_depth_zero_blocks_every_response() {
    let mut config = EngineConfig::default();
    config.max_chain_depth = 0;
    let engine = engine_with(config);

    let a = RecordingTransport::new("a", "sms");
    let i1 = EchoIntelligence::new("i1", 0, "i1");
    engine.register_channel(a.clone()).await;
    engine.register_channel(i1.clone()).await;
    let room = engine.create_room(Room::new()).await.unwrap();
    attach_transport(&engine, &room, &a).await;
    attach_intelligence(&engine, &room, "i1").await;

    engine
        .process_inbound(InboundMessage::text("a", "sms", "hello"))
        .await
        .unwrap();

    let events = room_events(&engine, &room.id).await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].status, EventStatus::Blocked);
    assert_eq!(events[1].blocked_by.as_deref(), Some(CHAIN_DEPTH_BLOCKER));
    assert_eq!(a.deliver_count(), 0, "no response event is ever broadcast");
    assert_eq!(
        engine.store().list_observations(&room.id).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn muted_intelligence_keeps_tasks_and_observations() {
    let engine = engine();
    let a = RecordingTransport::new("a", "sms");
    let i1 = EchoIntelligence::with_side_effects("i1", 0, "i1");
    engine.register_channel(a.clone()).await;
    engine.register_channel(i1.clone()).await;
    let room = engine.create_room(Room::new()).await.unwrap();
    attach_transport(&engine, &room, &a).await;
    engine
        .attach_channel(
            ChannelBinding::new(&room.id, "i1", "llm", ChannelCategory::Intelligence).muted(),
        )
        .await
        .unwrap();

    engine
        .process_inbound(InboundMessage::text("a", "sms", "hi"))
        .await
        .unwrap();

    assert_eq!(i1.seen.load(Ordering::SeqCst), 1, "muted brain still hears");
    let events = room_events(&engine, &room.id).await;
    assert_eq!(events.len(), 1, "response events are discarded");

    let tasks = engine.store().list_tasks(&room.id, None).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].source_channel_id.as_deref(), Some("i1"));
    let observations = engine.store().list_observations(&room.id).await.unwrap();
    assert_eq!(observations.len(), 1);
}

#[tokio::test]
async fn read_only_binding_never_sends_or_receives_deliveries() {
    let engine = engine();
    let a = RecordingTransport::new("a", "sms");
    let b = RecordingTransport::new("b", "email");
    engine.register_channel(a.clone()).await;
    engine.register_channel(b.clone()).await;
    let room = engine.create_room(Room::new()).await.unwrap();
    attach_transport(&engine, &room, &a).await;
    engine
        .attach_channel(
            ChannelBinding::new(&room.id, "b", "email", ChannelCategory::Transport)
                .with_access(ChannelAccess::ReadOnly),
        )
        .await
        .unwrap();

    // As a source it is rejected before anything persists.
    let err = engine
        .process_inbound(InboundMessage::text("b", "email", "hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::WriteAccessDenied { .. }));
    assert_eq!(engine.store().event_count(&room.id).await.unwrap(), 0);

    // As a target it observes but is never delivered to.
    let outcome = engine
        .process_inbound(InboundMessage::text("a", "sms", "hi"))
        .await
        .unwrap();
    assert_eq!(b.on_event_calls.load(Ordering::SeqCst), 1);
    assert_eq!(b.deliver_count(), 0);
    assert!(outcome.delivery_results.iter().any(|r| {
        r.channel_id == "b"
            && r.status
                == DeliveryStatus::Skipped {
                    reason: SkipReason::NoDeliveryAccess,
                }
    }));
}

#[tokio::test]
async fn hidden_visibility_still_feeds_intelligence() {
    let engine = engine();
    let a = RecordingTransport::new("a", "sms");
    let b = RecordingTransport::new("b", "email");
    let i1 = EchoIntelligence::new("i1", 0, "i1");
    engine.register_channel(a.clone()).await;
    engine.register_channel(b.clone()).await;
    engine.register_channel(i1.clone()).await;
    let room = engine.create_room(Room::new()).await.unwrap();
    attach_transport(&engine, &room, &a).await;
    attach_transport(&engine, &room, &b).await;
    attach_intelligence(&engine, &room, "i1").await;

    engine.hooks().register(HookRegistration::new(
        "hide",
        HookTrigger::BeforeBroadcast,
        Arc::new(FnHook(|event: &RoomEvent, _: &HookContext| {
            if event.chain_depth > 0 {
                return HookOutput::allow();
            }
            let mut hidden = event.clone();
            hidden.visibility = Visibility::None;
            HookOutput::modified(hidden)
        })),
    ));

    engine
        .process_inbound(InboundMessage::text("a", "sms", "secret"))
        .await
        .unwrap();

    // The hidden original never reaches transports, but the intelligence
    // response does.
    assert_eq!(b.delivered(), vec![Content::text("i1:secret")]);
    assert_eq!(a.delivered(), vec![Content::text("i1:secret")]);
    assert!(i1.seen.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn hook_injected_events_run_through_the_drain() {
    let engine = engine();
    let a = RecordingTransport::new("a", "sms");
    let b = RecordingTransport::new("b", "email");
    engine.register_channel(a.clone()).await;
    engine.register_channel(b.clone()).await;
    let room = engine.create_room(Room::new()).await.unwrap();
    attach_transport(&engine, &room, &a).await;
    attach_transport(&engine, &room, &b).await;

    engine.hooks().register(HookRegistration::new(
        "auto-notice",
        HookTrigger::BeforeBroadcast,
        Arc::new(FnHook(|event: &RoomEvent, _: &HookContext| {
            if event.chain_depth > 0 {
                return HookOutput::allow();
            }
            HookOutput::allow().with_event(InjectedEvent::message(Content::text("for the record")))
        })),
    ));

    engine
        .process_inbound(InboundMessage::text("a", "sms", "hi"))
        .await
        .unwrap();

    let events = room_events(&engine, &room.id).await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].chain_depth, 1);
    assert_eq!(events[1].source.channel_type, "internal");

    // Both transports receive the injected event; only B gets the original.
    assert_eq!(
        b.delivered(),
        vec![Content::text("hi"), Content::text("for the record")]
    );
    assert_eq!(a.delivered(), vec![Content::text("for the record")]);
}

#[tokio::test]
async fn blocked_events_participate_in_idempotency() {
    let engine = engine();
    let a = RecordingTransport::new("a", "sms");
    engine.register_channel(a.clone()).await;
    let room = engine.create_room(Room::new()).await.unwrap();
    attach_transport(&engine, &room, &a).await;

    engine.hooks().register(HookRegistration::new(
        "block-all",
        HookTrigger::BeforeBroadcast,
        Arc::new(FnHook(|_: &RoomEvent, _: &HookContext| {
            HookOutput::block("closed for business")
        })),
    ));

    let inbound = InboundMessage::text("a", "sms", "hi").with_idempotency_key("k1");
    let first = engine.process_inbound(inbound.clone()).await.unwrap();
    assert!(first.blocked);

    let second = engine.process_inbound(inbound).await.unwrap();
    assert!(second.deduplicated);
    assert_eq!(second.event.unwrap().id, first.event.unwrap().id);
    assert_eq!(engine.store().event_count(&room.id).await.unwrap(), 1);
}

#[tokio::test]
async fn unbound_channel_auto_creates_a_room() {
    let engine = engine();
    let a = RecordingTransport::new("a", "sms");
    engine.register_channel(a.clone()).await;

    let outcome = engine
        .process_inbound(InboundMessage::text("a", "sms", "hello").with_participant("alice"))
        .await
        .unwrap();

    let event = outcome.event.unwrap();
    let room = engine.store().get_room(&event.room_id).await.unwrap().unwrap();
    let binding = engine
        .store()
        .get_binding(&room.id, "a")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(binding.participant_id.as_deref(), Some("alice"));
    assert_eq!(engine.events().recent_count(names::ROOM_CREATED), 1);

    // A second message from the same channel lands in the same room.
    let second = engine
        .process_inbound(InboundMessage::text("a", "sms", "again").with_participant("alice"))
        .await
        .unwrap();
    assert_eq!(second.event.unwrap().room_id, room.id);
}

#[tokio::test]
async fn routing_fails_when_auto_create_is_disabled() {
    let mut config = EngineConfig::default();
    config.auto_create_rooms = false;
    let engine = engine_with(config);
    let a = RecordingTransport::new("a", "sms");
    engine.register_channel(a.clone()).await;

    let err = engine
        .process_inbound(InboundMessage::text("a", "sms", "hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RoutingFailed { .. }));
}

#[tokio::test]
async fn closed_rooms_reject_inbound_at_routing() {
    let engine = engine();
    let a = RecordingTransport::new("a", "sms");
    engine.register_channel(a.clone()).await;
    let room = engine.create_room(Room::new()).await.unwrap();
    attach_transport(&engine, &room, &a).await;
    engine.close_room(&room.id).await.unwrap();

    let err = engine
        .process_inbound(InboundMessage::text("a", "sms", "too late"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RoomClosed { .. }));
}

#[tokio::test]
async fn process_timeout_releases_the_section() {
    let mut config = EngineConfig::default();
    config.process_timeout_ms = 80;
    let engine = engine_with(config);
    let a = RecordingTransport::new("a", "sms");
    engine.register_channel(a.clone()).await;
    let room = engine.create_room(Room::new()).await.unwrap();
    attach_transport(&engine, &room, &a).await;

    struct SlowHook;
    #[async_trait]
    impl switchboard_hooks::Hook for SlowHook {
        async fn run(
            &self,
            _: &RoomEvent,
            _: &HookContext,
        ) -> anyhow::Result<HookOutput> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(HookOutput::allow())
        }
    }
    let slow = engine.hooks().register(
        HookRegistration::new("slow", HookTrigger::BeforeBroadcast, Arc::new(SlowHook))
            .with_timeout(Duration::from_secs(5)),
    );

    let err = engine
        .process_inbound(InboundMessage::text("a", "sms", "hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ProcessTimeout { .. }));
    assert_eq!(engine.events().recent_count(names::PROCESS_TIMEOUT), 1);

    // The section was released: the next message processes normally.
    engine.hooks().unregister(slow);
    let outcome = engine
        .process_inbound(InboundMessage::text("a", "sms", "again"))
        .await
        .unwrap();
    assert!(!outcome.blocked);
}

#[tokio::test]
async fn partial_delivery_failure_is_reported() {
    let engine = engine();
    let a = RecordingTransport::new("a", "sms");
    let b = RecordingTransport::new("b", "email");
    let c = RecordingTransport::new("c", "webhook");
    c.fail.store(true, Ordering::SeqCst);
    engine.register_channel(a.clone()).await;
    engine.register_channel(b.clone()).await;
    engine.register_channel(c.clone()).await;
    let room = engine.create_room(Room::new()).await.unwrap();
    attach_transport(&engine, &room, &a).await;
    attach_transport(&engine, &room, &b).await;
    attach_transport(&engine, &room, &c).await;

    engine
        .process_inbound(InboundMessage::text("a", "sms", "hi"))
        .await
        .unwrap();

    assert_eq!(b.deliver_count(), 1);
    assert_eq!(
        engine
            .events()
            .recent_count(names::BROADCAST_PARTIAL_FAILURE),
        1
    );
    assert_eq!(engine.events().recent_count(names::DELIVERY_FAILED), 1);
}

// ── Identity integration ────────────────────────────────────────────────────

struct UnknownResolver;

#[async_trait]
impl IdentityResolver for UnknownResolver {
    async fn resolve(
        &self,
        _event: &RoomEvent,
        _ctx: &IdentityContext,
    ) -> anyhow::Result<IdentityResolution> {
        Ok(IdentityResolution::Unknown)
    }
}

struct FixedIdentityHook(IdentityHookAction);

#[async_trait]
impl IdentityHook for FixedIdentityHook {
    async fn handle(
        &self,
        _event: &RoomEvent,
        _resolution: &IdentityResolution,
        _ctx: &IdentityContext,
    ) -> anyhow::Result<IdentityHookAction> {
        Ok(self.0.clone())
    }
}

fn identity_engine(action: IdentityHookAction) -> Switchboard {
    let engine = Switchboard::builder(Arc::new(MemoryStore::new()))
        .identity_resolver(Arc::new(UnknownResolver))
        .build();
    engine
        .identity()
        .register_hook(IdentityHookRegistration::new(
            "gatekeeper",
            Arc::new(FixedIdentityHook(action)),
        ));
    engine
}

#[tokio::test]
async fn identity_reject_persists_a_blocked_event() {
    let engine = identity_engine(IdentityHookAction::Reject {
        reason: "unverified sender".into(),
    });
    let a = RecordingTransport::new("a", "sms");
    let b = RecordingTransport::new("b", "email");
    engine.register_channel(a.clone()).await;
    engine.register_channel(b.clone()).await;
    let room = engine.create_room(Room::new()).await.unwrap();
    attach_transport(&engine, &room, &a).await;
    attach_transport(&engine, &room, &b).await;

    let outcome = engine
        .process_inbound(InboundMessage::text("a", "sms", "hi"))
        .await
        .unwrap();

    assert!(outcome.blocked);
    assert_eq!(outcome.blocked_reason.as_deref(), Some("unverified sender"));
    let event = outcome.event.unwrap();
    assert_eq!(event.status, EventStatus::Blocked);
    assert_eq!(event.blocked_by.as_deref(), Some("gatekeeper"));
    assert_eq!(b.deliver_count(), 0);
}

#[tokio::test]
async fn identity_challenge_goes_back_to_the_sender_only() {
    let engine = identity_engine(IdentityHookAction::Challenge {
        content: Content::text("Reply with your code"),
    });
    let a = RecordingTransport::new("a", "sms");
    let b = RecordingTransport::new("b", "email");
    engine.register_channel(a.clone()).await;
    engine.register_channel(b.clone()).await;
    let room = engine.create_room(Room::new()).await.unwrap();
    attach_transport(&engine, &room, &a).await;
    attach_transport(&engine, &room, &b).await;

    let outcome = engine
        .process_inbound(InboundMessage::text("a", "sms", "hi"))
        .await
        .unwrap();

    assert!(outcome.blocked);
    assert_eq!(a.delivered(), vec![Content::text("Reply with your code")]);
    assert!(b.delivered().is_empty());

    let events = room_events(&engine, &room.id).await;
    assert_eq!(events.len(), 2, "blocked original + challenge");
    assert_eq!(events[0].status, EventStatus::Blocked);
    assert_eq!(events[1].visibility, Visibility::channels(["a"]));
}

#[tokio::test]
async fn identity_allow_list_skips_other_channel_types() {
    let mut config = EngineConfig::default();
    config.identity_channel_types = Some(["email".to_string()].into());
    let engine = Switchboard::builder(Arc::new(MemoryStore::new()))
        .config(config)
        .identity_resolver(Arc::new(UnknownResolver))
        .build();
    engine
        .identity()
        .register_hook(IdentityHookRegistration::new(
            "gatekeeper",
            Arc::new(FixedIdentityHook(IdentityHookAction::Reject {
                reason: "no".into(),
            })),
        ));

    let a = RecordingTransport::new("a", "sms");
    engine.register_channel(a.clone()).await;
    let room = engine.create_room(Room::new()).await.unwrap();
    attach_transport(&engine, &room, &a).await;

    // An sms message is outside the allow-list: no identity, no block.
    let outcome = engine
        .process_inbound(InboundMessage::text("a", "sms", "hi"))
        .await
        .unwrap();
    assert!(!outcome.blocked);
}
