//! Hook middleware for the inbound pipeline.
//!
//! Hooks are user-supplied callbacks fired at defined pipeline points.
//! Sync hooks run sequentially in deterministic order and can block or
//! modify the event; async hooks are concurrent fire-and-forget side
//! effects. Hook failures never fail the pipeline — they are captured as
//! [`HookError`] entries on the dispatch result.

use std::{
    collections::HashSet,
    fmt,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    anyhow::Result,
    async_trait::async_trait,
    futures::future::join_all,
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
    tracing::{debug, info, warn},
};

use switchboard_types::{Content, Direction, EventSource, EventType, Room, RoomEvent, Visibility};

// ── Triggers ────────────────────────────────────────────────────────────────

/// Pipeline points hooks can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookTrigger {
    /// Sync gate before an event is persisted and broadcast.
    BeforeBroadcast,
    /// After broadcast and reentry drain complete.
    AfterBroadcast,
    RoomCreated,
    RoomClosed,
}

impl fmt::Display for HookTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BeforeBroadcast => "before_broadcast",
            Self::AfterBroadcast => "after_broadcast",
            Self::RoomCreated => "room_created",
            Self::RoomClosed => "room_closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookExecution {
    /// Sequential, can block or modify.
    Sync,
    /// Concurrent side effect; decisions are ignored.
    Async,
}

/// Where a registration applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookScope {
    Global,
    Room(String),
}

impl HookScope {
    fn matches(&self, room_id: &str) -> bool {
        match self {
            Self::Global => true,
            Self::Room(id) => id == room_id,
        }
    }
}

/// Event filters. `None` entries match everything; a set matches when the
/// event's value is in it.
#[derive(Debug, Clone, Default)]
pub struct HookFilters {
    pub channel_types: Option<HashSet<String>>,
    pub channel_ids: Option<HashSet<String>>,
    pub directions: Option<HashSet<Direction>>,
}

impl HookFilters {
    pub fn channel_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channel_types: Some(types.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    fn matches(&self, source: &EventSource) -> bool {
        if let Some(types) = &self.channel_types
            && !types.contains(&source.channel_type)
        {
            return false;
        }
        if let Some(ids) = &self.channel_ids
            && !ids.contains(&source.channel_id)
        {
            return false;
        }
        if let Some(directions) = &self.directions
            && !directions.contains(&source.direction)
        {
            return false;
        }
        true
    }
}

// ── Outcomes ────────────────────────────────────────────────────────────────

/// What a sync hook decided about the event.
#[derive(Debug, Clone, Default)]
pub enum HookDecision {
    /// Let the event proceed unchanged.
    #[default]
    Allow,
    /// Replace the event propagated to the next hook and to persistence.
    /// Identity and ordering fields (`id`, `room_id`, `index`,
    /// `chain_depth`) are not hook-modifiable and are restored.
    AllowModified(RoomEvent),
    /// Stop the pipeline; the event persists as blocked.
    Block { reason: String },
}

/// An event a hook asks the pipeline to inject. Injected events enter the
/// reentry queue one generation below the event being processed.
#[derive(Debug, Clone)]
pub struct InjectedEvent {
    pub event_type: EventType,
    pub content: Content,
    pub visibility: Option<Visibility>,
    pub metadata: Map<String, Value>,
}

impl InjectedEvent {
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

/// Full output of one hook invocation.
#[derive(Debug, Clone, Default)]
pub struct HookOutput {
    pub decision: HookDecision,
    pub events: Vec<InjectedEvent>,
    /// Task payloads to persist at the end of the pipeline run.
    pub tasks: Vec<Value>,
    /// Observation payloads to persist at the end of the pipeline run.
    pub observations: Vec<Value>,
}

impl HookOutput {
    pub fn allow() -> Self {
        Self::default()
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            decision: HookDecision::Block {
                reason: reason.into(),
            },
            ..Self::default()
        }
    }

    pub fn modified(event: RoomEvent) -> Self {
        Self {
            decision: HookDecision::AllowModified(event),
            ..Self::default()
        }
    }

    pub fn with_event(mut self, event: InjectedEvent) -> Self {
        self.events.push(event);
        self
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

/// A captured, non-fatal hook failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookError {
    pub hook: String,
    pub stage: String,
    pub message: String,
}

impl HookError {
    pub fn new(
        hook: impl Into<String>,
        stage: impl fmt::Display,
        message: impl Into<String>,
    ) -> Self {
        Self {
            hook: hook.into(),
            stage: stage.to_string(),
            message: message.into(),
        }
    }
}

// ── Hook trait ──────────────────────────────────────────────────────────────

/// Context handed to every hook invocation.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub room: Room,
    pub trigger: HookTrigger,
}

/// A user-supplied hook callback.
#[async_trait]
pub trait Hook: Send + Sync {
    async fn run(&self, event: &RoomEvent, ctx: &HookContext) -> Result<HookOutput>;
}

/// Adapter for plain closures, mostly useful in tests and small hosts.
pub struct FnHook<F>(pub F);

#[async_trait]
impl<F> Hook for FnHook<F>
where
    F: Fn(&RoomEvent, &HookContext) -> HookOutput + Send + Sync,
{
    async fn run(&self, event: &RoomEvent, ctx: &HookContext) -> Result<HookOutput> {
        Ok((self.0)(event, ctx))
    }
}

// ── Registration ────────────────────────────────────────────────────────────

const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// A hook plus its dispatch metadata.
pub struct HookRegistration {
    pub name: String,
    pub trigger: HookTrigger,
    pub execution: HookExecution,
    /// Lower runs first; ties break by registration order.
    pub priority: i32,
    pub timeout: Duration,
    pub filters: HookFilters,
    pub scope: HookScope,
    handler: Arc<dyn Hook>,
}

impl HookRegistration {
    pub fn new(
        name: impl Into<String>,
        trigger: HookTrigger,
        handler: Arc<dyn Hook>,
    ) -> Self {
        Self {
            name: name.into(),
            trigger,
            execution: HookExecution::Sync,
            priority: 0,
            timeout: DEFAULT_HOOK_TIMEOUT,
            filters: HookFilters::default(),
            scope: HookScope::Global,
            handler,
        }
    }

    pub fn with_execution(mut self, execution: HookExecution) -> Self {
        self.execution = execution;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_filters(mut self, filters: HookFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn for_room(mut self, room_id: impl Into<String>) -> Self {
        self.scope = HookScope::Room(room_id.into());
        self
    }
}

/// Handle returned by [`HookEngine::register`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

// ── Dispatch results ────────────────────────────────────────────────────────

/// A sync hook blocked the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blocked {
    pub reason: String,
    pub by: String,
}

/// Result of running the sync pipeline for one trigger.
#[derive(Debug)]
pub struct SyncDispatch {
    /// The event after any `AllowModified` replacements.
    pub event: RoomEvent,
    pub blocked: Option<Blocked>,
    /// Injections accumulated across all hooks that ran, including on block.
    pub events: Vec<InjectedEvent>,
    pub tasks: Vec<Value>,
    pub observations: Vec<Value>,
    pub errors: Vec<HookError>,
}

// ── Engine ──────────────────────────────────────────────────────────────────

struct Entry {
    id: u64,
    reg: Arc<HookRegistration>,
}

/// Registry and dispatcher for all hooks.
///
/// Reads snapshot the registry, so register/unregister during an in-flight
/// dispatch never affects it.
#[derive(Default)]
pub struct HookEngine {
    entries: RwLock<Vec<Entry>>,
    next_id: AtomicU64,
}

impl HookEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, reg: HookRegistration) -> HookId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!(hook = %reg.name, trigger = %reg.trigger, "hook registered");
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.push(Entry {
            id,
            reg: Arc::new(reg),
        });
        HookId(id)
    }

    pub fn unregister(&self, id: HookId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|e| e.id != id.0);
        entries.len() != before
    }

    /// Remove all hooks scoped to a room (called on room deletion).
    pub fn unregister_room(&self, room_id: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.retain(|e| !matches!(&e.reg.scope, HookScope::Room(id) if id == room_id));
    }

    pub fn hook_names(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.iter().map(|e| e.reg.name.clone()).collect()
    }

    /// Snapshot of matching registrations in deterministic order: scope and
    /// filters first, then priority (lower first, ties by registration).
    fn matching(
        &self,
        trigger: HookTrigger,
        execution: HookExecution,
        room_id: &str,
        source: &EventSource,
    ) -> Vec<Arc<HookRegistration>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut matched: Vec<(i32, u64, Arc<HookRegistration>)> = entries
            .iter()
            .filter(|e| {
                e.reg.trigger == trigger
                    && e.reg.execution == execution
                    && e.reg.scope.matches(room_id)
                    && e.reg.filters.matches(source)
            })
            .map(|e| (e.reg.priority, e.id, Arc::clone(&e.reg)))
            .collect();
        matched.sort_by_key(|(priority, id, _)| (*priority, *id));
        matched.into_iter().map(|(_, _, reg)| reg).collect()
    }

    /// Run the sync pipeline for `trigger`. Stops at the first block;
    /// modified events thread through to subsequent hooks. Errors and
    /// timeouts are captured, never propagated.
    pub async fn dispatch_sync(
        &self,
        trigger: HookTrigger,
        event: RoomEvent,
        ctx: &HookContext,
    ) -> SyncDispatch {
        let matched = self.matching(trigger, HookExecution::Sync, &ctx.room.id, &event.source);
        let mut dispatch = SyncDispatch {
            event,
            blocked: None,
            events: Vec::new(),
            tasks: Vec::new(),
            observations: Vec::new(),
            errors: Vec::new(),
        };
        if matched.is_empty() {
            return dispatch;
        }
        debug!(trigger = %trigger, count = matched.len(), "dispatching sync hooks");

        for reg in matched {
            let result =
                tokio::time::timeout(reg.timeout, reg.handler.run(&dispatch.event, ctx)).await;
            let output = match result {
                Err(_) => {
                    warn!(hook = %reg.name, trigger = %trigger, "sync hook timed out");
                    dispatch
                        .errors
                        .push(HookError::new(&reg.name, trigger, "hook timed out"));
                    continue;
                },
                Ok(Err(e)) => {
                    warn!(hook = %reg.name, trigger = %trigger, error = %e, "sync hook failed");
                    dispatch
                        .errors
                        .push(HookError::new(&reg.name, trigger, e.to_string()));
                    continue;
                },
                Ok(Ok(output)) => output,
            };

            dispatch.events.extend(output.events);
            dispatch.tasks.extend(output.tasks);
            dispatch.observations.extend(output.observations);

            match output.decision {
                HookDecision::Allow => {},
                HookDecision::AllowModified(mut replacement) => {
                    replacement.id = dispatch.event.id.clone();
                    replacement.room_id = dispatch.event.room_id.clone();
                    replacement.index = dispatch.event.index;
                    replacement.chain_depth = dispatch.event.chain_depth;
                    debug!(hook = %reg.name, trigger = %trigger, "hook modified event");
                    dispatch.event = replacement;
                },
                HookDecision::Block { reason } => {
                    info!(hook = %reg.name, trigger = %trigger, reason = %reason, "hook blocked event");
                    dispatch.blocked = Some(Blocked {
                        reason,
                        by: reg.name.clone(),
                    });
                    break;
                },
            }
        }
        dispatch
    }

    /// Run all matching async hooks concurrently under their individual
    /// timeouts. Decisions and injections from async hooks are side-effect
    /// noise and are ignored (logged at debug).
    pub async fn dispatch_async(
        &self,
        trigger: HookTrigger,
        event: &RoomEvent,
        ctx: &HookContext,
    ) -> Vec<HookError> {
        let matched = self.matching(trigger, HookExecution::Async, &ctx.room.id, &event.source);
        if matched.is_empty() {
            return Vec::new();
        }
        debug!(trigger = %trigger, count = matched.len(), "dispatching async hooks");

        let futures = matched.into_iter().map(|reg| {
            let event = event.clone();
            let ctx = ctx.clone();
            async move {
                let result =
                    tokio::time::timeout(reg.timeout, reg.handler.run(&event, &ctx)).await;
                match result {
                    Err(_) => {
                        warn!(hook = %reg.name, trigger = %trigger, "async hook timed out");
                        Some(HookError::new(&reg.name, trigger, "hook timed out"))
                    },
                    Ok(Err(e)) => {
                        warn!(hook = %reg.name, trigger = %trigger, error = %e, "async hook failed");
                        Some(HookError::new(&reg.name, trigger, e.to_string()))
                    },
                    Ok(Ok(output)) => {
                        if !matches!(output.decision, HookDecision::Allow) {
                            debug!(hook = %reg.name, trigger = %trigger, "async hook decision ignored");
                        }
                        None
                    },
                }
            }
        });

        join_all(futures).await.into_iter().flatten().collect()
    }
}
