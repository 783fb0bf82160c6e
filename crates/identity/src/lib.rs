//! Sender identity resolution.
//!
//! For inbound events carrying a sender, a host-supplied resolver runs
//! under a timeout; `ambiguous`/`unknown` results escalate to identity
//! hooks, which can resolve, defer, challenge the sender, or reject the
//! event. A timeout degrades to `unknown` and is never fatal.

use std::{
    collections::HashSet,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    anyhow::Result,
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tracing::{debug, info, warn},
};

use {
    switchboard_hooks::HookError,
    switchboard_types::{Content, Room, RoomEvent},
};

const DEFAULT_IDENTITY_TIMEOUT: Duration = Duration::from_secs(10);

/// Stage label used on captured identity hook errors.
const STAGE: &str = "identity";

// ── Resolver contract ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum IdentityResolution {
    Identified { identity_id: String },
    Pending,
    Ambiguous { candidates: Vec<String> },
    Unknown,
    /// The resolver issued its own verification challenge.
    ChallengeSent,
    Rejected { reason: String },
}

#[derive(Debug, Clone)]
pub struct IdentityContext {
    pub room: Room,
}

/// Host-supplied resolver (address books, OTP services, CRM lookups).
/// May suspend; honors cancellation by construction.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(
        &self,
        event: &RoomEvent,
        ctx: &IdentityContext,
    ) -> Result<IdentityResolution>;
}

// ── Identity hooks ──────────────────────────────────────────────────────────

/// What an identity hook wants done with an ambiguous/unknown sender.
#[derive(Debug, Clone)]
pub enum IdentityHookAction {
    /// Defer to the next hook.
    Keep,
    Resolve {
        identity_id: String,
    },
    Pending,
    /// Inject a verification event back to the sender and block the
    /// original event.
    Challenge {
        content: Content,
    },
    Reject {
        reason: String,
    },
}

#[async_trait]
pub trait IdentityHook: Send + Sync {
    async fn handle(
        &self,
        event: &RoomEvent,
        resolution: &IdentityResolution,
        ctx: &IdentityContext,
    ) -> Result<IdentityHookAction>;
}

pub struct IdentityHookRegistration {
    pub name: String,
    /// Lower runs first; ties break by registration order.
    pub priority: i32,
    /// `None` matches all channel types.
    pub channel_types: Option<HashSet<String>>,
    handler: Arc<dyn IdentityHook>,
}

impl IdentityHookRegistration {
    pub fn new(name: impl Into<String>, handler: Arc<dyn IdentityHook>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            channel_types: None,
            handler,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn for_channel_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channel_types = Some(types.into_iter().map(Into::into).collect());
        self
    }
}

// ── Outcome ─────────────────────────────────────────────────────────────────

/// A decision to block the inbound event, carried into the room section and
/// persisted there as a blocked event.
#[derive(Debug, Clone)]
pub struct IdentityBlock {
    pub reason: String,
    pub by: String,
}

/// Result of running the identity pipeline for one event.
#[derive(Debug)]
pub struct IdentityOutcome {
    pub resolution: IdentityResolution,
    pub block: Option<IdentityBlock>,
    /// Verification content to inject back to the sender.
    pub challenge: Option<Content>,
    pub timed_out: bool,
    pub errors: Vec<HookError>,
}

// ── Pipeline ────────────────────────────────────────────────────────────────

struct HookEntry {
    seq: u64,
    reg: IdentityHookRegistration,
}

/// The identity pipeline: resolver + escalation hooks + gating.
pub struct IdentityPipeline {
    resolver: Option<Arc<dyn IdentityResolver>>,
    hooks: RwLock<Vec<HookEntry>>,
    timeout: Duration,
    /// Channel types that participate; `None` means all.
    allowed_channel_types: Option<HashSet<String>>,
    next_seq: AtomicU64,
}

impl IdentityPipeline {
    /// A pipeline with no resolver: identity is skipped entirely.
    pub fn disabled() -> Self {
        Self {
            resolver: None,
            hooks: RwLock::new(Vec::new()),
            timeout: DEFAULT_IDENTITY_TIMEOUT,
            allowed_channel_types: None,
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn new(resolver: Arc<dyn IdentityResolver>) -> Self {
        Self {
            resolver: Some(resolver),
            ..Self::disabled()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_allowed_channel_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_channel_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.resolver.is_some()
    }

    pub fn register_hook(&self, reg: IdentityHookRegistration) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        info!(hook = %reg.name, "identity hook registered");
        let mut hooks = self.hooks.write().unwrap_or_else(|e| e.into_inner());
        hooks.push(HookEntry { seq, reg });
        seq
    }

    pub fn unregister_hook(&self, seq: u64) -> bool {
        let mut hooks = self.hooks.write().unwrap_or_else(|e| e.into_inner());
        let before = hooks.len();
        hooks.retain(|e| e.seq != seq);
        hooks.len() != before
    }

    /// Run identity for an inbound event. Returns `None` when identity does
    /// not apply (no resolver, or the channel type is outside the
    /// allow-list).
    pub async fn run(&self, event: &RoomEvent, room: &Room) -> Option<IdentityOutcome> {
        let resolver = self.resolver.as_ref()?;
        if let Some(allowed) = &self.allowed_channel_types
            && !allowed.contains(&event.source.channel_type)
        {
            debug!(
                channel_type = %event.source.channel_type,
                "channel type outside identity allow-list, skipping"
            );
            return None;
        }

        let ctx = IdentityContext { room: room.clone() };
        let mut outcome = IdentityOutcome {
            resolution: IdentityResolution::Unknown,
            block: None,
            challenge: None,
            timed_out: false,
            errors: Vec::new(),
        };

        match tokio::time::timeout(self.timeout, resolver.resolve(event, &ctx)).await {
            Err(_) => {
                warn!(event = %event.id, "identity resolver timed out, degrading to unknown");
                outcome.timed_out = true;
            },
            Ok(Err(e)) => {
                warn!(event = %event.id, error = %e, "identity resolver failed, degrading to unknown");
                outcome
                    .errors
                    .push(HookError::new("identity_resolver", STAGE, e.to_string()));
            },
            Ok(Ok(resolution)) => outcome.resolution = resolution,
        }

        if matches!(
            outcome.resolution,
            IdentityResolution::Ambiguous { .. } | IdentityResolution::Unknown
        ) {
            self.escalate(event, &ctx, &mut outcome).await;
        }

        // Resolver verdicts block the original just like hook verdicts: a
        // rejection carries its reason, and a resolver-issued challenge
        // holds the event until the sender verifies.
        if outcome.block.is_none() {
            match &outcome.resolution {
                IdentityResolution::Rejected { reason } => {
                    outcome.block = Some(IdentityBlock {
                        reason: reason.clone(),
                        by: "identity_resolver".into(),
                    });
                },
                IdentityResolution::ChallengeSent => {
                    outcome.block = Some(IdentityBlock {
                        reason: "identity challenge sent".into(),
                        by: "identity_resolver".into(),
                    });
                },
                _ => {},
            }
        }

        Some(outcome)
    }

    /// Run identity hooks in priority order; the first non-`Keep` action
    /// wins.
    async fn escalate(
        &self,
        event: &RoomEvent,
        ctx: &IdentityContext,
        outcome: &mut IdentityOutcome,
    ) {
        let matched: Vec<(String, Arc<dyn IdentityHook>)> = {
            let hooks = self.hooks.read().unwrap_or_else(|e| e.into_inner());
            let mut matched: Vec<(i32, u64, String, Arc<dyn IdentityHook>)> = hooks
                .iter()
                .filter(|e| {
                    e.reg
                        .channel_types
                        .as_ref()
                        .is_none_or(|types| types.contains(&event.source.channel_type))
                })
                .map(|e| {
                    (
                        e.reg.priority,
                        e.seq,
                        e.reg.name.clone(),
                        Arc::clone(&e.reg.handler),
                    )
                })
                .collect();
            matched.sort_by_key(|(priority, seq, _, _)| (*priority, *seq));
            matched
                .into_iter()
                .map(|(_, _, name, handler)| (name, handler))
                .collect()
        };

        for (name, handler) in matched {
            let result = tokio::time::timeout(
                self.timeout,
                handler.handle(event, &outcome.resolution, ctx),
            )
            .await;
            let action = match result {
                Err(_) => {
                    warn!(hook = %name, "identity hook timed out");
                    outcome
                        .errors
                        .push(HookError::new(&name, STAGE, "hook timed out"));
                    continue;
                },
                Ok(Err(e)) => {
                    warn!(hook = %name, error = %e, "identity hook failed");
                    outcome.errors.push(HookError::new(&name, STAGE, e.to_string()));
                    continue;
                },
                Ok(Ok(action)) => action,
            };

            match action {
                IdentityHookAction::Keep => continue,
                IdentityHookAction::Resolve { identity_id } => {
                    info!(hook = %name, identity = %identity_id, "identity hook resolved sender");
                    outcome.resolution = IdentityResolution::Identified { identity_id };
                },
                IdentityHookAction::Pending => {
                    outcome.resolution = IdentityResolution::Pending;
                },
                IdentityHookAction::Challenge { content } => {
                    info!(hook = %name, "identity hook issued challenge");
                    outcome.resolution = IdentityResolution::ChallengeSent;
                    outcome.challenge = Some(content);
                    outcome.block = Some(IdentityBlock {
                        reason: "identity challenge sent".into(),
                        by: name,
                    });
                },
                IdentityHookAction::Reject { reason } => {
                    info!(hook = %name, reason = %reason, "identity hook rejected sender");
                    outcome.resolution = IdentityResolution::Rejected {
                        reason: reason.clone(),
                    };
                    outcome.block = Some(IdentityBlock { reason, by: name });
                },
            }
            return;
        }
    }
}
