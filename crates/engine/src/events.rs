//! Framework events: the observability stream of internal transitions,
//! separate from room events.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};

use {
    anyhow::Result,
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tracing::warn,
};

use switchboard_common::now_ms;

/// Well-known framework event names.
pub mod names {
    pub const ROOM_CREATED: &str = "room_created";
    pub const ROOM_CLOSED: &str = "room_closed";
    pub const EVENT_BLOCKED: &str = "event_blocked";
    pub const DELIVERY_SUCCEEDED: &str = "delivery_succeeded";
    pub const DELIVERY_FAILED: &str = "delivery_failed";
    pub const BROADCAST_PARTIAL_FAILURE: &str = "broadcast_partial_failure";
    pub const CHAIN_DEPTH_EXCEEDED: &str = "chain_depth_exceeded";
    pub const IDENTITY_TIMEOUT: &str = "identity_timeout";
    pub const PROCESS_TIMEOUT: &str = "process_timeout";
    pub const HOOK_ERROR: &str = "hook_error";
    pub const TRANSCODING_FAILED: &str = "transcoding_failed";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameworkEvent {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub data: Value,
    pub timestamp_ms: u64,
}

impl FrameworkEvent {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            room_id: None,
            channel_id: None,
            data: Value::Null,
            timestamp_ms: now_ms(),
        }
    }

    pub fn in_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    pub fn on_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Host-registered observer for framework events.
#[async_trait]
pub trait FrameworkHandler: Send + Sync {
    async fn handle(&self, event: &FrameworkEvent) -> Result<()>;
}

/// Number of recent events retained for diagnostics.
const RECENT_CAPACITY: usize = 256;

/// Registry and emitter for framework events.
///
/// Handlers are registered per event name and invoked fire-and-forget on
/// their own tasks, each bounded by a small timeout. Handler failures are
/// logged and never reach the pipeline. Recent events are kept in a bounded
/// ring buffer for diagnostics and tests.
pub struct FrameworkEvents {
    handlers: RwLock<HashMap<String, Vec<Arc<dyn FrameworkHandler>>>>,
    recent: Mutex<VecDeque<FrameworkEvent>>,
    handler_timeout: Duration,
}

impl FrameworkEvents {
    pub fn new(handler_timeout: Duration) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            recent: Mutex::new(VecDeque::with_capacity(RECENT_CAPACITY)),
            handler_timeout,
        }
    }

    /// Register a handler for one event name.
    pub fn on(&self, name: &str, handler: Arc<dyn FrameworkHandler>) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.entry(name.to_string()).or_default().push(handler);
    }

    /// Emit an event: record it and dispatch handlers fire-and-forget.
    pub fn emit(&self, event: FrameworkEvent) {
        {
            let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
            if recent.len() == RECENT_CAPACITY {
                recent.pop_front();
            }
            recent.push_back(event.clone());
        }

        let matched: Vec<Arc<dyn FrameworkHandler>> = {
            let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            handlers.get(&event.name).cloned().unwrap_or_default()
        };
        if matched.is_empty() {
            return;
        }
        for handler in matched {
            let event = event.clone();
            let timeout = self.handler_timeout;
            tokio::spawn(async move {
                match tokio::time::timeout(timeout, handler.handle(&event)).await {
                    Err(_) => warn!(event = %event.name, "framework handler timed out"),
                    Ok(Err(e)) => {
                        warn!(event = %event.name, error = %e, "framework handler failed");
                    },
                    Ok(Ok(())) => {},
                }
            });
        }
    }

    /// Recent events, oldest first.
    pub fn recent(&self) -> Vec<FrameworkEvent> {
        self.recent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Count of recent events with the given name.
    pub fn recent_count(&self, name: &str) -> usize {
        self.recent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.name == name)
            .count()
    }
}

impl Default for FrameworkEvents {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}
