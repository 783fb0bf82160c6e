//! Registry of live channel adapters.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use tracing::info;

use crate::adapter::Channel;

/// All registered channel adapters, keyed by channel id.
///
/// Registration and removal may happen at any time; lookups hand out `Arc`
/// clones so in-flight pipelines keep the adapter they started with.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, Arc<dyn Channel>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any previous one with the same id.
    /// Returns the replaced adapter so the caller can close it.
    pub fn register(&self, channel: Arc<dyn Channel>) -> Option<Arc<dyn Channel>> {
        let id = channel.descriptor().channel_id.clone();
        info!(channel = %id, channel_type = %channel.descriptor().channel_type, "channel registered");
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        channels.insert(id, channel)
    }

    pub fn get(&self, channel_id: &str) -> Option<Arc<dyn Channel>> {
        let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
        channels.get(channel_id).cloned()
    }

    pub fn remove(&self, channel_id: &str) -> Option<Arc<dyn Channel>> {
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        channels.remove(channel_id)
    }

    pub fn ids(&self) -> Vec<String> {
        let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = channels.keys().cloned().collect();
        ids.sort();
        ids
    }
}
