//! Identities: who a sender is, shared across rooms.

use serde::{Deserialize, Serialize};

use switchboard_common::{new_id, now_ms};

/// A channel-specific address an identity is reachable at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelAddress {
    pub channel_type: String,
    pub address: String,
    #[serde(default)]
    pub verified: bool,
}

/// A person or agent known to the system. Lifetime independent of any room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default)]
    pub channel_addresses: Vec<ChannelAddress>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl Identity {
    pub fn new() -> Self {
        let now = now_ms();
        Self {
            id: new_id("idn"),
            display_name: None,
            external_id: None,
            channel_addresses: Vec::new(),
            created_at_ms: now,
            updated_at_ms: now,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_address(mut self, address: ChannelAddress) -> Self {
        self.channel_addresses.push(address);
        self
    }

    /// Whether this identity is reachable at the given address.
    pub fn has_address(&self, channel_type: &str, address: &str) -> bool {
        self.channel_addresses
            .iter()
            .any(|a| a.channel_type == channel_type && a.address == address)
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::new()
    }
}
