//! Channel adapters: the boundary between the orchestrator and external
//! endpoints (SMS, email, websockets, AI backends, ...).
//!
//! The engine talks to every endpoint through the [`Channel`] trait;
//! concrete adapters live in host code. The [`transcode`] module downgrades
//! event content to whatever a target binding can render.

pub mod adapter;
pub mod registry;
pub mod transcode;

pub use {
    adapter::{
        Channel, ChannelDescriptor, ChannelReaction, InboundMessage, ResponseEvent, RoomContext,
    },
    registry::ChannelRegistry,
    transcode::{TranscodeError, enforce_max_length, transcode},
};
