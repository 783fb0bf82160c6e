//! The switchboard engine: per-room serialized inbound pipeline, event
//! router with access control and transcoding, reentry drain for
//! intelligence responses, and the framework observability stream.
//!
//! Hosts construct a [`Switchboard`] over a [`switchboard_store::Store`],
//! register channel adapters and hooks, and feed external messages through
//! [`Switchboard::process_inbound`].

mod broadcast;
pub mod config;
pub mod error;
pub mod events;
pub mod locks;
pub mod outcome;
mod pipeline;
mod switchboard;

pub use {
    config::EngineConfig,
    error::{EngineError, Result},
    events::{FrameworkEvent, FrameworkEvents, FrameworkHandler, names},
    locks::{RoomLocks, RoomSection},
    outcome::{DeliveryResult, DeliveryStatus, ProcessOutcome, SkipReason},
    switchboard::{Switchboard, SwitchboardBuilder},
};

/// `blocked_by` name recorded on reentry events past the chain-depth limit.
pub const CHAIN_DEPTH_BLOCKER: &str = "event_chain_depth_limit";
