//! Core data model for the switchboard conversation orchestrator.
//!
//! All entities are immutable-by-convention value records: construct them,
//! hand them to the store, and treat stored copies as the source of truth.
//! Cross-entity references are ids, never back-pointers.

pub mod binding;
pub mod content;
pub mod event;
pub mod identity;
pub mod participant;
pub mod room;
pub mod task;

pub use {
    binding::{
        ALWAYS_PROCESS_KEY, Capabilities, ChannelAccess, ChannelBinding, ChannelCategory,
        ChannelDirection, OverflowPolicy, RateLimitConfig, RetryConfig,
    },
    content::{Button, Card, Content, ContentError, ContentKind, MAX_COMPOSITE_DEPTH},
    event::{Direction, EventSource, EventStatus, EventType, RoomEvent, Visibility},
    identity::{ChannelAddress, Identity},
    participant::{Participant, ParticipantStatus},
    room::{Room, RoomStatus, RoomTimers},
    task::{Observation, Task, TaskStatus},
};
