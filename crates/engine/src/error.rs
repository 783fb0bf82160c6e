use switchboard_types::RoomStatus;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Fatal pipeline errors. Locally recovered conditions (hook blocks, hook
/// errors, delivery failures, chain-depth blocks) surface on
/// [`crate::ProcessOutcome`] instead.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no room resolved for channel {channel_id} and auto-create is disabled")]
    RoutingFailed { channel_id: String },

    #[error("room {room_id} is {status}, inbound rejected")]
    RoomClosed {
        room_id: String,
        status: RoomStatus,
    },

    #[error("channel {channel_id} is not registered")]
    UnknownChannel { channel_id: String },

    #[error("binding {channel_id} lacks write access in room {room_id}")]
    WriteAccessDenied {
        room_id: String,
        channel_id: String,
    },

    #[error("pipeline for room {room_id} exceeded its {timeout_ms}ms budget")]
    ProcessTimeout { room_id: String, timeout_ms: u64 },

    #[error(transparent)]
    Store(#[from] switchboard_store::Error),

    #[error("channel adapter failed: {0}")]
    Channel(anyhow::Error),
}

impl From<switchboard_routing::Error> for EngineError {
    fn from(err: switchboard_routing::Error) -> Self {
        match err {
            switchboard_routing::Error::Store(e) => Self::Store(e),
        }
    }
}
