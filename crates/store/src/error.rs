/// Crate-wide result type for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed store errors. These propagate to the pipeline caller as fatal.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// An event with the same idempotency key already exists in the room.
    #[error("duplicate idempotency key {key:?} in room {room_id}")]
    DuplicateIdempotencyKey { room_id: String, key: String },

    /// The write conflicts with existing state (e.g. a channel already
    /// bound elsewhere).
    #[error("store conflict: {message}")]
    Conflict { message: String },

    /// Wrapped backend failure.
    #[error("store backend error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    #[must_use]
    pub fn conflict(message: impl std::fmt::Display) -> Self {
        Self::Conflict {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn backend(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend {
            source: Box::new(source),
        }
    }
}
