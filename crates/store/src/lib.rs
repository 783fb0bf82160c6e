//! Persistence contract for switchboard entities.
//!
//! The [`Store`] trait is the only way the pipeline touches persistent
//! state. [`MemoryStore`] is the reference implementation; hosts swap in
//! their own backend (SQL, KV, ...) behind the same trait.
//!
//! Index assignment and idempotency checks in `add_event` are atomic only
//! when the caller holds the room's exclusive section — the store does not
//! serialize rooms itself.

pub mod error;
pub mod memory;
mod store;

pub use {
    error::{Error, Result},
    memory::MemoryStore,
    store::{EventWindow, Store},
};
