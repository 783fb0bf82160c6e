//! Route inbound messages to rooms.
//!
//! Resolution cascade (precedence):
//! 1. Binding for the exact channel id (participant must match when both
//!    sides pin one)
//! 2. Binding for the channel type + participant pair
//! 3. `CreateNew` sentinel — the caller materializes a room and attaches
//!    the source channel

pub mod error;
pub mod resolve;

pub use {
    error::{Error, Result},
    resolve::{InboundRouter, RouteOutcome, StoreRouter},
};
