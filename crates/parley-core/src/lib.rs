//! # parley-core
//!
//! Foundation types, errors, branded IDs, and logging for the Parley
//! signaling relay.
//!
//! This crate provides the shared vocabulary that the other Parley crates
//! depend on:
//!
//! - **Branded IDs**: [`ConnectionId`] and [`RoomId`] as newtypes for type safety
//! - **Identity**: [`Identity`] attached by the external auth layer
//! - **Envelopes**: [`SignalEnvelope`], the validated unit of relay traffic
//! - **Errors**: [`RelayError`] taxonomy via `thiserror`, WebSocket close codes
//! - **Logging**: `tracing` subscriber setup and test capture utilities

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod identity;
pub mod ids;
pub mod logging;

pub use envelope::SignalEnvelope;
pub use errors::{RelayError, Result, close_code};
pub use identity::Identity;
pub use ids::{ConnectionId, RoomId};
