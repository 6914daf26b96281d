//! # parley-server
//!
//! Axum HTTP + `WebSocket` server that relays WebRTC signaling frames
//! between the members of a room.
//!
//! - HTTP endpoints: `/health`, `/metrics`
//! - `WebSocket` gateway: origin/host allow-list, identity pickup, room admission
//! - Room registry: sharded in-memory room membership with bounded fan-out
//! - Message router: envelope validation and broadcast
//! - Lifecycle: per-connection state machine, heartbeat, guaranteed cleanup
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::RelayServer;
pub use websocket::registry::RoomRegistry;
