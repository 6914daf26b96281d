//! WebSocket gateway, room registry, routing, heartbeat, and connection lifecycle.

pub mod connection;
pub mod gateway;
pub mod heartbeat;
pub mod lifecycle;
pub mod origin;
pub mod registry;
pub mod router;
