//! Server configuration.

use std::time::Duration;

use parley_settings::{OverflowPolicy, ParleySettings};
use serde::{Deserialize, Serialize};

/// Configuration for the relay server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Interval between server Ping frames in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Close after this long without any inbound activity, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// How long shutdown waits for connections to drain, in milliseconds.
    pub shutdown_timeout_ms: u64,
    /// Frames buffered per connection before `overflow_policy` applies.
    pub outbound_queue_capacity: usize,
    /// What happens when a recipient's queue is full.
    pub overflow_policy: OverflowPolicy,
    /// Largest accepted inbound frame in bytes.
    pub max_message_bytes: usize,
    /// Maximum members per room (`0` = unlimited).
    pub max_room_members: usize,
    /// Whether a sender receives its own broadcast.
    pub echo_to_sender: bool,
    /// Whether malformed frames get a diagnostic error frame back.
    pub protocol_diagnostics: bool,
    /// Patterns accepted in the `Host` and `Origin` headers.
    pub allowed_hosts: Vec<String>,
    /// Refuse connections that carry no identity.
    pub require_identity: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1024,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            shutdown_timeout_ms: 10_000,
            outbound_queue_capacity: 64,
            overflow_policy: OverflowPolicy::Disconnect,
            max_message_bytes: 64 * 1024,
            max_room_members: 0,
            echo_to_sender: true,
            protocol_diagnostics: true,
            allowed_hosts: vec![
                ".localhost".into(),
                "127.0.0.1".into(),
                "[::1]".into(),
            ],
            require_identity: false,
        }
    }
}

impl ServerConfig {
    /// Build a config from loaded settings.
    pub fn from_settings(settings: &ParleySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_connections: settings.server.max_connections,
            heartbeat_interval_ms: settings.server.heartbeat_interval_ms,
            heartbeat_timeout_ms: settings.server.heartbeat_timeout_ms,
            shutdown_timeout_ms: settings.server.shutdown_timeout_ms,
            outbound_queue_capacity: settings.relay.outbound_queue_capacity,
            overflow_policy: settings.relay.overflow_policy,
            max_message_bytes: settings.relay.max_message_bytes,
            max_room_members: settings.relay.max_room_members,
            echo_to_sender: settings.relay.echo_to_sender,
            protocol_diagnostics: settings.relay.protocol_diagnostics,
            allowed_hosts: settings.security.allowed_hosts.clone(),
            require_identity: settings.security.require_identity,
        }
    }

    /// Ping interval as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Liveness timeout as a [`Duration`].
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Shutdown drain timeout as a [`Duration`].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Transport-level frame cap handed to the WebSocket codec.
    ///
    /// Larger than `max_message_bytes` so oversized frames still reach the
    /// router and get a proper message-too-big close.
    pub fn transport_frame_limit(&self) -> usize {
        self.max_message_bytes.saturating_mul(4).max(64 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_loopback_on_any_port() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
    }

    #[test]
    fn default_relay_policy() {
        let cfg = ServerConfig::default();
        assert!(cfg.echo_to_sender);
        assert_eq!(cfg.overflow_policy, OverflowPolicy::Disconnect);
        assert_eq!(cfg.outbound_queue_capacity, 64);
        assert!(!cfg.require_identity);
    }

    #[test]
    fn durations() {
        let cfg = ServerConfig {
            heartbeat_interval_ms: 250,
            heartbeat_timeout_ms: 1_000,
            shutdown_timeout_ms: 2_000,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.heartbeat_interval(), Duration::from_millis(250));
        assert_eq!(cfg.heartbeat_timeout(), Duration::from_secs(1));
        assert_eq!(cfg.shutdown_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn from_settings_copies_every_section() {
        let mut settings = ParleySettings::default();
        settings.server.port = 9100;
        settings.relay.overflow_policy = OverflowPolicy::DropOldest;
        settings.relay.echo_to_sender = false;
        settings.relay.max_room_members = 2;
        settings.security.allowed_hosts = vec!["*".into()];
        settings.security.require_identity = true;

        let cfg = ServerConfig::from_settings(&settings);
        assert_eq!(cfg.port, 9100);
        assert_eq!(cfg.overflow_policy, OverflowPolicy::DropOldest);
        assert!(!cfg.echo_to_sender);
        assert_eq!(cfg.max_room_members, 2);
        assert_eq!(cfg.allowed_hosts, vec!["*".to_string()]);
        assert!(cfg.require_identity);
    }

    #[test]
    fn transport_limit_exceeds_relay_limit() {
        let cfg = ServerConfig {
            max_message_bytes: 100,
            ..ServerConfig::default()
        };
        assert!(cfg.transport_frame_limit() > cfg.max_message_bytes);
    }

    #[test]
    fn deserialize_from_json_string() {
        let mut json = serde_json::to_value(ServerConfig::default()).unwrap();
        json["port"] = 3000.into();
        json["overflow_policy"] = "drop_oldest".into();
        let cfg: ServerConfig = serde_json::from_value(json).unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.overflow_policy, OverflowPolicy::DropOldest);
    }
}
