//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` for the JSON file
//! format. Each type implements [`Default`] with production default values
//! and is marked `#[serde(default)]`, so partial JSON is accepted.

mod relay;
mod server;

pub use relay::*;
pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the Parley relay.
///
/// # JSON Format
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "relay": { "overflowPolicy": "drop_oldest" },
///   "security": { "allowedHosts": [".example.com"] }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParleySettings {
    /// Settings schema version.
    pub version: String,
    /// Application name.
    pub name: String,
    /// Network and connection settings.
    pub server: ServerSettings,
    /// Fan-out, queueing and frame limits.
    pub relay: RelaySettings,
    /// Handshake validation.
    pub security: SecuritySettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for ParleySettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            name: "parley".to_string(),
            server: ServerSettings::default(),
            relay: RelaySettings::default(),
            security: SecuritySettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl ParleySettings {
    /// Reject combinations the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        let relay = &self.relay;
        let server = &self.server;
        if relay.outbound_queue_capacity == 0 {
            return Err(SettingsError::invalid(
                "relay.outboundQueueCapacity",
                "must be at least 1",
            ));
        }
        if relay.max_message_bytes == 0 {
            return Err(SettingsError::invalid("relay.maxMessageBytes", "must be at least 1"));
        }
        if server.max_connections == 0 {
            return Err(SettingsError::invalid("server.maxConnections", "must be at least 1"));
        }
        if server.heartbeat_interval_ms == 0 {
            return Err(SettingsError::invalid(
                "server.heartbeatIntervalMs",
                "must be at least 1",
            ));
        }
        if server.heartbeat_timeout_ms < server.heartbeat_interval_ms {
            return Err(SettingsError::invalid(
                "server.heartbeatTimeoutMs",
                format!(
                    "{} is shorter than the {} ms heartbeat interval",
                    server.heartbeat_timeout_ms, server.heartbeat_interval_ms
                ),
            ));
        }
        if self.security.allowed_hosts.iter().all(|h| h.trim().is_empty()) {
            return Err(SettingsError::invalid(
                "security.allowedHosts",
                "must contain at least one pattern",
            ));
        }
        Ok(())
    }
}
