//! Fan-out and handshake settings.

use serde::{Deserialize, Serialize};

/// What happens when a recipient's outbound queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the recipient from its room and close it (try-again-later).
    #[default]
    Disconnect,
    /// Discard the oldest queued frame to make room for the new one.
    DropOldest,
}

impl OverflowPolicy {
    /// Parse the wire name used in settings and environment variables.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().replace('-', "_").as_str() {
            "disconnect" => Some(Self::Disconnect),
            "drop_oldest" => Some(Self::DropOldest),
            _ => None,
        }
    }
}

/// Fan-out, queueing and frame-size settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Frames buffered per connection before the overflow policy applies.
    pub outbound_queue_capacity: usize,
    /// Behavior when a recipient's queue is full.
    pub overflow_policy: OverflowPolicy,
    /// Largest accepted inbound frame in bytes.
    pub max_message_bytes: usize,
    /// Maximum members per room (`0` = unlimited).
    pub max_room_members: usize,
    /// Whether the sender receives its own broadcast.
    pub echo_to_sender: bool,
    /// Whether malformed frames are answered with a diagnostic error frame.
    pub protocol_diagnostics: bool,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 64,
            overflow_policy: OverflowPolicy::Disconnect,
            max_message_bytes: 64 * 1024,
            max_room_members: 0,
            echo_to_sender: true,
            protocol_diagnostics: true,
        }
    }
}

/// Handshake validation settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecuritySettings {
    /// Host patterns accepted in the `Host` and `Origin` headers.
    ///
    /// `*` matches anything, `.example.com` matches the domain and its
    /// subdomains, anything else matches exactly.
    pub allowed_hosts: Vec<String>,
    /// Reject connections that arrive without an identity.
    pub require_identity: bool,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            allowed_hosts: vec![
                ".localhost".to_string(),
                "127.0.0.1".to_string(),
                "[::1]".to_string(),
            ],
            require_identity: false,
        }
    }
}
