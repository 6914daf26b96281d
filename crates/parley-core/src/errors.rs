//! Error taxonomy for the signaling relay.
//!
//! Four error domains, each with a fixed propagation policy:
//!
//! | Variant | Fatal | Surfaces as |
//! |---------|-------|-------------|
//! | [`RelayError::Protocol`] | no | dropped frame + optional diagnostic frame |
//! | [`RelayError::Authorization`] | yes (handshake) | close code only, no payload |
//! | [`RelayError::Capacity`] | yes | close code + optional diagnostic frame |
//! | [`RelayError::Transport`] | yes | nothing (the transport is gone) |
//!
//! None of these ever propagate past the connection that caused them.

use serde_json::json;
use thiserror::Error;

/// WebSocket close codes used by the relay (RFC 6455 §7.4.1).
pub mod close_code {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Endpoint going away (server shutdown).
    pub const GOING_AWAY: u16 = 1001;
    /// Transport lost without a close handshake. Recorded locally, never sent.
    pub const ABNORMAL: u16 = 1006;
    /// Policy violation (origin/host mismatch, identity required).
    pub const POLICY_VIOLATION: u16 = 1008;
    /// Frame exceeds the configured size limit.
    pub const MESSAGE_TOO_BIG: u16 = 1009;
    /// Server or room capacity exhausted, or slow consumer evicted.
    pub const TRY_AGAIN_LATER: u16 = 1013;
}

/// Errors raised while servicing a signaling connection.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Malformed or type-less frame. The frame is dropped; the connection stays open.
    #[error("protocol error: {message}")]
    Protocol {
        /// Human-readable description.
        message: String,
    },

    /// Handshake rejected (origin/host mismatch, missing identity).
    #[error("authorization failed: {reason}")]
    Authorization {
        /// Why the handshake was rejected (logged, never sent to the peer).
        reason: String,
    },

    /// A per-connection, per-room or server-wide limit was exceeded.
    #[error("capacity exceeded: {message}")]
    Capacity {
        /// Human-readable description.
        message: String,
        /// Close code sent to the affected connection.
        close_code: u16,
    },

    /// The underlying transport failed.
    #[error("transport error: {message}")]
    Transport {
        /// Human-readable description.
        message: String,
    },
}

impl RelayError {
    /// Build a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Build an authorization error.
    pub fn authorization(reason: impl Into<String>) -> Self {
        Self::Authorization {
            reason: reason.into(),
        }
    }

    /// Build a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// A frame larger than `limit` bytes was received.
    #[must_use]
    pub fn message_too_large(size: usize, limit: usize) -> Self {
        Self::Capacity {
            message: format!("frame of {size} bytes exceeds limit of {limit} bytes"),
            close_code: close_code::MESSAGE_TOO_BIG,
        }
    }

    /// The WebSocket codec refused a frame above its own cap.
    #[must_use]
    pub fn frame_over_limit(limit: usize) -> Self {
        Self::Capacity {
            message: format!("frame exceeds limit of {limit} bytes"),
            close_code: close_code::MESSAGE_TOO_BIG,
        }
    }

    /// The room already holds its maximum number of members.
    #[must_use]
    pub fn room_full(room: &str, limit: usize) -> Self {
        Self::Capacity {
            message: format!("room {room} is full ({limit} members)"),
            close_code: close_code::TRY_AGAIN_LATER,
        }
    }

    /// The server already holds its maximum number of connections.
    #[must_use]
    pub fn server_full(limit: usize) -> Self {
        Self::Capacity {
            message: format!("server is at its connection limit ({limit})"),
            close_code: close_code::TRY_AGAIN_LATER,
        }
    }

    /// The connection's outbound queue overflowed.
    #[must_use]
    pub fn slow_consumer(capacity: usize) -> Self {
        Self::Capacity {
            message: format!("outbound queue full ({capacity} frames)"),
            close_code: close_code::TRY_AGAIN_LATER,
        }
    }

    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Protocol { .. } => "PROTOCOL_ERROR",
            Self::Authorization { .. } => "AUTHORIZATION_ERROR",
            Self::Capacity { .. } => "CAPACITY_ERROR",
            Self::Transport { .. } => "TRANSPORT_ERROR",
        }
    }

    /// Whether this error terminates the connection.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Protocol { .. })
    }

    /// Close code to send to the peer, if any.
    #[must_use]
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::Protocol { .. } | Self::Transport { .. } => None,
            Self::Authorization { .. } => Some(close_code::POLICY_VIOLATION),
            Self::Capacity { close_code, .. } => Some(*close_code),
        }
    }

    /// Diagnostic frame echoed to the offending connection.
    ///
    /// Only protocol and capacity errors produce one; authorization failures
    /// surface solely as a close code.
    #[must_use]
    pub fn diagnostic_frame(&self) -> Option<String> {
        let message = match self {
            Self::Protocol { message } | Self::Capacity { message, .. } => message,
            Self::Authorization { .. } | Self::Transport { .. } => return None,
        };
        Some(
            json!({
                "type": "error",
                "code": self.code(),
                "message": message,
            })
            .to_string(),
        )
    }
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
