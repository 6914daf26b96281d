//! Message routing: validate an inbound frame and fan it out to the room.

use std::sync::Arc;

use metrics::counter;
use parley_core::{RelayError, Result, SignalEnvelope};
use tracing::{debug, warn};

use super::connection::ConnectionHandle;
use super::registry::{FanoutPolicy, PublishReport, RoomRegistry};
use crate::config::ServerConfig;
use crate::metrics::{SIGNAL_FRAMES_TOTAL, SIGNAL_PROTOCOL_ERRORS_TOTAL};

/// Routing limits and policies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoutePolicy {
    /// Largest accepted frame in bytes.
    pub max_message_bytes: usize,
    /// Fan-out behavior.
    pub fanout: FanoutPolicy,
    /// Answer malformed frames with a diagnostic error frame.
    pub protocol_diagnostics: bool,
}

impl RoutePolicy {
    /// Extract the routing policy from the server config.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            max_message_bytes: config.max_message_bytes,
            fanout: FanoutPolicy {
                echo_to_sender: config.echo_to_sender,
                overflow: config.overflow_policy,
            },
            protocol_diagnostics: config.protocol_diagnostics,
        }
    }
}

impl Default for RoutePolicy {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

/// Routes frames from a connection to the other members of its room.
pub struct MessageRouter {
    registry: Arc<RoomRegistry>,
    policy: RoutePolicy,
}

impl MessageRouter {
    /// Create a router over `registry`.
    pub fn new(registry: Arc<RoomRegistry>, policy: RoutePolicy) -> Self {
        Self { registry, policy }
    }

    /// The registry frames are routed through.
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// The active policy.
    pub fn policy(&self) -> RoutePolicy {
        self.policy
    }

    /// Route a text frame.
    ///
    /// Malformed frames are dropped with a non-fatal protocol error (and a
    /// diagnostic frame to the sender when enabled). Oversized frames return
    /// a fatal capacity error; the caller closes the connection.
    pub fn route_text(
        &self,
        sender: &ConnectionHandle,
        text: &str,
    ) -> Result<PublishReport> {
        self.check_size(text.len())?;
        let envelope = SignalEnvelope::parse(text).inspect_err(|err| self.reject(sender, err))?;
        Ok(self.forward(sender, &envelope))
    }

    /// Route a binary frame. Valid UTF-8 is handled as text.
    pub fn route_binary(
        &self,
        sender: &ConnectionHandle,
        data: &[u8],
    ) -> Result<PublishReport> {
        self.check_size(data.len())?;
        match std::str::from_utf8(data) {
            Ok(text) => self.route_text(sender, text),
            Err(_) => {
                let err = RelayError::protocol("binary frame is not valid UTF-8");
                self.reject(sender, &err);
                Err(err)
            }
        }
    }

    fn check_size(&self, len: usize) -> Result<()> {
        if len > self.policy.max_message_bytes {
            return Err(RelayError::message_too_large(
                len,
                self.policy.max_message_bytes,
            ));
        }
        Ok(())
    }

    fn forward(&self, sender: &ConnectionHandle, envelope: &SignalEnvelope) -> PublishReport {
        counter!(SIGNAL_FRAMES_TOTAL).increment(1);
        let report = self.registry.publish(
            sender.room(),
            sender.id(),
            envelope.raw(),
            self.policy.fanout,
        );
        debug!(
            conn_id = %sender.id(),
            room = %sender.room(),
            kind = envelope.kind(),
            bytes = envelope.len(),
            delivered = report.delivered,
            "frame relayed"
        );
        report
    }

    fn reject(&self, sender: &ConnectionHandle, err: &RelayError) {
        counter!(SIGNAL_PROTOCOL_ERRORS_TOTAL).increment(1);
        warn!(conn_id = %sender.id(), room = %sender.room(), error = %err, "dropping frame");
        if !self.policy.protocol_diagnostics {
            return;
        }
        if let Some(frame) = err.diagnostic_frame() {
            let _ = sender.queue().offer(Arc::from(frame));
        }
    }
}
