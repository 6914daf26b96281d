//! Signaling envelopes.
//!
//! An envelope is a JSON object carrying a string `type` tag. The relay
//! validates exactly that much and nothing else: `type` values are not
//! checked against any vocabulary, and the rest of the object is opaque.
//! The validated text is kept as-is so recipients get the sender's bytes.

use std::sync::Arc;

use serde_json::Value;

use crate::errors::{RelayError, Result};

/// A validated signaling frame.
#[derive(Clone, Debug)]
pub struct SignalEnvelope {
    kind: String,
    raw: Arc<str>,
}

impl SignalEnvelope {
    /// Validate an inbound text frame.
    ///
    /// Fails with [`RelayError::Protocol`] when the text is not JSON, is not
    /// an object, or has no string `type` field.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| RelayError::protocol(format!("invalid JSON: {e}")))?;
        let Value::Object(fields) = value else {
            return Err(RelayError::protocol("envelope must be a JSON object"));
        };
        match fields.get("type") {
            Some(Value::String(kind)) => Ok(Self {
                kind: kind.clone(),
                raw: Arc::from(text),
            }),
            Some(_) => Err(RelayError::protocol("envelope `type` must be a string")),
            None => Err(RelayError::protocol("envelope is missing `type`")),
        }
    }

    /// The caller-supplied message kind (`offer`, `answer`, `candidate`, ...).
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The original frame text, shared across recipients.
    pub fn raw(&self) -> &Arc<str> {
        &self.raw
    }

    /// Size of the original frame in bytes.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Whether the original frame is empty (never true for a parsed envelope).
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}
