//! Branded ID newtypes for type safety.
//!
//! Connection IDs are generated by the relay (UUID v7, time-ordered, with a
//! `conn_` prefix). Room IDs are caller-supplied tokens taken from the
//! signaling URL path and must be validated before use.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::errors::RelayError;

/// Maximum room identifier length in bytes.
pub const MAX_ROOM_ID_LEN: usize = 128;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(format!(concat!($prefix, "_{}"), Uuid::now_v7()))
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

branded_id! {
    /// Unique identifier for one accepted WebSocket connection.
    ConnectionId, "conn"
}

/// Identifier of a signaling room.
///
/// A free-form URL-safe token: 1 to [`MAX_ROOM_ID_LEN`] bytes drawn from the
/// RFC 3986 unreserved set (`A-Z a-z 0-9 - . _ ~`). Two rooms are the same
/// room iff their identifiers are byte-equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Validate and wrap a room identifier.
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        if raw.is_empty() {
            return Err(RelayError::protocol("room identifier is empty"));
        }
        if raw.len() > MAX_ROOM_ID_LEN {
            return Err(RelayError::protocol(format!(
                "room identifier exceeds {MAX_ROOM_ID_LEN} bytes"
            )));
        }
        if let Some(bad) = raw.chars().find(|c| !is_unreserved(*c)) {
            return Err(RelayError::protocol(format!(
                "room identifier contains invalid character {bad:?}"
            )));
        }
        Ok(Self(raw.to_owned()))
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_unreserved(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
}

impl<'de> Deserialize<'de> for RoomId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

impl AsRef<str> for RoomId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
