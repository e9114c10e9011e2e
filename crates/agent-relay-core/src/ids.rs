//! Connection identifiers.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Length of a rendered connection id (128 bits as lowercase hex).
pub const CONNECTION_ID_LEN: usize = 32;

/// Process-unique identifier for one relayed connection.
///
/// Rendered as 32 lowercase hex characters, so it can never contain the
/// `_` delimiter used by correlation tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Connection id parse error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionIdError {
    #[error("Invalid length: expected 32, got {0}")]
    Length(usize),
    #[error("Invalid character in connection id")]
    NotHex,
}

impl FromStr for ConnectionId {
    type Err = ConnectionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != CONNECTION_ID_LEN {
            return Err(ConnectionIdError::Length(s.len()));
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ConnectionIdError::NotHex);
        }
        Uuid::try_parse(s)
            .map(Self)
            .map_err(|_| ConnectionIdError::NotHex)
    }
}

impl TryFrom<String> for ConnectionId {
    type Error = ConnectionIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ConnectionId> for String {
    fn from(id: ConnectionId) -> Self {
        id.to_string()
    }
}
