//! Request id correlation.
//!
//! Outgoing requests have their JSON-RPC `id` rewritten to a token of the
//! form `<connection_id>_<kind>_<original>` so that a backend response can be
//! routed back to the client that asked. `kind` is `n` for integer ids and
//! `s` for everything else.

use std::fmt;

use serde_json::Value;

use crate::ids::ConnectionId;

/// Separator between token parts.
pub const DELIMITER: char = '_';

const KIND_NUMERIC: &str = "n";
const KIND_TEXT: &str = "s";
const NULL_TEXT: &str = "null";

/// Original JSON-RPC request id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestId {
    /// Integer id.
    Numeric(i64),
    /// Integer id above `i64::MAX`.
    Unsigned(u64),
    /// String id, or any non-integer value in its compact JSON form.
    Text(String),
    /// Explicit `null`.
    Null,
}

impl RequestId {
    /// Interpret a JSON `id` value.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::String(s) => Self::Text(s.clone()),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Numeric)
                .or_else(|| n.as_u64().map(Self::Unsigned))
                .unwrap_or_else(|| Self::Text(n.to_string())),
            other => Self::Text(other.to_string()),
        }
    }

    /// Convert back into a JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Numeric(n) => Value::from(n),
            Self::Unsigned(n) => Value::from(n),
            Self::Text(s) => Value::String(s),
            Self::Null => Value::Null,
        }
    }

    const fn kind(&self) -> &'static str {
        match self {
            Self::Numeric(_) | Self::Unsigned(_) => KIND_NUMERIC,
            Self::Text(_) | Self::Null => KIND_TEXT,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(n) => write!(f, "{n}"),
            Self::Unsigned(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
            Self::Null => f.write_str(NULL_TEXT),
        }
    }
}

/// Embed a connection id into a request id.
#[must_use]
pub fn encode(original: &RequestId, connection_id: ConnectionId) -> String {
    format!(
        "{connection_id}{DELIMITER}{}{DELIMITER}{original}",
        original.kind()
    )
}

/// Recover the connection id and original request id from a token.
///
/// Returns `None` when the token does not have three parts, the first part is
/// not a connection id, or the kind tag is unknown.
#[must_use]
pub fn decode(token: &str) -> Option<(ConnectionId, RequestId)> {
    let mut parts = token.splitn(3, DELIMITER);
    let connection_id = parts.next()?.parse::<ConnectionId>().ok()?;
    let kind = parts.next()?;
    let rest = parts.next()?;

    let original = match kind {
        KIND_NUMERIC => rest
            .parse::<i64>()
            .map(RequestId::Numeric)
            .or_else(|_| rest.parse::<u64>().map(RequestId::Unsigned))
            .unwrap_or_else(|_| RequestId::Text(rest.to_string())),
        KIND_TEXT if rest == NULL_TEXT => RequestId::Null,
        KIND_TEXT => RequestId::Text(rest.to_string()),
        _ => return None,
    };

    Some((connection_id, original))
}

/// Rewrite a message's `id` so its response can be routed back.
///
/// Objects whose `id` is absent or `null` are returned unchanged, as are
/// non-object payloads.
#[must_use]
pub fn transform_message(mut message: Value, connection_id: ConnectionId) -> Value {
    if let Some(id) = message.as_object_mut().and_then(|obj| obj.get_mut("id")) {
        if !id.is_null() {
            let token = encode(&RequestId::from_value(id), connection_id);
            *id = Value::String(token);
        }
    }
    message
}

/// Restore the original `id` of a response.
///
/// Returns the connection the response belongs to, or `None` with the
/// message untouched when its `id` is not a correlation token.
#[must_use]
pub fn restore_message(mut message: Value) -> (Option<ConnectionId>, Value) {
    let decoded = message
        .get("id")
        .and_then(Value::as_str)
        .and_then(decode);

    match decoded {
        Some((connection_id, original)) => {
            if let Some(obj) = message.as_object_mut() {
                obj.insert("id".to_string(), original.into_value());
            }
            (Some(connection_id), message)
        }
        None => (None, message),
    }
}
