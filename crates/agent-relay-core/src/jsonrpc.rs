//! JSON-RPC 2.0 envelopes synthesized by the relay.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// No backend is registered for the agent.
pub const BACKEND_NOT_CONNECTED: i64 = -32001;
/// A backend is registered but the send failed.
pub const FORWARD_FAILED: i64 = -32002;
/// Admin key missing or wrong.
pub const AUTHENTICATION_ERROR: i64 = -32003;

/// Error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    /// Create a success response.
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    #[must_use]
    pub fn error(id: Value, code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data,
            }),
        }
    }

    /// Error returned to a client whose agent has no backend.
    #[must_use]
    pub fn backend_not_connected(id: Value, agent_id: &str) -> Self {
        Self::error(
            id,
            BACKEND_NOT_CONNECTED,
            "Backend not connected",
            Some(json!({ "agent_id": agent_id })),
        )
    }

    /// Error returned to a client when forwarding to its backend failed.
    #[must_use]
    pub fn forward_failed(id: Value, agent_id: &str) -> Self {
        Self::error(
            id,
            FORWARD_FAILED,
            "Failed to forward message to backend",
            Some(json!({ "agent_id": agent_id })),
        )
    }

    /// Serialize to a text frame.
    #[must_use]
    pub fn to_text(&self) -> String {
        // Infallible for these field types.
        serde_json::to_string(self).unwrap_or_default()
    }
}
