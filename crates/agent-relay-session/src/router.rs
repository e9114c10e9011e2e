//! Message routing between clients and backends.

use std::sync::Arc;

use agent_relay_core::{ConnectionId, RpcResponse, correlation};
use serde_json::Value;

use crate::registry::{ForwardError, Registry, preview};

/// Routes inbound frames to the opposite pool.
#[derive(Clone)]
pub struct Router {
    registry: Arc<Registry>,
}

impl Router {
    /// Create a router over a registry.
    #[must_use]
    pub const fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// The registry this router forwards through.
    #[must_use]
    pub const fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Handle a frame sent by a client.
    ///
    /// The request id is rewritten to carry the client's connection id before
    /// the frame goes to the agent's backend. If the backend is missing or the
    /// send fails, the client gets a JSON-RPC error carrying its original id.
    pub async fn handle_client_frame(&self, agent_id: &str, connection_id: ConnectionId, text: &str) {
        tracing::debug!("Client message from {agent_id} ({connection_id}): {}", preview(text));

        let message: Value = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!("Dropping malformed client frame from {connection_id}: {e}");
                return;
            }
        };

        let original_id = message.get("id").cloned().unwrap_or(Value::Null);
        let transformed = correlation::transform_message(message, connection_id);
        let new_id = transformed.get("id").cloned().unwrap_or(Value::Null);
        tracing::debug!("Rewrote id {original_id} -> {new_id}");

        let error = match self
            .registry
            .try_forward_to_backend(agent_id, transformed.to_string())
            .await
        {
            Ok(()) => return,
            Err(ForwardError::NotConnected) => {
                RpcResponse::backend_not_connected(original_id, agent_id)
            }
            Err(e) => {
                tracing::error!("Forwarding to backend {agent_id} failed: {e}");
                RpcResponse::forward_failed(original_id, agent_id)
            }
        };

        if !self
            .registry
            .forward_to_client(connection_id, error.to_text())
            .await
        {
            tracing::error!("Failed to deliver error response to client {connection_id}");
        }
    }

    /// Handle a frame sent by a backend.
    ///
    /// Frames whose id does not decode to a client of the same agent are
    /// dropped.
    pub async fn handle_backend_frame(&self, agent_id: &str, text: &str) {
        tracing::debug!("Backend message from {agent_id}: {}", preview(text));

        let message: Value = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!("Dropping malformed backend frame from {agent_id}: {e}");
                return;
            }
        };

        let (target, restored) = correlation::restore_message(message);
        let Some(connection_id) = target else {
            tracing::warn!("Dropping unroutable backend message from {agent_id}: no client id");
            return;
        };

        if let Err(e) = self
            .registry
            .try_forward_to_agent_client(agent_id, connection_id, restored.to_string())
            .await
        {
            tracing::error!("Failed to deliver backend response to client {connection_id}: {e}");
        }
    }
}
