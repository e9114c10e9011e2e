//! Connection registry for backend and client pools.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use agent_relay_core::{
    ConnectionId, RelaySocket, SendError,
    traits::CLOSE_NORMAL,
};
use serde::Serialize;
use tokio::sync::Mutex;

/// Shared send handle for a registered connection.
pub type SharedSocket = Arc<dyn RelaySocket>;

/// Longest payload excerpt written to debug logs.
const PREVIEW_CHARS: usize = 100;

/// Forwarding error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ForwardError {
    #[error("No connection registered")]
    NotConnected,
    #[error("Connection closed")]
    Closed,
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Connection counts exposed to the health endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub backend_connections: usize,
    pub client_connections: usize,
    pub total_connections: usize,
    pub clients_by_agent: BTreeMap<String, usize>,
}

/// Snapshot of one registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub connection_id: ConnectionId,
    /// Registration time (Unix epoch seconds).
    pub registered_at: i64,
}

struct BackendConnection {
    connection_id: ConnectionId,
    socket: SharedSocket,
    registered_at: i64,
}

struct ClientConnection {
    agent_id: String,
    socket: SharedSocket,
    registered_at: i64,
}

#[derive(Default)]
struct Inner {
    backends: HashMap<String, BackendConnection>,
    clients: HashMap<ConnectionId, ClientConnection>,
    timestamps: HashMap<String, i64>,
}

/// Registry of live backend and client connections.
///
/// Structural changes happen under one lock. Forwarding only holds the lock
/// long enough to clone the target socket, so a slow peer never stalls
/// unrelated agents.
#[derive(Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Truncate a payload for logging.
pub(crate) fn preview(text: &str) -> &str {
    text.char_indices()
        .nth(PREVIEW_CHARS)
        .map_or(text, |(idx, _)| &text[..idx])
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the backend for an agent, closing any previous one.
    ///
    /// Returns the id of this registration, which the caller passes to
    /// [`Registry::unregister_backend_connection`] when its socket ends.
    pub async fn register_backend(&self, agent_id: &str, socket: SharedSocket) -> ConnectionId {
        let connection_id = ConnectionId::new();
        let timestamp = now();
        let mut inner = self.inner.lock().await;

        if let Some(old) = inner.backends.remove(agent_id) {
            if let Err(e) = old.socket.close(CLOSE_NORMAL, "replaced by new connection").await {
                tracing::warn!("Failed to close replaced backend for {agent_id}: {e}");
            }
            tracing::info!(
                "Backend for {agent_id} replaced ({} -> {connection_id})",
                old.connection_id
            );
        }

        inner.backends.insert(
            agent_id.to_string(),
            BackendConnection {
                connection_id,
                socket,
                registered_at: timestamp,
            },
        );
        inner.timestamps.insert(agent_id.to_string(), timestamp);
        tracing::info!("Backend registered: {agent_id}");
        connection_id
    }

    /// Register a client for an agent and return its fresh connection id.
    pub async fn register_client(&self, agent_id: &str, socket: SharedSocket) -> ConnectionId {
        let connection_id = ConnectionId::new();
        let timestamp = now();
        let mut inner = self.inner.lock().await;

        inner.clients.insert(
            connection_id,
            ClientConnection {
                agent_id: agent_id.to_string(),
                socket,
                registered_at: timestamp,
            },
        );
        inner.timestamps.insert(agent_id.to_string(), timestamp);
        tracing::info!("Client registered: {agent_id} ({connection_id})");
        connection_id
    }

    /// Remove the backend for an agent. No-op if absent.
    pub async fn unregister_backend(&self, agent_id: &str) {
        let mut inner = self.inner.lock().await;
        if inner.backends.remove(agent_id).is_some() {
            inner.timestamps.remove(agent_id);
            tracing::info!("Backend unregistered: {agent_id}");
        }
    }

    /// Remove the backend for an agent only if it is the given registration.
    ///
    /// A connection that has been replaced must not evict its successor.
    pub async fn unregister_backend_connection(&self, agent_id: &str, connection_id: ConnectionId) {
        let mut inner = self.inner.lock().await;
        let matches = inner
            .backends
            .get(agent_id)
            .is_some_and(|b| b.connection_id == connection_id);
        if matches {
            inner.backends.remove(agent_id);
            inner.timestamps.remove(agent_id);
            tracing::info!("Backend unregistered: {agent_id} ({connection_id})");
        }
    }

    /// Remove a client. No-op if absent.
    pub async fn unregister_client(&self, connection_id: ConnectionId) {
        let mut inner = self.inner.lock().await;
        if let Some(client) = inner.clients.remove(&connection_id) {
            tracing::info!("Client unregistered: {} ({connection_id})", client.agent_id);
        }
    }

    /// Send a payload to an agent's backend.
    ///
    /// # Errors
    /// Returns [`ForwardError::NotConnected`] if no backend is registered,
    /// [`ForwardError::Closed`] (after unregistering it) if the backend is
    /// gone, or [`ForwardError::Transport`] for other send failures.
    pub async fn try_forward_to_backend(
        &self,
        agent_id: &str,
        payload: String,
    ) -> Result<(), ForwardError> {
        let target = {
            let inner = self.inner.lock().await;
            inner
                .backends
                .get(agent_id)
                .map(|b| (b.connection_id, Arc::clone(&b.socket)))
        };
        let Some((connection_id, socket)) = target else {
            tracing::warn!("Backend not connected: {agent_id}");
            return Err(ForwardError::NotConnected);
        };

        tracing::debug!("Forwarding to backend {agent_id}: {}", preview(&payload));
        match socket.send_text(payload).await {
            Ok(()) => Ok(()),
            Err(SendError::Closed) => {
                tracing::warn!("Backend connection closed: {agent_id}");
                self.unregister_backend_connection(agent_id, connection_id)
                    .await;
                Err(ForwardError::Closed)
            }
            Err(SendError::Transport(e)) => {
                tracing::error!("Failed to forward to backend {agent_id}: {e}");
                Err(ForwardError::Transport(e))
            }
        }
    }

    /// Send a payload to a specific client.
    ///
    /// # Errors
    /// Same contract as [`Registry::try_forward_to_backend`].
    pub async fn try_forward_to_client(
        &self,
        connection_id: ConnectionId,
        payload: String,
    ) -> Result<(), ForwardError> {
        self.send_to_client(None, connection_id, payload).await
    }

    /// Send a payload to a client of `agent_id`.
    ///
    /// A client registered under another agent counts as not connected.
    ///
    /// # Errors
    /// Same contract as [`Registry::try_forward_to_backend`].
    pub async fn try_forward_to_agent_client(
        &self,
        agent_id: &str,
        connection_id: ConnectionId,
        payload: String,
    ) -> Result<(), ForwardError> {
        self.send_to_client(Some(agent_id), connection_id, payload)
            .await
    }

    async fn send_to_client(
        &self,
        agent_id: Option<&str>,
        connection_id: ConnectionId,
        payload: String,
    ) -> Result<(), ForwardError> {
        let socket = {
            let inner = self.inner.lock().await;
            inner
                .clients
                .get(&connection_id)
                .filter(|c| agent_id.is_none_or(|agent| c.agent_id == agent))
                .map(|c| Arc::clone(&c.socket))
        };
        let Some(socket) = socket else {
            tracing::warn!("Client not connected: {connection_id}");
            return Err(ForwardError::NotConnected);
        };

        tracing::debug!("Forwarding to client {connection_id}: {}", preview(&payload));
        match socket.send_text(payload).await {
            Ok(()) => Ok(()),
            Err(SendError::Closed) => {
                tracing::warn!("Client connection closed: {connection_id}");
                self.unregister_client(connection_id).await;
                Err(ForwardError::Closed)
            }
            Err(SendError::Transport(e)) => {
                tracing::error!("Failed to forward to client {connection_id}: {e}");
                Err(ForwardError::Transport(e))
            }
        }
    }

    /// Send a payload to an agent's backend, reporting only success.
    pub async fn forward_to_backend(&self, agent_id: &str, payload: String) -> bool {
        self.try_forward_to_backend(agent_id, payload).await.is_ok()
    }

    /// Send a payload to a specific client, reporting only success.
    pub async fn forward_to_client(&self, connection_id: ConnectionId, payload: String) -> bool {
        self.try_forward_to_client(connection_id, payload)
            .await
            .is_ok()
    }

    /// Snapshot of connection counts.
    pub async fn stats(&self) -> ConnectionStats {
        let inner = self.inner.lock().await;
        let mut clients_by_agent = BTreeMap::new();
        for client in inner.clients.values() {
            *clients_by_agent.entry(client.agent_id.clone()).or_insert(0) += 1;
        }
        ConnectionStats {
            backend_connections: inner.backends.len(),
            client_connections: inner.clients.len(),
            total_connections: inner.backends.len() + inner.clients.len(),
            clients_by_agent,
        }
    }

    /// Whether an agent has a backend registered.
    pub async fn is_backend_connected(&self, agent_id: &str) -> bool {
        self.inner.lock().await.backends.contains_key(agent_id)
    }

    /// Whether any client of an agent is registered.
    pub async fn is_client_connected(&self, agent_id: &str) -> bool {
        self.inner
            .lock()
            .await
            .clients
            .values()
            .any(|c| c.agent_id == agent_id)
    }

    /// The backend registered for an agent.
    pub async fn backend(&self, agent_id: &str) -> Option<ConnectionInfo> {
        self.inner
            .lock()
            .await
            .backends
            .get(agent_id)
            .map(|b| ConnectionInfo {
                connection_id: b.connection_id,
                registered_at: b.registered_at,
            })
    }

    /// Clients registered for an agent, oldest first.
    pub async fn clients_for_agent(&self, agent_id: &str) -> Vec<ConnectionInfo> {
        let inner = self.inner.lock().await;
        let mut clients: Vec<ConnectionInfo> = inner
            .clients
            .iter()
            .filter(|(_, c)| c.agent_id == agent_id)
            .map(|(id, c)| ConnectionInfo {
                connection_id: *id,
                registered_at: c.registered_at,
            })
            .collect();
        clients.sort_by_key(|c| c.registered_at);
        clients
    }

    /// Last time any connection registered for an agent (Unix epoch seconds).
    pub async fn last_registered_at(&self, agent_id: &str) -> Option<i64> {
        self.inner.lock().await.timestamps.get(agent_id).copied()
    }
}
