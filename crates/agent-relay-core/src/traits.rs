//! Collaborator traits: outbound sockets and agent resolution.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Policy violation, used when the agent id cannot be resolved.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Socket send error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The peer is gone; the connection will not recover.
    #[error("Connection closed")]
    Closed,
    /// Any other transport failure.
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Send side of a relayed connection.
///
/// Implementations must serialize concurrent sends so that frames from one
/// caller are delivered in call order.
#[async_trait]
pub trait RelaySocket: Send + Sync {
    /// Send a text frame.
    async fn send_text(&self, text: String) -> Result<(), SendError>;

    /// Close the connection with a status code and reason.
    async fn close(&self, code: u16, reason: &str) -> Result<(), SendError>;
}

/// Handshake data available to an [`AgentResolver`].
#[derive(Debug, Clone, Default)]
pub struct HandshakeContext {
    /// Query string parameters of the upgrade request.
    pub query: HashMap<String, String>,
}

impl HandshakeContext {
    /// Create a context from query parameters.
    #[must_use]
    pub const fn new(query: HashMap<String, String>) -> Self {
        Self { query }
    }

    /// Get a query parameter.
    #[must_use]
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }
}

/// Agent resolution error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Missing token parameter")]
    MissingToken,
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    #[error("Token carries no agentId")]
    MissingAgentId,
}

/// Resolves the agent a connection belongs to.
///
/// Implement this to plug in token validation. Any error rejects the
/// connection before it is registered.
#[async_trait]
pub trait AgentResolver: Send + Sync {
    /// Resolve the agent id for a handshake.
    async fn resolve(&self, ctx: &HandshakeContext) -> Result<String, AuthError>;
}
