//! Connection lifecycle: resolve, register, receive loop, unregister.

use std::{sync::Arc, time::Duration};

use agent_relay_core::{
    AgentResolver, AuthError, ConnectionId, HandshakeContext,
    traits::{CLOSE_NORMAL, CLOSE_POLICY_VIOLATION},
};
use agent_relay_session::{Router, SharedSocket};
use futures::{Stream, StreamExt};

use crate::protocol::Role;

/// Error reading from a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Receive error: {0}")]
pub struct ReceiveError(pub String);

/// Drives relayed connections from handshake to cleanup.
pub struct Endpoint {
    router: Router,
    resolver: Arc<dyn AgentResolver>,
    client_idle_timeout: Option<Duration>,
}

impl Endpoint {
    /// Create an endpoint.
    #[must_use]
    pub fn new(router: Router, resolver: Arc<dyn AgentResolver>) -> Self {
        Self {
            router,
            resolver,
            client_idle_timeout: None,
        }
    }

    /// Close client connections that stay silent for `timeout`.
    #[must_use]
    pub fn with_client_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.client_idle_timeout = timeout;
        self
    }

    /// The router frames are dispatched to.
    #[must_use]
    pub const fn router(&self) -> &Router {
        &self.router
    }

    /// Serve one connection until its inbound stream ends.
    ///
    /// `socket` is the connection's send side; `inbound` yields its text
    /// frames and ends when the peer closes.
    ///
    /// # Errors
    /// Returns the resolver's error if the agent id could not be resolved.
    /// The socket has been closed with a policy-violation code by then.
    pub async fn serve<S>(
        &self,
        role: Role,
        ctx: &HandshakeContext,
        socket: SharedSocket,
        inbound: S,
    ) -> Result<(), AuthError>
    where
        S: Stream<Item = Result<String, ReceiveError>> + Send,
    {
        let agent_id = match self.resolver.resolve(ctx).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("Rejecting {role} connection: {e}");
                if let Err(close_err) = socket.close(CLOSE_POLICY_VIOLATION, &e.to_string()).await {
                    tracing::warn!("Failed to close rejected {role} connection: {close_err}");
                }
                return Err(e);
            }
        };

        match role {
            Role::Backend => self.serve_backend(&agent_id, socket, inbound).await,
            Role::Client => self.serve_client(&agent_id, socket, inbound).await,
        }
        Ok(())
    }

    async fn serve_backend<S>(&self, agent_id: &str, socket: SharedSocket, inbound: S)
    where
        S: Stream<Item = Result<String, ReceiveError>> + Send,
    {
        let registry = self.router.registry();
        let connection_id = registry.register_backend(agent_id, socket).await;
        tracing::info!("Backend connection established: {agent_id}");

        tokio::pin!(inbound);
        while let Some(frame) = inbound.next().await {
            match frame {
                Ok(text) => self.router.handle_backend_frame(agent_id, &text).await,
                Err(e) => {
                    tracing::error!("Backend {agent_id} connection error: {e}");
                    break;
                }
            }
        }

        registry
            .unregister_backend_connection(agent_id, connection_id)
            .await;
        tracing::info!("Backend connection closed: {agent_id}");
    }

    async fn serve_client<S>(&self, agent_id: &str, socket: SharedSocket, inbound: S)
    where
        S: Stream<Item = Result<String, ReceiveError>> + Send,
    {
        let registry = self.router.registry();
        let connection_id = registry
            .register_client(agent_id, Arc::clone(&socket))
            .await;
        tracing::info!("Client connection established: {agent_id} ({connection_id})");

        tokio::pin!(inbound);
        loop {
            let next = match self.client_idle_timeout {
                Some(timeout) => match tokio::time::timeout(timeout, inbound.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        self.close_idle_client(agent_id, connection_id, &socket).await;
                        break;
                    }
                },
                None => inbound.next().await,
            };

            match next {
                Some(Ok(text)) => {
                    self.router
                        .handle_client_frame(agent_id, connection_id, &text)
                        .await;
                }
                Some(Err(e)) => {
                    tracing::error!("Client {connection_id} connection error: {e}");
                    break;
                }
                None => break,
            }
        }

        registry.unregister_client(connection_id).await;
        tracing::info!("Client connection closed: {agent_id} ({connection_id})");
    }

    async fn close_idle_client(&self, agent_id: &str, connection_id: ConnectionId, socket: &SharedSocket) {
        tracing::info!("Closing idle client {connection_id} of {agent_id}");
        if let Err(e) = socket.close(CLOSE_NORMAL, "idle timeout").await {
            tracing::warn!("Failed to close idle client {connection_id}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use agent_relay_core::testing::RecordingSocket;
    use agent_relay_session::Registry;
    use futures::stream;
    use serde_json::json;

    use super::*;
    use crate::{auth::TokenAgentResolver, protocol::TOKEN_PARAM};

    fn endpoint() -> Endpoint {
        let router = Router::new(Arc::new(Registry::new()));
        Endpoint::new(router, Arc::new(TokenAgentResolver))
    }

    fn ctx_for(agent_id: &str) -> HandshakeContext {
        HandshakeContext::new(HashMap::from([(
            TOKEN_PARAM.to_string(),
            TokenAgentResolver::encode_token(agent_id),
        )]))
    }

    fn frames(texts: &[&str]) -> stream::Iter<std::vec::IntoIter<Result<String, ReceiveError>>> {
        let items: Vec<_> = texts.iter().map(|t| Ok((*t).to_string())).collect();
        stream::iter(items)
    }

    #[tokio::test]
    async fn test_rejects_unresolvable_agent() {
        let endpoint = endpoint();
        let socket = RecordingSocket::new();

        let result = endpoint
            .serve(
                Role::Client,
                &HandshakeContext::default(),
                Arc::new(socket.clone()),
                frames(&[r#"{"id":1}"#]),
            )
            .await;

        assert_eq!(result, Err(AuthError::MissingToken));
        assert_eq!(socket.closes()[0].0, CLOSE_POLICY_VIOLATION);
        assert!(socket.sent().is_empty());
        assert_eq!(endpoint.router().registry().stats().await.total_connections, 0);
    }

    #[tokio::test]
    async fn test_client_unregistered_after_stream_ends() {
        let endpoint = endpoint();
        let socket = RecordingSocket::new();

        tokio_test::assert_ok!(
            endpoint
                .serve(
                    Role::Client,
                    &ctx_for("agent"),
                    Arc::new(socket.clone()),
                    frames(&[r#"{"jsonrpc":"2.0","id":7,"method":"x"}"#]),
                )
                .await
        );

        let replies = socket.sent_json();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["id"], json!(7));
        assert!(!endpoint.router().registry().is_client_connected("agent").await);
    }

    #[tokio::test]
    async fn test_client_unregistered_after_receive_error() {
        let endpoint = endpoint();
        let inbound = stream::iter(vec![
            Err(ReceiveError("reset".to_string())),
            Ok(r#"{"id":1}"#.to_string()),
        ]);
        let socket = RecordingSocket::new();

        tokio_test::assert_ok!(
            endpoint
                .serve(Role::Client, &ctx_for("agent"), Arc::new(socket.clone()), inbound)
                .await
        );

        assert!(socket.sent().is_empty());
        assert_eq!(endpoint.router().registry().stats().await.client_connections, 0);
    }

    #[tokio::test]
    async fn test_backend_relays_to_client_then_unregisters() {
        let endpoint = endpoint();
        let registry = Arc::clone(endpoint.router().registry());
        let client = RecordingSocket::new();
        let client_id = registry.register_client("agent", Arc::new(client.clone())).await;

        let response = json!({"jsonrpc": "2.0", "id": format!("{client_id}_s_abc"), "result": 1});
        let response = response.to_string();
        tokio_test::assert_ok!(
            endpoint
                .serve(
                    Role::Backend,
                    &ctx_for("agent"),
                    Arc::new(RecordingSocket::new()),
                    frames(&[response.as_str()]),
                )
                .await
        );

        assert_eq!(
            client.sent_json(),
            vec![json!({"jsonrpc": "2.0", "id": "abc", "result": 1})]
        );
        assert!(!registry.is_backend_connected("agent").await);
    }

    #[tokio::test]
    async fn test_replaced_backend_cleanup_keeps_successor() {
        let endpoint = endpoint();
        let registry = Arc::clone(endpoint.router().registry());
        let old = RecordingSocket::new();
        let ctx = ctx_for("agent");

        // The old backend's stream stays open until the new one registers.
        let (tx, rx) = futures::channel::mpsc::unbounded::<Result<String, ReceiveError>>();
        let serve_old = endpoint.serve(Role::Backend, &ctx, Arc::new(old.clone()), rx);
        let replace = async {
            while !registry.is_backend_connected("agent").await {
                tokio::task::yield_now().await;
            }
            registry
                .register_backend("agent", Arc::new(RecordingSocket::new()))
                .await;
            drop(tx);
        };
        let (result, ()) = tokio::join!(serve_old, replace);

        tokio_test::assert_ok!(result);
        assert_eq!(old.closes()[0].0, CLOSE_NORMAL);
        assert!(registry.is_backend_connected("agent").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_client_closed() {
        let endpoint = endpoint().with_client_idle_timeout(Some(Duration::from_secs(5)));
        let socket = RecordingSocket::new();

        tokio_test::assert_ok!(
            endpoint
                .serve(
                    Role::Client,
                    &ctx_for("agent"),
                    Arc::new(socket.clone()),
                    stream::pending(),
                )
                .await
        );

        assert_eq!(socket.closes(), vec![(CLOSE_NORMAL, "idle timeout".to_string())]);
        assert!(!endpoint.router().registry().is_client_connected("agent").await);
    }
}
