//! WebSocket transport for relayed connections.

use std::{collections::HashMap, fmt::Display, sync::Arc};

use agent_relay_core::{HandshakeContext, RelaySocket, SendError};
use async_trait::async_trait;
use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    lifecycle::{Endpoint, ReceiveError},
    protocol::Role,
};

enum Outbound {
    Text(String),
    Close(u16, String),
}

/// Send side of a WebSocket.
///
/// Frames are queued and written by a single writer task, so concurrent
/// senders never interleave partial writes and each sender's frames keep
/// their order.
pub struct WsSocket {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl WsSocket {
    /// Spawn the writer task for a sink.
    pub fn spawn<S>(mut sink: S) -> (Self, JoinHandle<()>)
    where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: Display,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

        let writer = tokio::spawn(async move {
            while let Some(out) = rx.recv().await {
                match out {
                    Outbound::Text(text) => {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            tracing::warn!("WebSocket send failed: {e}");
                            break;
                        }
                    }
                    Outbound::Close(code, reason) => {
                        let frame = CloseFrame {
                            code,
                            reason: reason.into(),
                        };
                        if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                            tracing::warn!("WebSocket close failed: {e}");
                        }
                        break;
                    }
                }
            }
        });

        (Self { tx }, writer)
    }
}

#[async_trait]
impl RelaySocket for WsSocket {
    async fn send_text(&self, text: String) -> Result<(), SendError> {
        self.tx
            .send(Outbound::Text(text))
            .map_err(|_| SendError::Closed)
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), SendError> {
        self.tx
            .send(Outbound::Close(code, reason.to_string()))
            .map_err(|_| SendError::Closed)
    }
}

/// Text frames of a WebSocket, ending at the peer's close frame.
///
/// Binary frames are accepted when they hold UTF-8; ping/pong are skipped.
pub fn text_frames<S, E>(stream: S) -> impl Stream<Item = Result<String, ReceiveError>> + Send
where
    S: Stream<Item = Result<Message, E>> + Send,
    E: Display + Send,
{
    stream
        .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                Ok(Message::Binary(data)) => String::from_utf8(data.to_vec()).ok().map(Ok),
                Ok(_) => None,
                Err(e) => Some(Err(ReceiveError(e.to_string()))),
            })
        })
}

/// Shared state of the relay routes.
#[derive(Clone)]
pub struct RelayState {
    endpoint: Arc<Endpoint>,
}

impl RelayState {
    /// Create state around an endpoint.
    #[must_use]
    pub const fn new(endpoint: Arc<Endpoint>) -> Self {
        Self { endpoint }
    }
}

/// Backend WebSocket upgrade handler.
pub async fn backend_ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<RelayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, Role::Backend, query, state))
}

/// Client WebSocket upgrade handler.
pub async fn client_ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<RelayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, Role::Client, query, state))
}

async fn handle_socket(
    socket: WebSocket,
    role: Role,
    query: HashMap<String, String>,
    state: RelayState,
) {
    let (sender, receiver) = socket.split();
    let (ws_socket, writer) = WsSocket::spawn(sender);
    let ctx = HandshakeContext::new(query);

    let result = state
        .endpoint
        .serve(role, &ctx, Arc::new(ws_socket), text_frames(receiver))
        .await;

    // A rejected connection still has its close frame queued; let it flush.
    if result.is_err() {
        await_writer(role, writer).await;
    }
}

async fn await_writer(role: Role, writer: JoinHandle<()>) {
    if let Err(e) = writer.await {
        tracing::warn!("{role} writer task failed: {e}");
    }
}

/// Create the relay router with the backend and client endpoints.
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(create_relay_router(endpoint));
/// ```
#[must_use]
pub fn create_relay_router(endpoint: Arc<Endpoint>) -> axum::Router {
    axum::Router::new()
        .route(Role::Backend.path(), get(backend_ws_handler))
        .route(Role::Client.path(), get(client_ws_handler))
        .with_state(RelayState::new(endpoint))
}

#[cfg(test)]
mod tests {
    use futures::{channel::mpsc as fmpsc, stream};

    use super::*;

    #[tokio::test]
    async fn test_ws_socket_preserves_order_and_closes() {
        let (sink, mut written) = fmpsc::unbounded::<Message>();
        let (socket, writer) = WsSocket::spawn(sink);

        tokio_test::assert_ok!(socket.send_text("one".to_string()).await);
        tokio_test::assert_ok!(socket.send_text("two".to_string()).await);
        tokio_test::assert_ok!(socket.close(1000, "done").await);
        writer.await.unwrap();

        assert_eq!(written.next().await, Some(Message::Text("one".to_string().into())));
        assert_eq!(written.next().await, Some(Message::Text("two".to_string().into())));
        match written.next().await {
            Some(Message::Close(Some(frame))) => {
                assert_eq!(frame.code, 1000);
                assert_eq!(frame.reason.as_str(), "done");
            }
            other => panic!("expected close frame, got {other:?}"),
        }

        assert_eq!(socket.send_text("late".to_string()).await, Err(SendError::Closed));
    }

    #[tokio::test]
    async fn test_text_frames_filters_and_stops_at_close() {
        let messages: Vec<Result<Message, String>> = vec![
            Ok(Message::Text("a".to_string().into())),
            Ok(Message::Ping(axum::body::Bytes::new())),
            Ok(Message::Binary(b"b".to_vec().into())),
            Ok(Message::Binary(vec![0xff, 0xfe].into())),
            Ok(Message::Close(None)),
            Ok(Message::Text("after close".to_string().into())),
        ];

        let frames: Vec<_> = text_frames(stream::iter(messages)).collect().await;
        assert_eq!(frames, vec![Ok("a".to_string()), Ok("b".to_string())]);
    }

    #[tokio::test]
    async fn test_text_frames_can_be_spawned() {
        let messages: Vec<Result<Message, String>> = vec![Ok(Message::Text("a".to_string().into()))];
        let frames = tokio::spawn(async move {
            text_frames(stream::iter(messages)).collect::<Vec<_>>().await
        });
        assert_eq!(frames.await.unwrap(), vec![Ok("a".to_string())]);
    }

    #[tokio::test]
    async fn test_await_writer_tolerates_panicked_task() {
        let writer = tokio::spawn(async {
            panic!("sink gone");
        });
        await_writer(Role::Client, writer).await;
    }

    #[tokio::test]
    async fn test_text_frames_surfaces_errors() {
        let messages: Vec<Result<Message, String>> = vec![Err("reset".to_string())];
        let frames: Vec<_> = text_frames(stream::iter(messages)).collect().await;
        assert_eq!(frames, vec![Err(ReceiveError("reset".to_string()))]);
    }
}
