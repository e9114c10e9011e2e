//! End-to-end relaying over real WebSocket connections.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use agent_relay_server::{build_app, settings::RelaySettings};
use agent_relay_session::Registry;
use agent_relay_transport::TokenAgentResolver;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

async fn spawn_relay() -> (SocketAddr, Arc<Registry>) {
    let (app, registry) = build_app(&RelaySettings::default());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, registry)
}

async fn connect(addr: SocketAddr, path: &str, agent_id: &str) -> Ws {
    let token = TokenAgentResolver::encode_token(agent_id);
    let (ws, _) = connect_async(format!("ws://{addr}{path}?token={token}"))
        .await
        .unwrap();
    ws
}

async fn connect_backend(addr: SocketAddr, registry: &Registry, agent_id: &str) -> Ws {
    let ws = connect(addr, "/mcp_endpoint/mcp/", agent_id).await;
    tokio::time::timeout(WAIT, async {
        while !registry.is_backend_connected(agent_id).await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    ws
}

async fn next_message(ws: &mut Ws) -> Message {
    tokio::time::timeout(WAIT, ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap()
}

async fn next_json(ws: &mut Ws) -> Value {
    loop {
        if let Message::Text(text) = next_message(ws).await {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn send_json(ws: &mut Ws, value: &Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

#[tokio::test]
async fn test_responses_return_to_the_requesting_client() {
    let (addr, registry) = spawn_relay().await;
    let mut backend = connect_backend(addr, &registry, "agent").await;
    let mut alice = connect(addr, "/mcp_endpoint/call/", "agent").await;
    let mut bob = connect(addr, "/mcp_endpoint/call/", "agent").await;

    send_json(&mut alice, &json!({"jsonrpc": "2.0", "id": 1, "method": "alice"})).await;
    send_json(&mut bob, &json!({"jsonrpc": "2.0", "id": 1, "method": "bob"})).await;

    // Echo each request's method back under its rewritten id.
    for _ in 0..2 {
        let request = next_json(&mut backend).await;
        let id = request["id"].as_str().unwrap().to_string();
        assert!(id.ends_with("_n_1"), "unexpected id {id}");
        let reply = json!({"jsonrpc": "2.0", "id": id, "result": request["method"].clone()});
        send_json(&mut backend, &reply).await;
    }

    assert_eq!(
        next_json(&mut alice).await,
        json!({"jsonrpc": "2.0", "id": 1, "result": "alice"})
    );
    assert_eq!(
        next_json(&mut bob).await,
        json!({"jsonrpc": "2.0", "id": 1, "result": "bob"})
    );
}

#[tokio::test]
async fn test_notifications_pass_through_unchanged() {
    let (addr, registry) = spawn_relay().await;
    let mut backend = connect_backend(addr, &registry, "agent").await;
    let mut client = connect(addr, "/mcp_endpoint/call/", "agent").await;

    let notification = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
    send_json(&mut client, &notification).await;

    assert_eq!(next_json(&mut backend).await, notification);
}

#[tokio::test]
async fn test_unreachable_backend_returns_error() {
    let (addr, _registry) = spawn_relay().await;
    let mut client = connect(addr, "/mcp_endpoint/call/", "lonely").await;

    send_json(&mut client, &json!({"jsonrpc": "2.0", "id": 7, "method": "tools/list"})).await;

    let reply = next_json(&mut client).await;
    assert_eq!(reply["id"], json!(7));
    assert_eq!(reply["error"]["code"], json!(-32001));
    assert_eq!(reply["error"]["data"]["agent_id"], json!("lonely"));
}

#[tokio::test]
async fn test_invalid_token_closed_with_policy_violation() {
    let (addr, registry) = spawn_relay().await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/mcp_endpoint/call/?token=garbage"))
        .await
        .unwrap();

    match next_message(&mut ws).await {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 1008),
        other => panic!("expected close frame, got {other:?}"),
    }
    assert_eq!(registry.stats().await.total_connections, 0);
}

#[tokio::test]
async fn test_new_backend_replaces_old() {
    let (addr, registry) = spawn_relay().await;
    let mut old = connect_backend(addr, &registry, "agent").await;
    let first = registry.backend("agent").await.unwrap().connection_id;

    let mut new = connect(addr, "/mcp_endpoint/mcp/", "agent").await;
    match next_message(&mut old).await {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 1000),
        other => panic!("expected close frame, got {other:?}"),
    }

    // Traffic now reaches the replacement.
    let mut client = connect(addr, "/mcp_endpoint/call/", "agent").await;
    send_json(&mut client, &json!({"jsonrpc": "2.0", "id": "x", "method": "ping"})).await;
    assert_eq!(next_json(&mut new).await["method"], json!("ping"));

    let current = registry.backend("agent").await.unwrap().connection_id;
    assert_ne!(current, first);
}

#[tokio::test]
async fn test_client_departure_unregisters() {
    let (addr, registry) = spawn_relay().await;
    let mut client = connect(addr, "/mcp_endpoint/call/", "agent").await;
    tokio::time::timeout(WAIT, async {
        while !registry.is_client_connected("agent").await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    client.close(None).await.unwrap();

    tokio::time::timeout(WAIT, async {
        while registry.is_client_connected("agent").await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}
