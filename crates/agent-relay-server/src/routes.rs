//! Plain HTTP routes: landing redirect, service info and health.

use std::sync::Arc;

use agent_relay_core::{RpcResponse, jsonrpc::AUTHENTICATION_ERROR};
use agent_relay_session::Registry;
use axum::{
    Json, Router,
    extract::{Query, State},
    response::Redirect,
    routing::get,
};
use serde::Deserialize;
use serde_json::{Value, json};

/// Base path of the relay's HTTP surface.
pub const BASE_PATH: &str = "/mcp_endpoint/";
/// Health path.
pub const HEALTH_PATH: &str = "/mcp_endpoint/health";

/// State shared by the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    registry: Arc<Registry>,
    key: Arc<str>,
}

impl AppState {
    /// Create state for the HTTP routes.
    #[must_use]
    pub fn new(registry: Arc<Registry>, key: &str) -> Self {
        Self {
            registry,
            key: Arc::from(key),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HealthQuery {
    key: Option<String>,
}

/// Create the HTTP router.
pub fn create_http_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route(BASE_PATH, get(info_handler))
        .route(HEALTH_PATH, get(health_handler))
        .with_state(state)
}

async fn root_handler() -> Redirect {
    Redirect::temporary(BASE_PATH)
}

async fn info_handler() -> Json<RpcResponse> {
    Json(RpcResponse::success(
        Value::Null,
        json!({
            "message": "Agent relay is running",
            "version": env!("CARGO_PKG_VERSION"),
            "status": "running",
        }),
    ))
}

async fn health_handler(
    State(state): State<AppState>,
    Query(query): Query<HealthQuery>,
) -> Json<RpcResponse> {
    // An unset admin key rejects every request.
    let authorized = query
        .key
        .as_deref()
        .is_some_and(|key| !key.is_empty() && key == &*state.key);
    if !authorized {
        tracing::warn!("Health check rejected: invalid key");
        return Json(RpcResponse::error(
            Value::Null,
            AUTHENTICATION_ERROR,
            "Key verification failed",
            Some(json!({ "details": "The provided key is invalid or missing" })),
        ));
    }

    let stats = state.registry.stats().await;
    Json(RpcResponse::success(
        Value::Null,
        json!({ "status": "success", "connections": stats }),
    ))
}
