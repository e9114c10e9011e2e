//! Agent relay server: settings, HTTP routes and app assembly.

pub mod routes;
pub mod settings;

use std::{sync::Arc, time::Duration};

use agent_relay_session::{Registry, Router as MessageRouter};
use agent_relay_transport::{Endpoint, TokenAgentResolver, create_relay_router};
use axum::{Router, http::HeaderValue};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    routes::{AppState, create_http_router},
    settings::{RelaySettings, SecuritySettings},
};

/// Assemble the relay app.
///
/// Returns the router and the registry it serves, so callers can inspect
/// connection state.
pub fn build_app(settings: &RelaySettings) -> (Router, Arc<Registry>) {
    let registry = Arc::new(Registry::new());

    let endpoint = Endpoint::new(
        MessageRouter::new(Arc::clone(&registry)),
        Arc::new(TokenAgentResolver),
    )
    .with_client_idle_timeout(
        settings
            .server
            .client_idle_timeout_secs
            .map(Duration::from_secs),
    );

    let state = AppState::new(Arc::clone(&registry), &settings.server.key);
    let mut app = create_http_router(state)
        .merge(create_relay_router(Arc::new(endpoint)))
        .layer(TraceLayer::new_for_http());

    if settings.security.enable_cors {
        app = app.layer(cors_layer(&settings.security));
    }

    (app, registry)
}

fn cors_layer(security: &SecuritySettings) -> CorsLayer {
    let origins = security.allowed_origins.trim();
    let allow_origin = if origins == "*" {
        AllowOrigin::from(Any)
    } else {
        let list: Vec<HeaderValue> = origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!("Ignoring invalid CORS origin: {o}");
                    None
                }
            })
            .collect();
        AllowOrigin::list(list)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}
