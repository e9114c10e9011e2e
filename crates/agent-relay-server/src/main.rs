//! Agent relay server.
//!
//! Run with: cargo run -p agent-relay-server -- --config data/agent-relay.json
//!
//! Backends connect to `/mcp_endpoint/mcp/?token=...`, clients to
//! `/mcp_endpoint/call/?token=...`.

use std::{net::SocketAddr, path::PathBuf};

use agent_relay_server::{
    build_app,
    routes::HEALTH_PATH,
    settings::{DEFAULT_SETTINGS_PATH, ensure_admin_key, load_settings_from_path},
};
use agent_relay_transport::{
    TokenAgentResolver,
    protocol::{BACKEND_PATH, CLIENT_PATH},
};
use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Agent used in the startup hint for backend URLs.
const SAMPLE_AGENT: &str = "single_module";

#[derive(Debug, Parser)]
#[command(name = "agent-relay", version, about = "WebSocket relay between clients and agent backends")]
struct Cli {
    /// Settings file.
    #[arg(long, default_value = DEFAULT_SETTINGS_PATH)]
    config: PathBuf,
    /// Listen host (overrides settings).
    #[arg(long)]
    host: Option<String>,
    /// Listen port (overrides settings).
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = load_settings_from_path(&cli.config)
        .with_context(|| format!("Failed to load settings from {}", cli.config.display()))?;
    if let Some(host) = cli.host {
        settings.server.host = host;
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| settings.server.log_level.clone().into()),
        )
        .init();

    if ensure_admin_key(&mut settings, &cli.config)
        .with_context(|| format!("Failed to write settings to {}", cli.config.display()))?
    {
        tracing::info!("Generated admin key, saved to {}", cli.config.display());
    }

    let (app, _registry) = build_app(&settings);

    let bind = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    let addr: SocketAddr = listener.local_addr()?;

    let token = TokenAgentResolver::encode_token(SAMPLE_AGENT);
    tracing::info!("Agent relay listening on http://{addr}");
    tracing::info!(
        "Health endpoint: http://{addr}{HEALTH_PATH}?key={}",
        settings.server.key
    );
    tracing::info!("Backend endpoint: ws://{addr}{BACKEND_PATH}?token={token}");
    tracing::info!("Client endpoint: ws://{addr}{CLIENT_PATH}?token={token}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Agent relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
