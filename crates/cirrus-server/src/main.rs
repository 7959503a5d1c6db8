//! Cirrus node server.
//!
//! Reads configuration from environment variables (see
//! [`cirrus_server::config::Config`]), binds the local control socket and the
//! network API, then serves both until SIGINT.
//!
//! ## Quick start
//!
//! ```bash
//! CIRRUS_NODE_NAME=node1 \
//! CIRRUS_LISTEN_ADDR=10.0.0.1:9443 \
//! CIRRUS_AUTH_SECRET=$(cat /run/cirrus/secret) \
//! CIRRUS_LOG_LEVEL=debug \
//!   cargo run --bin cirrus-server --release
//! ```

use std::future::IntoFuture;
use std::sync::Arc;

use anyhow::Context;
use axum::Extension;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use cirrus_server::api::{self, AppState};
use cirrus_server::auth::Origin;
use cirrus_server::config::Config;
use cirrus_server::control;
use cirrus_server::proxy::ProxyRouter;
use cirrus_server::services::SocketServiceFactory;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────────
    let config = Config::from_env();

    let filter = EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .compact()
        .init();

    info!(
        version   = env!("CARGO_PKG_VERSION"),
        node      = %config.node_name,
        listen    = %config.listen_addr,
        advertise = %config.advertise_addr,
        "cirrus starting"
    );

    // ── Routes ────────────────────────────────────────────────────────────────
    let state = Arc::new(AppState::new(
        &config,
        Arc::new(SocketServiceFactory::new()),
        ProxyRouter::standard(),
    ));
    let app = api::router(state);

    // ── Listeners ─────────────────────────────────────────────────────────────
    let unix = control::bind(&config.control_socket)
        .with_context(|| format!("failed to bind control socket {}", config.control_socket.display()))?;
    info!(socket = %config.control_socket.display(), "control socket listening");

    let tcp = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "network API listening");

    let local_app = app.clone().layer(Extension(Origin::Local));
    let network_app = app
        .layer(Extension(Origin::Network))
        .layer(TraceLayer::new_for_http());

    tokio::select! {
        result = control::serve_unix(unix, local_app) => {
            result.context("control socket server failed")?;
        }
        result = axum::serve(tcp, network_app).into_future() => {
            result.context("network API server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
        }
    }

    if let Err(e) = std::fs::remove_file(&config.control_socket) {
        warn!(error = %e, "failed to remove control socket");
    }

    Ok(())
}
