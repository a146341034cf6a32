//! Modelgate Server - Headless Daemon
//!
//! A pure Rust HTTP daemon that:
//! - Wires the execution pipeline (routing, fleet, tokens, quota)
//! - Runs the background token sweeper and fleet auto-sync
//! - Provides a REST API for fleet/quota/proxy status
//!
//! Request ingress (protocol parsing, auth) fronts this process separately;
//! this binary owns the core and its read-only admin surface.

use anyhow::Result;
use axum::{response::IntoResponse, routing::get, Router};
use std::net::SocketAddr;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod state;

use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Modelgate server starting...");

    let config = state::load_config()?;
    let port = config.server.port;
    let lan = config.server.allow_lan_access;

    let state = AppState::new(config).await?;
    info!("Application state initialized ({} accounts)", state.fleet_size());

    let app = build_router(state.clone());

    let host = if lan { [0, 0, 0, 0] } else { [127, 0, 0, 1] };
    let addr = SocketAddr::from((host, port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", addr);
    info!("API available at http://{}/api/", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.shutdown().await;
    info!("Modelgate server stopped");
    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/api", api::router())
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
