use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// `ok`, or `draining` once shutdown has begun.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Which queue backend is serving requests: `durable` or `memory`.
    pub backend: &'static str,
    /// Open WebSocket connections.
    pub connections: usize,
    /// Open worker bridge connections.
    pub worker_connections: usize,
    pub accepting: bool,
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let accepting = state.is_accepting();

    Json(HealthResponse {
        status: if accepting { "ok" } else { "draining" },
        version: env!("CARGO_PKG_VERSION"),
        backend: state.backend.kind().await.as_str(),
        connections: state.ws_manager.connection_count().await,
        worker_connections: state
            .worker_bridge
            .as_ref()
            .map_or(0, |bridge| bridge.active_connections()),
        accepting,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
