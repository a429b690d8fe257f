//! Liveness endpoint.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use super::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub relay_connections: usize,
    pub livestreams: usize,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        relay_connections: state.relay.registry().connection_count().await,
        livestreams: state.livestreams.active_cameras().await.len(),
    })
}
