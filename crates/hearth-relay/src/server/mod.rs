//! HTTP and WebSocket surface of the relay.
//!
//! - `GET  /ws/ha`                       hub relay (cookie + origin)
//! - `GET  /ws/livestream/{camera_id}`   camera fan-out (cookie + origin)
//! - `POST /api/auth/login`              password login, sets the session cookie
//! - `POST /api/auth/logout`             revokes the session
//! - `GET  /api/hub/states`              hub snapshot for polling clients
//! - `GET  /health`

mod auth_routes;
mod error;
mod guard;
mod health;
mod states;
mod ws;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::auth::{OriginPolicy, SessionValidator};
use crate::hub::{HubRelay, HubRestClient};
use crate::livestream::LivestreamManager;
use crate::storage::RelayDatabase;

pub use auth_routes::{LoginRequest, LoginResponse};
pub use error::ApiError;
pub use health::HealthResponse;

#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub name: String,
    /// Adds `Secure`; set in production.
    pub secure: bool,
}

/// Shared state for every route.
#[derive(Clone)]
pub struct AppState {
    pub db: RelayDatabase,
    pub sessions: SessionValidator,
    pub origins: Arc<OriginPolicy>,
    pub cookie: CookieSettings,
    pub relay: Arc<HubRelay>,
    pub rest: Arc<HubRestClient>,
    pub livestreams: LivestreamManager,
    /// Per-viewer queue depth before media frames are dropped.
    pub subscriber_buffer: usize,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws/ha", get(ws::hub_upgrade))
        .route("/ws/livestream/{camera_id}", get(ws::livestream_upgrade))
        .route("/api/auth/login", post(auth_routes::login))
        .route("/api/auth/logout", post(auth_routes::logout))
        .route("/api/hub/states", get(states::hub_states))
        .route("/health", get(health::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
