//! Request authentication shared by the upgrade and API routes.

use axum::http::HeaderMap;
use axum::http::header::{HOST, ORIGIN};
use tracing::{debug, warn};

use super::AppState;
use super::error::ApiError;
use crate::auth::cookie::session_token;

/// Resolve the session cookie to a user id.
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<String, ApiError> {
    let Some(token) = session_token(headers, &state.cookie.name) else {
        debug!("Request without session cookie");
        return Err(ApiError::Unauthenticated);
    };
    state
        .sessions
        .validate(token)
        .await?
        .ok_or(ApiError::Unauthenticated)
}

/// Origin check followed by session check. Runs before any upgrade.
pub async fn authorize_upgrade(state: &AppState, headers: &HeaderMap) -> Result<String, ApiError> {
    let origin = headers.get(ORIGIN).and_then(|v| v.to_str().ok());
    let host = headers.get(HOST).and_then(|v| v.to_str().ok());
    if let Err(rejected) = state.origins.check(origin, host) {
        warn!(origin = ?rejected.origin, "Upgrade rejected: origin");
        return Err(ApiError::OriginRejected);
    }
    authenticate(state, headers).await.inspect_err(|_| {
        debug!("Upgrade rejected: no valid session");
    })
}
