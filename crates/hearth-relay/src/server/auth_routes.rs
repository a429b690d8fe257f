//! Login and logout.

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::header::SET_COOKIE;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::AppState;
use super::error::ApiError;
use crate::auth::cookie::{cleared_cookie, session_cookie, session_token};
use crate::auth::password;
use crate::storage::DatabaseError;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: String,
    pub username: String,
    pub expires_at: i64,
}

/// `POST /api/auth/login`
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let user = match state.db.get_user_by_username(&req.username).await {
        Ok(user) => Some(user),
        Err(DatabaseError::NotFound(_)) => None,
        Err(e) => return Err(e.into()),
    };

    let stored_hash = user.as_ref().map(|u| u.password_hash.clone());
    let password_in = req.password;
    let valid = tokio::task::spawn_blocking(move || match stored_hash {
        Some(hash) => password::verify_password(&password_in, &hash).unwrap_or(false),
        None => password::verify_dummy(&password_in),
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    let Some(user) = user.filter(|_| valid) else {
        warn!(username = %req.username, "Login failed");
        return Err(ApiError::InvalidCredentials);
    };

    let issued = state.sessions.create_session(&user.id).await?;
    info!(user_id = %user.id, "User logged in");

    let cookie = session_cookie(
        &state.cookie.name,
        &issued.token,
        state.sessions.ttl_secs(),
        state.cookie.secure,
    );
    let body = LoginResponse {
        user_id: user.id,
        username: user.username,
        expires_at: issued.expires_at,
    };
    Ok(([(SET_COOKIE, cookie)], Json(body)).into_response())
}

/// `POST /api/auth/logout`
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    if let Some(token) = session_token(&headers, &state.cookie.name) {
        if state.sessions.revoke(token).await? {
            info!("Session revoked");
        }
    }
    let cookie = cleared_cookie(&state.cookie.name, state.cookie.secure);
    Ok(([(SET_COOKIE, cookie)], Json(serde_json::json!({ "ok": true }))).into_response())
}
