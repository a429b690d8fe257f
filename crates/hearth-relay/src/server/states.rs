use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use serde_json::Value;

use super::AppState;
use super::error::ApiError;
use super::guard::authenticate;

/// `GET /api/hub/states`: full entity snapshot for the polling fallback.
pub async fn hub_states(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authenticate(&state, &headers).await?;
    Ok(Json(state.rest.states().await?))
}
