//! HTTP error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use crate::hub::RelayError;
use crate::storage::DatabaseError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not authenticated")]
    Unauthenticated,

    #[error("origin not allowed")]
    OriginRejected,

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl ApiError {
    fn status_and_reason(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Unauthenticated => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            Self::OriginRejected => (StatusCode::FORBIDDEN, "origin_rejected"),
            Self::InvalidCredentials => (StatusCode::UNAUTHORIZED, "invalid_credentials"),
            Self::Relay(e) => {
                let status = match e {
                    RelayError::Unauthenticated => StatusCode::UNAUTHORIZED,
                    RelayError::OriginRejected => StatusCode::FORBIDDEN,
                    RelayError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
                    RelayError::UpstreamUnavailable(_)
                    | RelayError::UpstreamAuthRejected(_)
                    | RelayError::ClientHandshake(_) => StatusCode::BAD_GATEWAY,
                    RelayError::DecryptionFailure(_) | RelayError::Database(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, e.close_code().reason())
            }
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, reason) = self.status_and_reason();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        // Internal details stay in the log.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "internal error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "error": reason, "message": message }))).into_response()
    }
}
