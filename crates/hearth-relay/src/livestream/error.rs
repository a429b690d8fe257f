use hearth_core::CloseCode;
use hearth_crypto::CryptoError;

use crate::credentials::CredentialError;
use crate::storage::DatabaseError;

/// Why a livestream could not be started.
#[derive(Debug, thiserror::Error)]
pub enum LivestreamError {
    #[error("controller is not configured ({0} missing)")]
    NotConfigured(String),

    #[error("controller credentials could not be decrypted")]
    Credentials(#[source] CryptoError),

    #[error("controller unavailable: {0}")]
    ControllerUnavailable(String),

    #[error("controller rejected credentials")]
    ControllerAuthRejected,

    #[error("camera not found: {0}")]
    CameraNotFound(String),

    #[error("stream failed: {0}")]
    Stream(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl LivestreamError {
    pub const fn close_code(&self) -> CloseCode {
        CloseCode::StreamStartFailed
    }
}

impl From<CredentialError> for LivestreamError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::NotConfigured(purpose) => Self::NotConfigured(purpose.to_string()),
            CredentialError::Unreadable { source, .. } | CredentialError::Seal(source) => {
                Self::Credentials(source)
            }
            CredentialError::Database(e) => Self::Database(e),
        }
    }
}
