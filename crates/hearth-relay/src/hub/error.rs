//! Hub relay errors.

use hearth_core::CloseCode;
use hearth_crypto::CryptoError;

use crate::credentials::CredentialError;
use crate::storage::DatabaseError;

/// Everything that can end a relay session early.
///
/// Each variant closes the client socket with its own [`CloseCode`].
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("no valid session")]
    Unauthenticated,

    #[error("origin not allowed")]
    OriginRejected,

    #[error("hub is not configured ({0} missing)")]
    NotConfigured(String),

    #[error("stored hub credentials could not be decrypted")]
    DecryptionFailure(#[source] CryptoError),

    #[error("hub unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("hub rejected credentials: {0}")]
    UpstreamAuthRejected(String),

    #[error("client handshake failed: {0}")]
    ClientHandshake(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl RelayError {
    pub const fn close_code(&self) -> CloseCode {
        match self {
            Self::Unauthenticated => CloseCode::Unauthenticated,
            Self::OriginRejected => CloseCode::OriginRejected,
            Self::NotConfigured(_) => CloseCode::HubNotConfigured,
            Self::UpstreamUnavailable(_) => CloseCode::HubConnectFailed,
            Self::UpstreamAuthRejected(_) => CloseCode::HubAuthFailed,
            Self::DecryptionFailure(_) | Self::Database(_) => CloseCode::CredentialsUnreadable,
            Self::ClientHandshake(_) => CloseCode::ClientHandshakeFailed,
        }
    }
}

impl From<CredentialError> for RelayError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::NotConfigured(purpose) => Self::NotConfigured(purpose.to_string()),
            CredentialError::Unreadable { source, .. } | CredentialError::Seal(source) => {
                Self::DecryptionFailure(source)
            }
            CredentialError::Database(e) => Self::Database(e),
        }
    }
}
