//! Client error types.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by [`HubClient`](crate::HubClient) and the state cache.
///
/// `Clone` so one failure can complete every waiter on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Hub rejected credentials: {0}")]
    AuthInvalid(String),

    /// The relay refused the session or origin; retrying cannot help.
    #[error("Relay refused the connection: {0}")]
    Rejected(String),

    #[error("Not connected to the hub")]
    NotConnected,

    #[error("Connection lost before a response arrived")]
    Disconnected,

    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Gave up reconnecting after {0} attempts")]
    RetriesExhausted(u32),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("State fetch failed: {0}")]
    Fetch(String),

    #[error("Client task has stopped")]
    Shutdown,
}

impl ClientError {
    /// Whether the reconnect loop should give up instead of backing off.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::AuthInvalid(_) | Self::Rejected(_))
    }
}

impl From<hearth_core::Error> for ClientError {
    fn from(e: hearth_core::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}
