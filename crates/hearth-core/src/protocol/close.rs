//! Application WebSocket close codes (4000-4999 private range).

/// Why the relay closed a client socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CloseCode {
    Unauthenticated = 4001,
    OriginRejected = 4002,
    HubNotConfigured = 4003,
    HubConnectFailed = 4004,
    HubAuthFailed = 4005,
    StreamStartFailed = 4006,
    /// The upstream video session ended or errored.
    StreamEnded = 4007,
    /// A stored secret failed authentication on decrypt.
    CredentialsUnreadable = 4008,
    /// The client did not complete the relayed auth handshake.
    ClientHandshakeFailed = 4009,
}

impl CloseCode {
    pub const ALL: [Self; 9] = [
        Self::Unauthenticated,
        Self::OriginRejected,
        Self::HubNotConfigured,
        Self::HubConnectFailed,
        Self::HubAuthFailed,
        Self::StreamStartFailed,
        Self::StreamEnded,
        Self::CredentialsUnreadable,
        Self::ClientHandshakeFailed,
    ];

    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Machine-readable reason sent in the close frame and error frames.
    pub const fn reason(self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::OriginRejected => "origin_rejected",
            Self::HubNotConfigured => "hub_not_configured",
            Self::HubConnectFailed => "hub_connect_failed",
            Self::HubAuthFailed => "hub_auth_failed",
            Self::StreamStartFailed => "stream_start_failed",
            Self::StreamEnded => "stream_ended",
            Self::CredentialsUnreadable => "credentials_unreadable",
            Self::ClientHandshakeFailed => "client_handshake_failed",
        }
    }

    /// Reconnecting with the same session and stored credentials cannot
    /// succeed; the client should stop and surface the error.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Unauthenticated | Self::OriginRejected | Self::HubAuthFailed
        )
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.reason(), self.code())
    }
}
