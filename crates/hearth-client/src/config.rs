//! Client configuration.

use std::time::Duration;

/// Settings for one [`HubClient`](crate::HubClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay hub endpoint, e.g. `wss://dash.example/ws/ha`.
    pub url: String,
    /// `Cookie` header value carrying the session, e.g. `hearth_session=...`.
    pub cookie: Option<String>,
    /// Sent in the `auth` frame. The relay holds the real hub token, so this
    /// is usually empty.
    pub access_token: String,
    pub connect_timeout: Duration,
    /// How long a command may stay pending before it fails locally.
    pub request_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub heartbeat: HeartbeatPolicy,
    /// Refresh interval of the polling fallback.
    pub poll_interval: Duration,
}

impl ClientConfig {
    /// Create a config for `url` with defaults for everything else.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            cookie: None,
            access_token: String::new(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            reconnect: ReconnectPolicy::default(),
            heartbeat: HeartbeatPolicy::default(),
            poll_interval: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }
}

/// Capped exponential backoff between reconnect attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Factor applied per failed attempt.
    pub multiplier: u32,
    /// Maximum number of reconnect attempts (None = unlimited).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2,
            max_attempts: Some(10),
        }
    }
}

impl ReconnectPolicy {
    /// Delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Whether another attempt should be made.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }
}

/// Keep-alive pings while the socket is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatPolicy {
    pub interval: Duration,
    /// Consecutive unanswered pings that force a reconnect.
    /// `None` never treats silence as fatal.
    pub max_missed: Option<u32>,
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_missed: None,
        }
    }
}
