//! Snapshot fetching for the polling fallback.

use std::time::Duration;

use async_trait::async_trait;
use hearth_core::protocol::EntityState;
use reqwest::StatusCode;
use reqwest::header::COOKIE;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::ClientError;

/// Source of full state snapshots.
#[async_trait]
pub trait StateFetcher: Send + Sync + 'static {
    async fn fetch_states(&self) -> Result<Vec<EntityState>, ClientError>;
}

/// Fetches `GET /api/hub/states` from the relay with the session cookie.
pub struct HttpStateFetcher {
    http: reqwest::Client,
    url: String,
    cookie: Option<String>,
}

impl HttpStateFetcher {
    /// `base_url` is the relay origin, e.g. `https://dash.example`.
    pub fn new(
        base_url: &str,
        cookie: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Fetch(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            url: format!("{}/api/hub/states", base_url.trim_end_matches('/')),
            cookie,
        })
    }

    /// Derive the relay origin from the socket URL in `config`.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let base = http_origin(&config.url)?;
        Self::new(&base, config.cookie.clone(), config.request_timeout)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl StateFetcher for HttpStateFetcher {
    async fn fetch_states(&self) -> Result<Vec<EntityState>, ClientError> {
        let mut request = self.http.get(&self.url);
        if let Some(cookie) = &self.cookie {
            request = request.header(COOKIE, cookie);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ClientError::Fetch(e.to_string()))?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ClientError::Fetch(format!("Session rejected ({status})")));
        }
        if !status.is_success() {
            return Err(ClientError::Fetch(format!("Relay returned {status}")));
        }

        let states: Vec<EntityState> = response
            .json()
            .await
            .map_err(|e| ClientError::Fetch(format!("Invalid states payload: {e}")))?;
        debug!(entities = states.len(), "Fetched state snapshot");
        Ok(states)
    }
}

/// `wss://host:port/ws/ha` -> `https://host:port`.
pub fn http_origin(socket_url: &str) -> Result<String, ClientError> {
    let (scheme, rest) = if let Some(rest) = socket_url.strip_prefix("wss://") {
        ("https", rest)
    } else if let Some(rest) = socket_url.strip_prefix("ws://") {
        ("http", rest)
    } else if let Some(rest) = socket_url.strip_prefix("https://") {
        ("https", rest)
    } else if let Some(rest) = socket_url.strip_prefix("http://") {
        ("http", rest)
    } else {
        return Err(ClientError::InvalidUrl(socket_url.to_string()));
    };
    let host = rest.split('/').next().unwrap_or_default();
    if host.is_empty() {
        return Err(ClientError::InvalidUrl(socket_url.to_string()));
    }
    Ok(format!("{scheme}://{host}"))
}
