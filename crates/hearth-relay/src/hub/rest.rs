//! Hub REST client backing the polling fallback.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde_json::Value;
use tracing::debug;

use super::error::RelayError;
use crate::credentials::CredentialStore;
use crate::tls;

pub struct HubRestClient {
    http: reqwest::Client,
    credentials: Arc<CredentialStore>,
}

impl HubRestClient {
    pub fn new(credentials: Arc<CredentialStore>, timeout: Duration) -> Result<Self, RelayError> {
        tls::install_crypto_provider();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::UpstreamUnavailable(e.to_string()))?;
        Ok(Self { http, credentials })
    }

    /// Full entity snapshot from `GET {hub}/api/states`, returned verbatim.
    pub async fn states(&self) -> Result<Value, RelayError> {
        let hub = self.credentials.hub().await?;
        let url = format!("{}/api/states", hub.url.trim_end_matches('/'));
        let bearer = HeaderValue::from_str(&format!("Bearer {}", hub.token))
            .map_err(|_| RelayError::UpstreamAuthRejected("token is not a valid header".into()))?;

        let resp = self
            .http
            .get(&url)
            .header(AUTHORIZATION, bearer)
            .send()
            .await
            .map_err(|e| RelayError::UpstreamUnavailable(e.to_string()))?;

        match resp.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(RelayError::UpstreamAuthRejected(format!(
                    "hub answered {}",
                    resp.status().as_u16()
                )));
            }
            s if !s.is_success() => {
                return Err(RelayError::UpstreamUnavailable(format!(
                    "hub answered {}",
                    s.as_u16()
                )));
            }
            _ => {}
        }

        let states: Value = resp
            .json()
            .await
            .map_err(|e| RelayError::UpstreamUnavailable(e.to_string()))?;
        debug!(
            count = states.as_array().map_or(0, Vec::len),
            "Fetched hub state snapshot"
        );
        Ok(states)
    }
}
