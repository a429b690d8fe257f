//! Per-client hub relay.
//!
//! Each upgraded `/ws/ha` socket gets one task running [`HubRelay::run`]:
//!
//! ```text
//! awaiting_config -> connecting_upstream -> authenticating_upstream -> relaying -> closed
//! ```
//!
//! The relay does not retry. A failure produces one error frame and a close
//! code; the browser decides when to come back.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as ClientMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use hearth_core::HubMessage;
use hearth_core::protocol::parse_frame;
use tokio_tungstenite::tungstenite::Message as HubFrame;
use tracing::{debug, info, instrument, warn};

use super::error::RelayError;
use super::upstream::{HubSocket, UpstreamConnector, authenticate_upstream};
use crate::credentials::CredentialStore;
use crate::frames::send_error_and_close;
use crate::registry::ConnectionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayPhase {
    AwaitingConfig,
    ConnectingUpstream,
    AuthenticatingUpstream,
    Relaying,
    Closed,
}

impl RelayPhase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AwaitingConfig => "awaiting_config",
            Self::ConnectingUpstream => "connecting_upstream",
            Self::AuthenticatingUpstream => "authenticating_upstream",
            Self::Relaying => "relaying",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for RelayPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
pub struct HubRelay {
    credentials: Arc<CredentialStore>,
    connector: UpstreamConnector,
    client_auth_timeout: Duration,
    registry: ConnectionRegistry,
    #[cfg(feature = "metrics")]
    metrics: hearth_core::metrics::RelayMetrics,
}

impl HubRelay {
    pub fn new(
        credentials: Arc<CredentialStore>,
        connector: UpstreamConnector,
        client_auth_timeout: Duration,
        registry: ConnectionRegistry,
    ) -> Self {
        Self {
            credentials,
            connector,
            client_auth_timeout,
            registry,
            #[cfg(feature = "metrics")]
            metrics: hearth_core::metrics::RelayMetrics::new(),
        }
    }

    pub const fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Drive one client connection until either side closes.
    ///
    /// The caller has already checked origin and session.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn run(&self, mut client: WebSocket, user_id: String) {
        let connection_id = self.registry.register(&user_id).await;

        match self.relay(&mut client).await {
            Ok(()) => info!(connection_id = %connection_id, "Relay session ended"),
            Err(e) => {
                let code = e.close_code();
                warn!(connection_id = %connection_id, error = %e, code = code.code(), "Relay session failed");
                #[cfg(feature = "metrics")]
                self.metrics.relay_failed(code.code());
                send_error_and_close(&mut client, code, &e.to_string()).await;
            }
        }

        self.registry.unregister(&connection_id).await;
        debug!(phase = %RelayPhase::Closed, "Relay phase");
    }

    async fn relay(&self, client: &mut WebSocket) -> Result<(), RelayError> {
        enter(RelayPhase::AwaitingConfig);
        let hub = self.credentials.hub().await?;

        enter(RelayPhase::ConnectingUpstream);
        let mut upstream = self.connector.connect(&hub.url).await?;

        enter(RelayPhase::AuthenticatingUpstream);
        let auth_ok = match authenticate_upstream(
            &mut upstream,
            &hub.token,
            self.connector.connect_timeout(),
        )
        .await
        {
            Ok(frame) => frame,
            Err(e) => {
                let _ = upstream.close(None).await;
                return Err(e);
            }
        };
        drop(hub);

        if let Err(e) = self.client_handshake(client, &auth_ok).await {
            let _ = upstream.close(None).await;
            return Err(e);
        }

        enter(RelayPhase::Relaying);
        #[cfg(feature = "metrics")]
        self.metrics.relay_started();
        pump(client, &mut upstream).await
    }

    /// Replay the hub's handshake towards the browser.
    ///
    /// The browser never holds the hub token: whatever it sends as
    /// `access_token` is discarded, and it gets the hub's real `auth_ok`.
    async fn client_handshake(
        &self,
        client: &mut WebSocket,
        auth_ok: &str,
    ) -> Result<(), RelayError> {
        let challenge = HubMessage::AuthRequired { ha_version: None }
            .encode()
            .map_err(|e| RelayError::ClientHandshake(e.to_string()))?;
        client
            .send(ClientMessage::text(challenge))
            .await
            .map_err(|e| RelayError::ClientHandshake(e.to_string()))?;

        let reply = tokio::time::timeout(self.client_auth_timeout, next_client_text(client))
            .await
            .map_err(|_| RelayError::ClientHandshake("no auth frame from client".into()))??;

        match parse_frame(&reply) {
            Ok(HubMessage::Auth { .. }) => {}
            Ok(other) => {
                return Err(RelayError::ClientHandshake(format!(
                    "expected auth, got {}",
                    other.msg_type()
                )));
            }
            Err(e) => return Err(RelayError::ClientHandshake(e.to_string())),
        }

        client
            .send(ClientMessage::text(auth_ok.to_owned()))
            .await
            .map_err(|e| RelayError::ClientHandshake(e.to_string()))
    }
}

fn enter(phase: RelayPhase) {
    debug!(phase = %phase, "Relay phase");
}

async fn next_client_text(client: &mut WebSocket) -> Result<String, RelayError> {
    while let Some(msg) = client.recv().await {
        match msg {
            Ok(ClientMessage::Text(text)) => return Ok(text.as_str().to_owned()),
            Ok(ClientMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => return Err(RelayError::ClientHandshake(e.to_string())),
        }
    }
    Err(RelayError::ClientHandshake(
        "client closed during handshake".into(),
    ))
}

/// Forward frames both ways until one side closes.
///
/// Frames are passed through without inspection. Closing either side
/// closes the other before returning.
pub async fn pump(client: &mut WebSocket, upstream: &mut HubSocket) -> Result<(), RelayError> {
    let mut forwarded: u64 = 0;
    loop {
        tokio::select! {
            msg = client.recv() => match msg {
                Some(Ok(ClientMessage::Text(text))) => {
                    if let Err(e) = upstream.send(HubFrame::text(text.as_str().to_owned())).await {
                        return Err(RelayError::UpstreamUnavailable(e.to_string()));
                    }
                    forwarded += 1;
                }
                Some(Ok(ClientMessage::Binary(data))) => {
                    if let Err(e) = upstream.send(HubFrame::Binary(data)).await {
                        return Err(RelayError::UpstreamUnavailable(e.to_string()));
                    }
                    forwarded += 1;
                }
                Some(Ok(ClientMessage::Close(_))) | None => {
                    debug!(forwarded, "Client closed; closing hub socket");
                    let _ = upstream.close(None).await;
                    return Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, forwarded, "Client socket error; closing hub socket");
                    let _ = upstream.close(None).await;
                    return Ok(());
                }
            },
            msg = upstream.next() => match msg {
                Some(Ok(HubFrame::Text(text))) => {
                    if client.send(ClientMessage::text(text.as_str().to_owned())).await.is_err() {
                        let _ = upstream.close(None).await;
                        return Ok(());
                    }
                    forwarded += 1;
                }
                Some(Ok(HubFrame::Binary(data))) => {
                    if client.send(ClientMessage::Binary(data)).await.is_err() {
                        let _ = upstream.close(None).await;
                        return Ok(());
                    }
                    forwarded += 1;
                }
                Some(Ok(HubFrame::Close(_))) | None => {
                    debug!(forwarded, "Hub closed; closing client socket");
                    let _ = client.send(ClientMessage::Close(None)).await;
                    return Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return Err(RelayError::UpstreamUnavailable(e.to_string()));
                }
            },
        }
    }
}
