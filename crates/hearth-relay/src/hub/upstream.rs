//! Upstream hub socket: connect and authenticate.

use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use hearth_core::HubMessage;
use hearth_core::protocol::parse_frame;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use super::error::RelayError;
use crate::tls;

pub type HubSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WEBSOCKET_PATH: &str = "/api/websocket";

/// Map a hub base URL onto its WebSocket endpoint.
///
/// `http://hub:8123/` → `ws://hub:8123/api/websocket`.
pub fn websocket_url(base_url: &str) -> Result<String, RelayError> {
    let base = base_url.trim().trim_end_matches('/');
    let ws = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_string()
    } else {
        return Err(RelayError::UpstreamUnavailable(format!(
            "unsupported hub url: {base}"
        )));
    };
    Ok(format!("{ws}{WEBSOCKET_PATH}"))
}

#[derive(Debug, Clone)]
pub struct UpstreamConnector {
    connect_timeout: Duration,
}

impl UpstreamConnector {
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Open the hub socket, bounded by the connect timeout.
    pub async fn connect(&self, base_url: &str) -> Result<HubSocket, RelayError> {
        let url = websocket_url(base_url)?;
        tls::install_crypto_provider();
        debug!(url = %url, "Connecting to hub");

        match tokio::time::timeout(self.connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((socket, _response))) => Ok(socket),
            Ok(Err(e)) => Err(RelayError::UpstreamUnavailable(e.to_string())),
            Err(_) => Err(RelayError::UpstreamUnavailable(format!(
                "connect timed out after {}s",
                self.connect_timeout.as_secs()
            ))),
        }
    }
}

/// Run the hub's challenge/response on a fresh socket.
///
/// Returns the raw `auth_ok` frame so it can be forwarded to the client
/// unchanged.
pub async fn authenticate_upstream<S>(
    socket: &mut S,
    token: &str,
    timeout: Duration,
) -> Result<String, RelayError>
where
    S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
{
    let challenge = next_text(socket, timeout).await?;
    match parse_frame(&challenge) {
        Ok(HubMessage::AuthRequired { .. }) => {}
        Ok(other) => {
            return Err(RelayError::UpstreamUnavailable(format!(
                "expected auth_required, got {}",
                other.msg_type()
            )));
        }
        Err(e) => return Err(RelayError::UpstreamUnavailable(e.to_string())),
    }

    let auth = HubMessage::Auth {
        access_token: token.to_string(),
    }
    .encode()
    .map_err(|e| RelayError::UpstreamUnavailable(e.to_string()))?;
    socket
        .send(Message::text(auth))
        .await
        .map_err(|e| RelayError::UpstreamUnavailable(e.to_string()))?;

    let reply = next_text(socket, timeout).await?;
    match parse_frame(&reply) {
        Ok(HubMessage::AuthOk { .. }) => Ok(reply),
        Ok(HubMessage::AuthInvalid { message }) => Err(RelayError::UpstreamAuthRejected(
            message.unwrap_or_else(|| "auth_invalid".into()),
        )),
        Ok(other) => Err(RelayError::UpstreamUnavailable(format!(
            "expected auth_ok, got {}",
            other.msg_type()
        ))),
        Err(e) => Err(RelayError::UpstreamUnavailable(e.to_string())),
    }
}

async fn next_text<S>(socket: &mut S, timeout: Duration) -> Result<String, RelayError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let read = async {
        while let Some(msg) = socket.next().await {
            match msg {
                Ok(Message::Text(text)) => return Ok(text.as_str().to_owned()),
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => return Err(RelayError::UpstreamUnavailable(e.to_string())),
            }
        }
        Err(RelayError::UpstreamUnavailable(
            "hub closed during handshake".into(),
        ))
    };
    tokio::time::timeout(timeout, read)
        .await
        .map_err(|_| RelayError::UpstreamUnavailable("hub handshake timed out".into()))?
}
