//! Socket transport for the hub client.
//!
//! The client task only ever sees text frames through a [`Link`]; the
//! WebSocket itself is driven by a spawned pump task. Dropping the link's
//! outbound sender closes the socket, and the inbound receiver ends when the
//! socket does. The remote close code, if any, is readable once it has.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::ClientError;

const LINK_BUFFER: usize = 128;

/// One open socket, as a pair of text-frame channels.
pub struct Link {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
    closed: oneshot::Receiver<u16>,
}

/// The socket side of a [`Link`].
pub struct Peer {
    /// Frames the client sent.
    pub sent: mpsc::Receiver<String>,
    /// Frames for the client to receive.
    pub deliver: mpsc::Sender<String>,
    /// Close code from the remote. Send it before dropping `deliver`.
    pub close: oneshot::Sender<u16>,
}

impl Link {
    pub fn pair(buffer: usize) -> (Self, Peer) {
        let (out_tx, out_rx) = mpsc::channel(buffer);
        let (in_tx, in_rx) = mpsc::channel(buffer);
        let (close_tx, close_rx) = oneshot::channel();
        (
            Self {
                outbound: out_tx,
                inbound: in_rx,
                closed: close_rx,
            },
            Peer {
                sent: out_rx,
                deliver: in_tx,
                close: close_tx,
            },
        )
    }

    /// Close code the remote sent, once `inbound` has ended.
    pub fn close_code(&mut self) -> Option<u16> {
        self.closed.try_recv().ok()
    }
}

/// Opens links to the relay.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self) -> Result<Link, ClientError>;
}

/// WebSocket transport carrying the session cookie on the upgrade request.
pub struct TungsteniteTransport {
    url: String,
    cookie: Option<String>,
    connect_timeout: Duration,
}

impl TungsteniteTransport {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            url: config.url.clone(),
            cookie: config.cookie.clone(),
            connect_timeout: config.connect_timeout,
        }
    }

    fn request(&self) -> Result<Request, ClientError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        if let Some(cookie) = &self.cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| ClientError::InvalidUrl(format!("Invalid cookie header: {e}")))?;
            request.headers_mut().insert(COOKIE, value);
        }
        Ok(request)
    }
}

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn open(&self) -> Result<Link, ClientError> {
        // wss:// needs a process-level provider; a second install is a no-op.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let request = self.request()?;
        let (socket, _response) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| ClientError::ConnectFailed("Timed out".into()))?
            .map_err(|e| upgrade_error(&e))?;

        debug!(url = %self.url, "Socket open");
        let (link, peer) = Link::pair(LINK_BUFFER);
        tokio::spawn(pump(socket, peer));
        Ok(link)
    }
}

fn upgrade_error(e: &WsError) -> ClientError {
    match e {
        WsError::Http(response) => refused_upgrade(response.status()),
        other => ClientError::ConnectFailed(other.to_string()),
    }
}

/// 401 and 403 mean the relay refused the session or origin; anything else
/// is worth retrying.
fn refused_upgrade(status: StatusCode) -> ClientError {
    let message = format!("Upgrade rejected with HTTP {status}");
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        ClientError::Rejected(message)
    } else {
        ClientError::ConnectFailed(message)
    }
}

async fn pump(mut socket: WebSocketStream<MaybeTlsStream<TcpStream>>, peer: Peer) {
    let Peer {
        sent: mut outbound,
        deliver: inbound,
        close,
    } = peer;
    let mut close = Some(close);
    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(text) = frame else {
                    let _ = socket.close(None).await;
                    return;
                };
                if let Err(e) = socket.send(Message::text(text)).await {
                    debug!(error = %e, "Socket send failed");
                    return;
                }
            }
            msg = socket.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if inbound.send(text.as_str().to_owned()).await.is_err() {
                        let _ = socket.close(None).await;
                        return;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    if let Some(frame) = frame {
                        let code = u16::from(frame.code);
                        info!(code, reason = %frame.reason, "Relay closed the socket");
                        if let Some(close) = close.take() {
                            let _ = close.send(code);
                        }
                    }
                    return;
                }
                // Protocol pings are answered by tungstenite; binary is not used on this endpoint.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "Socket read failed");
                    return;
                }
                None => return,
            },
        }
    }
}
