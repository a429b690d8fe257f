//! UniFi Protect controller as a livestream source.
//!
//! Login is lazy and cached per controller host. A 401 on the livestream
//! request triggers exactly one fresh login.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::SET_COOKIE;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream, connect_async_tls_with_config};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::LivestreamError;
use super::fmp4;
use super::source::{LivestreamEvent, LivestreamSource, UpstreamStream};
use crate::credentials::CredentialStore;
use crate::tls;

const SESSION_COOKIE: &str = "TOKEN";
const CSRF_HEADER: &str = "x-csrf-token";
const EVENT_BUFFER: usize = 64;

#[derive(Clone)]
struct ControllerSession {
    host: String,
    cookie: String,
    csrf: Option<String>,
}

#[derive(Deserialize)]
struct LivestreamUrl {
    url: String,
}

pub struct ProtectController {
    credentials: Arc<CredentialStore>,
    http: reqwest::Client,
    insecure_tls: bool,
    session: Mutex<Option<ControllerSession>>,
}

impl ProtectController {
    pub fn new(
        credentials: Arc<CredentialStore>,
        insecure_tls: bool,
        timeout: Duration,
    ) -> Result<Self, LivestreamError> {
        tls::install_crypto_provider();
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(insecure_tls)
            .timeout(timeout)
            .build()
            .map_err(|e| LivestreamError::ControllerUnavailable(e.to_string()))?;
        Ok(Self {
            credentials,
            http,
            insecure_tls,
            session: Mutex::new(None),
        })
    }

    async fn login(&self) -> Result<ControllerSession, LivestreamError> {
        let creds = self.credentials.controller().await?;
        let resp = self
            .http
            .post(format!("https://{}/api/auth/login", creds.host))
            .json(&serde_json::json!({
                "username": creds.username,
                "password": creds.password,
                "rememberMe": true,
            }))
            .send()
            .await
            .map_err(|e| LivestreamError::ControllerUnavailable(e.to_string()))?;

        match resp.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(LivestreamError::ControllerAuthRejected);
            }
            s if !s.is_success() => {
                return Err(LivestreamError::ControllerUnavailable(format!(
                    "login answered {}",
                    s.as_u16()
                )));
            }
            _ => {}
        }

        let cookie = resp
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(session_cookie_pair)
            .ok_or_else(|| {
                LivestreamError::ControllerUnavailable("login returned no session cookie".into())
            })?;
        let csrf = resp
            .headers()
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        info!(host = %creds.host, "Logged in to surveillance controller");
        Ok(ControllerSession {
            host: creds.host,
            cookie,
            csrf,
        })
    }

    /// Cached session, or a new login if none exists or the host changed.
    async fn session(&self, force: bool) -> Result<ControllerSession, LivestreamError> {
        let mut cached = self.session.lock().await;
        if !force {
            let host = self.credentials.controller().await?.host;
            if let Some(session) = cached.as_ref().filter(|s| s.host == host) {
                return Ok(session.clone());
            }
        }
        let session = self.login().await?;
        *cached = Some(session.clone());
        Ok(session)
    }

    async fn request_url(
        &self,
        session: &ControllerSession,
        camera_id: &str,
    ) -> Result<Result<String, StatusCode>, LivestreamError> {
        let url = format!(
            "https://{}/proxy/protect/api/ws/livestream?camera={camera_id}&channel=0&type=fmp4&fragmentDurationMillis=100&extendedVideoMetadata=true",
            session.host
        );
        let mut req = self.http.get(url).header("cookie", &session.cookie);
        if let Some(csrf) = &session.csrf {
            req = req.header(CSRF_HEADER, csrf);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| LivestreamError::ControllerUnavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Ok(Err(resp.status()));
        }
        let body: LivestreamUrl = resp
            .json()
            .await
            .map_err(|e| LivestreamError::ControllerUnavailable(e.to_string()))?;
        Ok(Ok(body.url))
    }

    /// Ask the controller for a one-shot livestream socket URL.
    async fn livestream_url(&self, camera_id: &str) -> Result<String, LivestreamError> {
        let session = self.session(false).await?;
        let status = match self.request_url(&session, camera_id).await? {
            Ok(url) => return Ok(url),
            Err(StatusCode::UNAUTHORIZED) => {
                debug!(camera_id = %camera_id, "Controller session expired; logging in again");
                let session = self.session(true).await?;
                match self.request_url(&session, camera_id).await? {
                    Ok(url) => return Ok(url),
                    Err(status) => status,
                }
            }
            Err(status) => status,
        };

        match status {
            StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => {
                Err(LivestreamError::CameraNotFound(camera_id.to_string()))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(LivestreamError::ControllerAuthRejected)
            }
            s => Err(LivestreamError::ControllerUnavailable(format!(
                "livestream request answered {}",
                s.as_u16()
            ))),
        }
    }

    async fn open(
        &self,
        url: &str,
    ) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>, LivestreamError> {
        let connector = self
            .insecure_tls
            .then(|| Connector::Rustls(tls::insecure_client_config()));
        let (socket, _) = connect_async_tls_with_config(url, None, false, connector)
            .await
            .map_err(|e| LivestreamError::Stream(e.to_string()))?;
        Ok(socket)
    }
}

#[async_trait]
impl LivestreamSource for ProtectController {
    async fn start(&self, camera_id: &str) -> Result<UpstreamStream, LivestreamError> {
        if !valid_camera_id(camera_id) {
            return Err(LivestreamError::CameraNotFound(camera_id.to_string()));
        }
        let url = self.livestream_url(camera_id).await?;
        let socket = self.open(&url).await?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let stop = CancellationToken::new();
        tokio::spawn(read_stream(
            camera_id.to_string(),
            socket,
            tx,
            stop.clone(),
        ));
        Ok(UpstreamStream { events: rx, stop })
    }
}

async fn read_stream(
    camera_id: String,
    mut socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    events: mpsc::Sender<LivestreamEvent>,
    stop: CancellationToken,
) {
    let mut codec_sent = false;
    loop {
        tokio::select! {
            () = stop.cancelled() => {
                let _ = socket.close(None).await;
                debug!(camera_id = %camera_id, "Controller livestream stopped");
                return;
            }
            msg = socket.next() => match msg {
                Some(Ok(Message::Binary(data))) => {
                    if !codec_sent {
                        if let Some(codec) = fmp4::codec_string(&data) {
                            codec_sent = true;
                            if events.send(LivestreamEvent::Codec(codec)).await.is_err() {
                                return;
                            }
                        }
                    }
                    if events.send(LivestreamEvent::Data(data)).await.is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!(camera_id = %camera_id, "Controller closed livestream");
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(camera_id = %camera_id, error = %e, "Controller livestream failed");
                    return;
                }
            }
        }
    }
}

/// `TOKEN=abc; Path=/; ...` → `TOKEN=abc`.
fn session_cookie_pair(set_cookie: &str) -> Option<String> {
    let pair = set_cookie.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    (name == SESSION_COOKIE && !value.is_empty()).then(|| pair.to_string())
}

fn valid_camera_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_session_cookie() {
        assert_eq!(
            session_cookie_pair("TOKEN=eyJh.x.y; path=/; samesite=strict; secure; httponly")
                .as_deref(),
            Some("TOKEN=eyJh.x.y")
        );
        assert_eq!(session_cookie_pair("OTHER=1; path=/"), None);
        assert_eq!(session_cookie_pair("TOKEN=; Max-Age=0"), None);
    }

    #[test]
    fn camera_ids_are_restricted() {
        assert!(valid_camera_id("65a1b2c3d4e5f60718293a4b"));
        assert!(valid_camera_id("front-door_1"));
        assert!(!valid_camera_id(""));
        assert!(!valid_camera_id("cam&channel=1"));
        assert!(!valid_camera_id("../../etc"));
    }
}
