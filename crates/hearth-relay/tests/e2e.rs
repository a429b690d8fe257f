//! End-to-end relay tests over real loopback sockets.
//!
//! A fake hub speaks the hub's auth handshake on an ephemeral port; the relay
//! is served by axum on another; the test plays the browser with
//! tokio-tungstenite.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, mpsc};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, accept_async, connect_async};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use hearth_client::{ClientConfig, ClientError, ConnectionMode, HubClient, ModeSignal};
use hearth_crypto::{CredentialVault, KeySource, VaultKey};
use hearth_relay::auth::password::hash_password;
use hearth_relay::auth::{OriginPolicy, SessionValidator};
use hearth_relay::credentials::CredentialStore;
use hearth_relay::hub::{HubRelay, HubRestClient, UpstreamConnector};
use hearth_relay::livestream::{
    LivestreamError, LivestreamEvent, LivestreamManager, LivestreamSource, UpstreamStream,
};
use hearth_relay::registry::ConnectionRegistry;
use hearth_relay::server::{AppState, CookieSettings, HealthResponse, build_router};
use hearth_relay::storage::RelayDatabase;

const HUB_TOKEN: &str = "hub-long-lived-token";
const COOKIE: &str = "hearth_session";

type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── Fake hub ─────────────────────────────────────────────────────────

struct FakeHub {
    url: String,
    connections: Arc<AtomicUsize>,
    closed: Arc<Notify>,
}

/// Hub that authenticates `HUB_TOKEN` and answers every command with a
/// `result` echoing its id.
async fn spawn_fake_hub() -> FakeHub {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(Notify::new());

    let counter = Arc::clone(&connections);
    let notify = Arc::clone(&closed);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            let notify = Arc::clone(&notify);
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(stream).await else {
                    return;
                };
                ws.send(Message::text(r#"{"type":"auth_required","ha_version":"2025.1"}"#))
                    .await
                    .unwrap();
                let Some(Ok(Message::Text(auth))) = ws.next().await else {
                    return;
                };
                let auth: serde_json::Value = serde_json::from_str(auth.as_str()).unwrap();
                if auth["access_token"] != HUB_TOKEN {
                    let _ = ws
                        .send(Message::text(r#"{"type":"auth_invalid","message":"Invalid access token"}"#))
                        .await;
                    let _ = ws.close(None).await;
                    return;
                }
                ws.send(Message::text(r#"{"type":"auth_ok","ha_version":"2025.1"}"#))
                    .await
                    .unwrap();

                while let Some(msg) = ws.next().await {
                    match msg {
                        Ok(Message::Text(text)) => {
                            let cmd: serde_json::Value =
                                serde_json::from_str(text.as_str()).unwrap();
                            let reply = serde_json::json!({
                                "id": cmd["id"],
                                "type": "result",
                                "success": true,
                                "result": { "echo": cmd["type"] },
                            });
                            ws.send(Message::text(reply.to_string())).await.unwrap();
                        }
                        Ok(Message::Close(_)) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
                notify.notify_one();
            });
        }
    });

    FakeHub {
        url: format!("http://{addr}"),
        connections,
        closed,
    }
}

// ── Fake camera source ───────────────────────────────────────────────

#[derive(Default)]
struct FakeCamera {
    feeds: std::sync::Mutex<Vec<mpsc::Sender<LivestreamEvent>>>,
}

#[async_trait]
impl LivestreamSource for FakeCamera {
    async fn start(&self, camera_id: &str) -> Result<UpstreamStream, LivestreamError> {
        if camera_id == "missing" {
            return Err(LivestreamError::CameraNotFound(camera_id.to_string()));
        }
        let (tx, rx) = mpsc::channel(16);
        self.feeds.lock().unwrap().push(tx);
        Ok(UpstreamStream {
            events: rx,
            stop: CancellationToken::new(),
        })
    }
}

// ── Relay harness ────────────────────────────────────────────────────

struct Harness {
    state: AppState,
    credentials: Arc<CredentialStore>,
    camera: Arc<FakeCamera>,
    session_token: String,
}

async fn harness(production: bool, allowed_origins: &[String]) -> Harness {
    let db = RelayDatabase::open_in_memory().await.unwrap();
    let hash = hash_password("correct horse").unwrap();
    db.create_user("u1", "alice", &hash).await.unwrap();

    let sessions = SessionValidator::new(db.clone(), Duration::from_secs(3600));
    let session_token = sessions.create_session("u1").await.unwrap().token;

    let vault = Arc::new(CredentialVault::new(
        &VaultKey::generate(),
        KeySource::Explicit,
    ));
    let credentials = Arc::new(CredentialStore::new(db.clone(), vault));
    let camera = Arc::new(FakeCamera::default());

    let relay = HubRelay::new(
        Arc::clone(&credentials),
        UpstreamConnector::new(Duration::from_secs(5)),
        Duration::from_secs(5),
        ConnectionRegistry::new(),
    );
    let rest = HubRestClient::new(Arc::clone(&credentials), Duration::from_secs(5)).unwrap();

    let state = AppState {
        db,
        sessions,
        origins: Arc::new(OriginPolicy::new(production, allowed_origins)),
        cookie: CookieSettings {
            name: COOKIE.into(),
            secure: production,
        },
        relay: Arc::new(relay),
        rest: Arc::new(rest),
        livestreams: LivestreamManager::new(camera.clone()),
        subscriber_buffer: 16,
    };

    Harness {
        state,
        credentials,
        camera,
        session_token,
    }
}

async fn serve(state: AppState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.unwrap();
    });
    addr
}

async fn connect(
    addr: SocketAddr,
    path: &str,
    cookie: Option<&str>,
    origin: Option<&str>,
) -> Result<ClientSocket, WsError> {
    let mut req = format!("ws://{addr}{path}").into_client_request().unwrap();
    if let Some(token) = cookie {
        req.headers_mut().insert(
            "cookie",
            HeaderValue::from_str(&format!("{COOKIE}={token}")).unwrap(),
        );
    }
    if let Some(origin) = origin {
        req.headers_mut()
            .insert("origin", HeaderValue::from_str(origin).unwrap());
    }
    connect_async(req).await.map(|(ws, _)| ws)
}

async fn next(ws: &mut ClientSocket) -> Message {
    tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for frame")
        .expect("socket ended")
        .expect("socket error")
}

async fn next_json(ws: &mut ClientSocket) -> serde_json::Value {
    match next(ws).await {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected text frame, got {other:?}"),
    }
}

fn close_code(msg: &Message) -> u16 {
    match msg {
        Message::Close(Some(frame)) => u16::from(frame.code),
        other => panic!("expected close frame, got {other:?}"),
    }
}

fn assert_http_status(result: Result<ClientSocket, WsError>, expected: u16) {
    match result {
        Err(WsError::Http(resp)) => assert_eq!(resp.status().as_u16(), expected),
        Err(other) => panic!("expected HTTP {expected}, got {other}"),
        Ok(_) => panic!("expected HTTP {expected}, upgrade succeeded"),
    }
}

// ── Hub relay ────────────────────────────────────────────────────────

#[tokio::test]
async fn upgrade_without_cookie_never_reaches_hub() {
    let hub = spawn_fake_hub().await;
    let h = harness(false, &[]).await;
    h.credentials.set_hub(&hub.url, HUB_TOKEN).await.unwrap();
    let addr = serve(h.state).await;

    assert_http_status(connect(addr, "/ws/ha", None, None).await, 401);
    assert_http_status(connect(addr, "/ws/ha", Some("forged"), None).await, 401);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(hub.connections.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_hub_credentials_send_one_error_then_close() {
    let h = harness(false, &[]).await;
    let token = h.session_token.clone();
    let addr = serve(h.state).await;

    let mut ws = connect(addr, "/ws/ha", Some(&token), None).await.unwrap();
    let error = next_json(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "hub_not_configured");

    assert_eq!(close_code(&next(&mut ws).await), 4003);
    let rest = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap();
    assert!(!matches!(rest, Some(Ok(Message::Text(_)))));
}

#[tokio::test]
async fn relays_frames_after_handshake() {
    let hub = spawn_fake_hub().await;
    let h = harness(false, &[]).await;
    h.credentials.set_hub(&hub.url, HUB_TOKEN).await.unwrap();
    let token = h.session_token.clone();
    let addr = serve(h.state).await;

    let mut ws = connect(addr, "/ws/ha", Some(&token), None).await.unwrap();
    assert_eq!(next_json(&mut ws).await["type"], "auth_required");

    // The browser does not know the hub token; whatever it sends is replaced.
    ws.send(Message::text(r#"{"type":"auth","access_token":"browser-side"}"#))
        .await
        .unwrap();
    assert_eq!(next_json(&mut ws).await["type"], "auth_ok");

    ws.send(Message::text(r#"{"id":7,"type":"get_states"}"#))
        .await
        .unwrap();
    let result = next_json(&mut ws).await;
    assert_eq!(result["id"], 7);
    assert_eq!(result["type"], "result");
    assert_eq!(result["result"]["echo"], "get_states");

    assert_eq!(hub.connections.load(Ordering::SeqCst), 1);

    // Closing the browser side closes the hub side.
    ws.close(None).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), hub.closed.notified())
        .await
        .expect("hub socket was not closed");
}

#[tokio::test]
async fn hub_client_round_trip_through_relay() {
    let hub = spawn_fake_hub().await;
    let h = harness(false, &[]).await;
    h.credentials.set_hub(&hub.url, HUB_TOKEN).await.unwrap();
    let token = h.session_token.clone();
    let addr = serve(h.state).await;

    let config = ClientConfig::new(format!("ws://{addr}/ws/ha"))
        .with_cookie(format!("{COOKIE}={token}"));
    let client = HubClient::websocket(config, ModeSignal::new());

    tokio::time::timeout(Duration::from_secs(5), client.connect())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(client.mode(), ConnectionMode::Websocket);

    let result = client
        .send_command("get_config", serde_json::Map::new())
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.result.unwrap()["echo"], "get_config");

    client.close().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), hub.closed.notified())
        .await
        .expect("hub socket was not closed");
}

#[tokio::test]
async fn rejected_hub_token_closes_with_auth_failed() {
    let hub = spawn_fake_hub().await;
    let h = harness(false, &[]).await;
    h.credentials.set_hub(&hub.url, "stale-token").await.unwrap();
    let token = h.session_token.clone();
    let addr = serve(h.state).await;

    let mut ws = connect(addr, "/ws/ha", Some(&token), None).await.unwrap();
    let error = next_json(&mut ws).await;
    assert_eq!(error["code"], "hub_auth_failed");
    assert!(!error["message"].as_str().unwrap().contains("stale-token"));
    assert_eq!(close_code(&next(&mut ws).await), 4005);
}

#[tokio::test]
async fn hub_client_gives_up_on_rejected_hub_token() {
    let hub = spawn_fake_hub().await;
    let h = harness(false, &[]).await;
    h.credentials.set_hub(&hub.url, "stale-token").await.unwrap();
    let token = h.session_token.clone();
    let addr = serve(h.state).await;

    let config = ClientConfig::new(format!("ws://{addr}/ws/ha"))
        .with_cookie(format!("{COOKIE}={token}"));
    let client = HubClient::websocket(config, ModeSignal::new());

    let outcome = tokio::time::timeout(Duration::from_secs(5), client.connect())
        .await
        .expect("connect kept retrying");
    assert!(matches!(outcome, Err(ClientError::AuthInvalid(_))), "{outcome:?}");
    assert_eq!(client.mode(), ConnectionMode::Disconnected);

    // Past the first backoff step: the stale token is not sent again.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(hub.connections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn hub_client_gives_up_on_rejected_session() {
    let hub = spawn_fake_hub().await;
    let h = harness(false, &[]).await;
    h.credentials.set_hub(&hub.url, HUB_TOKEN).await.unwrap();
    let addr = serve(h.state).await;

    let config = ClientConfig::new(format!("ws://{addr}/ws/ha"))
        .with_cookie(format!("{COOKIE}=forged"));
    let client = HubClient::websocket(config, ModeSignal::new());

    let outcome = tokio::time::timeout(Duration::from_secs(5), client.connect())
        .await
        .expect("connect kept retrying");
    match outcome {
        Err(ClientError::Rejected(message)) => assert!(message.contains("401"), "{message}"),
        other => panic!("expected a refused upgrade, got {other:?}"),
    }
    assert_eq!(client.mode(), ConnectionMode::Disconnected);
    assert_eq!(hub.connections.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unreachable_hub_closes_with_connect_failed() {
    let h = harness(false, &[]).await;
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead.local_addr().unwrap();
    drop(dead);
    h.credentials
        .set_hub(&format!("http://{dead_addr}"), HUB_TOKEN)
        .await
        .unwrap();
    let token = h.session_token.clone();
    let addr = serve(h.state).await;

    let mut ws = connect(addr, "/ws/ha", Some(&token), None).await.unwrap();
    assert_eq!(next_json(&mut ws).await["code"], "hub_connect_failed");
    assert_eq!(close_code(&next(&mut ws).await), 4004);
}

#[tokio::test]
async fn production_rejects_foreign_origin_before_upgrade() {
    let hub = spawn_fake_hub().await;
    let h = harness(true, &["https://dash.example".to_string()]).await;
    h.credentials.set_hub(&hub.url, HUB_TOKEN).await.unwrap();
    let token = h.session_token.clone();
    let addr = serve(h.state).await;

    assert_http_status(
        connect(addr, "/ws/ha", Some(&token), Some("https://evil.example")).await,
        403,
    );
    assert_http_status(connect(addr, "/ws/ha", Some(&token), None).await, 403);

    let mut ws = connect(addr, "/ws/ha", Some(&token), Some("https://dash.example"))
        .await
        .unwrap();
    assert_eq!(next_json(&mut ws).await["type"], "auth_required");
    assert_eq!(hub.connections.load(Ordering::SeqCst), 1);
}

// ── Livestream ───────────────────────────────────────────────────────

#[tokio::test]
async fn livestream_fans_out_and_tears_down() {
    let h = harness(false, &[]).await;
    let token = h.session_token.clone();
    let camera = Arc::clone(&h.camera);
    let manager = h.state.livestreams.clone();
    let addr = serve(h.state).await;

    let mut a = connect(addr, "/ws/livestream/cam1", Some(&token), None)
        .await
        .unwrap();
    let started = next_json(&mut a).await;
    assert_eq!(started["type"], "stream_started");
    assert_eq!(started["cameraId"], "cam1");

    let mut b = connect(addr, "/ws/livestream/cam1", Some(&token), None)
        .await
        .unwrap();
    next_json(&mut b).await;
    assert_eq!(camera.feeds.lock().unwrap().len(), 1);

    let feed = camera.feeds.lock().unwrap()[0].clone();
    feed.send(LivestreamEvent::Codec("avc1.640028".into()))
        .await
        .unwrap();
    feed.send(LivestreamEvent::Data(Bytes::from_static(b"moof")))
        .await
        .unwrap();

    for ws in [&mut a, &mut b] {
        assert_eq!(next_json(ws).await["codec"], "avc1.640028");
        assert_eq!(next(ws).await, Message::Binary(Bytes::from_static(b"moof")));
    }

    a.close(None).await.unwrap();
    b.close(None).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !manager.active_cameras().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("camera was not torn down");
}

#[tokio::test]
async fn livestream_upstream_end_closes_every_viewer() {
    let h = harness(false, &[]).await;
    let token = h.session_token.clone();
    let camera = Arc::clone(&h.camera);
    let manager = h.state.livestreams.clone();
    let addr = serve(h.state).await;

    let mut viewers = Vec::new();
    for _ in 0..2 {
        let mut ws = connect(addr, "/ws/livestream/cam1", Some(&token), None)
            .await
            .unwrap();
        assert_eq!(next_json(&mut ws).await["type"], "stream_started");
        viewers.push(ws);
    }
    assert_eq!(manager.subscriber_count("cam1").await, 2);

    // The camera's only sender goes away: the upstream session has ended.
    camera.feeds.lock().unwrap().clear();

    for ws in &mut viewers {
        let error = next_json(ws).await;
        assert_eq!(error["type"], "error");
        assert_eq!(error["code"], "stream_ended");
        assert_eq!(close_code(&next(ws).await), 4007);
    }
    tokio::time::timeout(Duration::from_secs(5), async {
        while !manager.active_cameras().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("camera was not torn down");
}

#[tokio::test]
async fn livestream_start_failure_closes_with_code() {
    let h = harness(false, &[]).await;
    let token = h.session_token.clone();
    let addr = serve(h.state).await;

    let mut ws = connect(addr, "/ws/livestream/missing", Some(&token), None)
        .await
        .unwrap();
    assert_eq!(next_json(&mut ws).await["code"], "stream_start_failed");
    assert_eq!(close_code(&next(&mut ws).await), 4006);
}

#[tokio::test]
async fn livestream_requires_session() {
    let h = harness(false, &[]).await;
    let camera = Arc::clone(&h.camera);
    let addr = serve(h.state).await;

    assert_http_status(connect(addr, "/ws/livestream/cam1", None, None).await, 401);
    assert!(camera.feeds.lock().unwrap().is_empty());
}

// ── HTTP routes ──────────────────────────────────────────────────────

async fn send(state: AppState, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, String) {
    let resp = build_router(state).oneshot(req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, String::from_utf8_lossy(&body).into_owned())
}

fn login_request(username: &str, password: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/auth/login")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({ "username": username, "password": password }).to_string(),
        ))
        .unwrap()
}

#[tokio::test]
async fn login_sets_cookie_that_authenticates() {
    let h = harness(false, &[]).await;
    let (status, headers, body) = send(h.state.clone(), login_request("alice", "correct horse")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("\"username\":\"alice\""));

    let set_cookie = headers.get("set-cookie").unwrap().to_str().unwrap();
    assert!(set_cookie.starts_with("hearth_session="));
    assert!(set_cookie.contains("HttpOnly"));
    let token = set_cookie
        .split(';')
        .next()
        .unwrap()
        .trim_start_matches("hearth_session=");
    assert_eq!(
        h.state.sessions.validate(token).await.unwrap().as_deref(),
        Some("u1")
    );
}

#[tokio::test]
async fn login_failures_are_indistinct() {
    let h = harness(false, &[]).await;
    let (wrong_pw, _, wrong_body) = send(h.state.clone(), login_request("alice", "nope")).await;
    let (no_user, _, no_user_body) = send(h.state, login_request("mallory", "nope")).await;
    assert_eq!(wrong_pw, StatusCode::UNAUTHORIZED);
    assert_eq!(no_user, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_body, no_user_body);
}

#[tokio::test]
async fn logout_revokes_session() {
    let h = harness(false, &[]).await;
    let req = Request::builder()
        .method("POST")
        .uri("/api/auth/logout")
        .header("cookie", format!("{COOKIE}={}", h.session_token))
        .body(Body::empty())
        .unwrap();
    let (status, headers, _) = send(h.state.clone(), req).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers
        .get("set-cookie")
        .unwrap()
        .to_str()
        .unwrap()
        .contains("Max-Age=0"));
    assert!(h.state.sessions.validate(&h.session_token).await.unwrap().is_none());
}

#[tokio::test]
async fn hub_states_requires_session_and_configuration() {
    let h = harness(false, &[]).await;
    let anon = Request::builder()
        .uri("/api/hub/states")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(h.state.clone(), anon).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let authed = Request::builder()
        .uri("/api/hub/states")
        .header("cookie", format!("{COOKIE}={}", h.session_token))
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(h.state, authed).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body.contains("hub_not_configured"));
}

#[tokio::test]
async fn health_reports_counts() {
    let h = harness(false, &[]).await;
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, _, body) = send(h.state, req).await;
    assert_eq!(status, StatusCode::OK);
    let health: HealthResponse = serde_json::from_str(&body).unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.relay_connections, 0);
    assert_eq!(health.livestreams, 0);
}
