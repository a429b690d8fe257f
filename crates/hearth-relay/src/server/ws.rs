//! WebSocket upgrade endpoints.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use hearth_core::CloseCode;
use tokio::sync::mpsc;
use tracing::{debug, instrument};

use super::AppState;
use super::guard::authorize_upgrade;
use crate::frames::send_error_and_close;
use crate::livestream::{LivestreamManager, SinkMessage};

/// `GET /ws/ha`: hub relay.
pub async fn hub_upgrade(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let user_id = match authorize_upgrade(&state, &headers).await {
        Ok(user_id) => user_id,
        Err(e) => return e.into_response(),
    };
    let relay = state.relay.clone();
    ws.on_upgrade(move |socket| async move { relay.run(socket, user_id).await })
}

/// `GET /ws/livestream/{camera_id}`: camera fan-out.
pub async fn livestream_upgrade(
    ws: WebSocketUpgrade,
    Path(camera_id): Path<String>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let user_id = match authorize_upgrade(&state, &headers).await {
        Ok(user_id) => user_id,
        Err(e) => return e.into_response(),
    };
    let manager = state.livestreams.clone();
    let buffer = state.subscriber_buffer;
    ws.on_upgrade(move |socket| livestream_session(socket, manager, camera_id, user_id, buffer))
}

#[instrument(skip(socket, manager, buffer))]
async fn livestream_session(
    mut socket: WebSocket,
    manager: LivestreamManager,
    camera_id: String,
    user_id: String,
    buffer: usize,
) {
    let (tx, mut rx) = mpsc::channel(buffer.max(1));
    let id = match manager.subscribe(&camera_id, tx).await {
        Ok(id) => id,
        Err(e) => {
            send_error_and_close(&mut socket, e.close_code(), &e.to_string()).await;
            return;
        }
    };

    loop {
        tokio::select! {
            out = rx.recv() => match out {
                Some(SinkMessage::Control(frame)) => {
                    let Ok(text) = frame.encode() else { continue };
                    if socket.send(Message::text(text)).await.is_err() {
                        break;
                    }
                }
                Some(SinkMessage::Media(data)) => {
                    if socket.send(Message::Binary(data)).await.is_err() {
                        break;
                    }
                }
                None => {
                    send_error_and_close(
                        &mut socket,
                        CloseCode::StreamEnded,
                        "upstream stream ended",
                    )
                    .await;
                    break;
                }
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    manager.unsubscribe(&camera_id, id).await;
    debug!("Livestream viewer left");
}
