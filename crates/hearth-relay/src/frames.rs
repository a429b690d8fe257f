//! Error reporting on client sockets.

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use hearth_core::{CloseCode, ControlFrame};
use tracing::debug;

pub fn close_frame(code: CloseCode) -> Message {
    Message::Close(Some(CloseFrame {
        code: code.code(),
        reason: Utf8Bytes::from_static(code.reason()),
    }))
}

/// The single error frame a client sees before `close_frame(code)`.
pub fn error_frame(code: CloseCode, message: &str) -> ControlFrame {
    ControlFrame::Error {
        code: Some(code.reason().to_string()),
        message: message.to_string(),
    }
}

/// Send one error frame, then close with `code`.
///
/// Send failures are ignored: the peer may already be gone.
pub async fn send_error_and_close(socket: &mut WebSocket, code: CloseCode, message: &str) {
    match error_frame(code, message).encode() {
        Ok(text) => {
            if let Err(e) = socket.send(Message::text(text)).await {
                debug!(error = %e, "Client gone before error frame");
            }
        }
        Err(e) => debug!(error = %e, "Failed to encode error frame"),
    }
    if let Err(e) = socket.send(close_frame(code)).await {
        debug!(error = %e, "Client gone before close frame");
    }
}
