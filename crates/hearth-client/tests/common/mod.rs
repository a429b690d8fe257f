//! In-memory transport standing in for the relay socket.

#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};

use hearth_client::ClientError;
use hearth_client::transport::{Link, Peer, Transport};

/// The hub's side of one link.
pub struct HubEnd {
    from_client: mpsc::Receiver<String>,
    to_client: mpsc::Sender<String>,
    close: oneshot::Sender<u16>,
}

impl HubEnd {
    /// Next frame from the client, skipping heartbeat pings.
    pub async fn recv(&mut self) -> Value {
        loop {
            let frame = self.recv_raw().await;
            if frame["type"] != "ping" {
                return frame;
            }
        }
    }

    pub async fn recv_raw(&mut self) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(300), self.from_client.recv())
            .await
            .expect("no frame from client")
            .expect("client closed the link");
        serde_json::from_str(&text).unwrap()
    }

    /// Next frame, asserting its type.
    pub async fn expect(&mut self, msg_type: &str) -> Value {
        let frame = self.recv().await;
        assert_eq!(frame["type"], msg_type, "unexpected frame {frame}");
        frame
    }

    pub async fn send(&self, frame: Value) {
        self.to_client.send(frame.to_string()).await.unwrap();
    }

    /// Close the link the way the relay does, with an application close code.
    pub fn close_with(self, code: u16) {
        let _ = self.close.send(code);
    }

    pub async fn handshake(&mut self) {
        self.send(json!({"type": "auth_required", "ha_version": "2024.6.0"}))
            .await;
        self.expect("auth").await;
        self.send(json!({"type": "auth_ok", "ha_version": "2024.6.0"}))
            .await;
    }

    pub async fn reply(&self, id: &Value, result: Value) {
        self.send(json!({"id": id, "type": "result", "success": true, "result": result}))
            .await;
    }
}

pub type Ends = mpsc::UnboundedReceiver<HubEnd>;

/// Hands each opened link's far end to the test.
pub struct FakeTransport {
    ends: mpsc::UnboundedSender<HubEnd>,
    opens: AtomicUsize,
    refuse: AtomicUsize,
    reject: Mutex<Option<ClientError>>,
}

impl FakeTransport {
    pub fn new() -> (Self, Ends) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                ends: tx,
                opens: AtomicUsize::new(0),
                refuse: AtomicUsize::new(0),
                reject: Mutex::new(None),
            },
            rx,
        )
    }

    /// Fail the next `n` opens.
    pub fn refuse_next(&self, n: usize) {
        self.refuse.store(n, Ordering::SeqCst);
    }

    /// Fail the next open with `error`.
    pub fn reject_next(&self, error: ClientError) {
        *self.reject.lock().unwrap() = Some(error);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self) -> Result<Link, ClientError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let rejected = self.reject.lock().unwrap().take();
        if let Some(error) = rejected {
            return Err(error);
        }
        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ClientError::ConnectFailed("refused".into()));
        }

        let (link, Peer { sent, deliver, close }) = Link::pair(64);
        let _ = self.ends.send(HubEnd {
            from_client: sent,
            to_client: deliver,
            close,
        });
        Ok(link)
    }
}

pub async fn next_end(ends: &mut Ends) -> HubEnd {
    tokio::time::timeout(Duration::from_secs(120), ends.recv())
        .await
        .expect("client never opened a link")
        .unwrap()
}
