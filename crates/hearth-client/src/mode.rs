//! Observable connection mode shared by the client and the state cache.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// How the cache is currently being kept fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionMode {
    #[default]
    Disconnected,
    Connecting,
    /// Live deltas over the socket.
    Websocket,
    /// Socket down; periodic snapshots over HTTP.
    Polling,
}

impl ConnectionMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Websocket => "websocket",
            Self::Polling => "polling",
        }
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cloneable handle to the current mode.
#[derive(Debug, Clone)]
pub struct ModeSignal {
    tx: Arc<watch::Sender<ConnectionMode>>,
}

impl Default for ModeSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionMode::Disconnected);
        Self { tx: Arc::new(tx) }
    }

    /// Update the mode; watchers only wake on an actual change.
    pub fn set(&self, mode: ConnectionMode) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == mode {
                false
            } else {
                *current = mode;
                true
            }
        })
    }

    pub fn get(&self) -> ConnectionMode {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionMode> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected() {
        assert_eq!(ModeSignal::new().get(), ConnectionMode::Disconnected);
        assert_eq!(ConnectionMode::Polling.to_string(), "polling");
    }

    #[tokio::test]
    async fn watchers_see_changes_only() {
        let signal = ModeSignal::new();
        let mut rx = signal.subscribe();

        assert!(!signal.set(ConnectionMode::Disconnected));
        assert!(!rx.has_changed().unwrap());

        assert!(signal.clone().set(ConnectionMode::Connecting));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ConnectionMode::Connecting);
    }
}
