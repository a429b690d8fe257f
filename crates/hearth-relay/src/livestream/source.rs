//! Upstream video source abstraction.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::LivestreamError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivestreamEvent {
    /// Codec string for the stream, e.g. `avc1.640028`. Emitted at most once.
    Codec(String),
    /// One media fragment.
    Data(Bytes),
}

/// A running upstream session for one camera.
///
/// The session ends when `events` closes. Cancelling `stop` asks the source
/// to close its upstream socket, after which `events` closes.
pub struct UpstreamStream {
    pub events: mpsc::Receiver<LivestreamEvent>,
    pub stop: CancellationToken,
}

#[async_trait]
pub trait LivestreamSource: Send + Sync + 'static {
    async fn start(&self, camera_id: &str) -> Result<UpstreamStream, LivestreamError>;
}
