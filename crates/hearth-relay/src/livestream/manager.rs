//! Per-camera fan-out of one upstream video session to many subscribers.
//!
//! Each camera has a slot behind its own lock. The camera map lock is only
//! held long enough to look up or insert a slot; it is never awaited while a
//! caller holds a slot lock except during teardown, which takes slot then
//! map. A slot that has been torn down is marked `retired` and removed from
//! the map before its lock is released, so a subscriber that raced the
//! teardown retries against a fresh slot.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use hearth_core::ControlFrame;
use tokio::sync::{Mutex, mpsc};
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::LivestreamError;
use super::source::{LivestreamEvent, LivestreamSource};

pub type SubscriptionId = u64;

/// What a subscriber's socket task receives.
///
/// The channel closing means the upstream session is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkMessage {
    Control(ControlFrame),
    Media(Bytes),
}

struct CameraSlot {
    subscribers: Vec<(SubscriptionId, mpsc::Sender<SinkMessage>)>,
    codec: Option<String>,
    stop: Option<CancellationToken>,
    retired: bool,
}

impl CameraSlot {
    const fn new() -> Self {
        Self {
            subscribers: Vec::new(),
            codec: None,
            stop: None,
            retired: false,
        }
    }

    /// Send to every subscriber without waiting. Full queues drop the
    /// message; closed ones are detached.
    fn broadcast(&mut self, camera_id: &str, msg: &SinkMessage) {
        self.subscribers
            .retain(|(id, tx)| match tx.try_send(msg.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    debug!(camera_id = %camera_id, subscription_id = id, "Subscriber lagging; frame dropped");
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            });
    }
}

type Slot = Arc<Mutex<CameraSlot>>;

struct Inner {
    source: Arc<dyn LivestreamSource>,
    cameras: Mutex<HashMap<String, Slot>>,
    next_id: AtomicU64,
    #[cfg(feature = "metrics")]
    metrics: hearth_core::metrics::RelayMetrics,
}

impl Inner {
    /// Mark `slot` dead, stop its upstream and drop it from the map.
    ///
    /// Must be called with the slot lock held.
    async fn retire(&self, camera_id: &str, slot: &Slot, guard: &mut CameraSlot) {
        guard.retired = true;
        guard.subscribers.clear();
        if let Some(stop) = guard.stop.take() {
            stop.cancel();
        }
        let mut cameras = self.cameras.lock().await;
        if cameras.get(camera_id).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            cameras.remove(camera_id);
        }
    }
}

#[derive(Clone)]
pub struct LivestreamManager {
    inner: Arc<Inner>,
}

impl LivestreamManager {
    pub fn new(source: Arc<dyn LivestreamSource>) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                cameras: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                #[cfg(feature = "metrics")]
                metrics: hearth_core::metrics::RelayMetrics::new(),
            }),
        }
    }

    /// Attach `sink` to `camera_id`, starting the upstream session if this is
    /// the first subscriber.
    ///
    /// On success the sink has already been sent `stream_started` (and the
    /// codec, if known). On failure the sink is not registered.
    pub async fn subscribe(
        &self,
        camera_id: &str,
        sink: mpsc::Sender<SinkMessage>,
    ) -> Result<SubscriptionId, LivestreamError> {
        loop {
            let slot = {
                let mut cameras = self.inner.cameras.lock().await;
                Arc::clone(
                    cameras
                        .entry(camera_id.to_string())
                        .or_insert_with(|| Arc::new(Mutex::new(CameraSlot::new()))),
                )
            };

            let mut guard = slot.lock().await;
            if guard.retired {
                continue;
            }

            if guard.stop.is_none() {
                // First subscriber. Others for this camera queue on the slot lock.
                match self.inner.source.start(camera_id).await {
                    Ok(stream) => {
                        guard.stop = Some(stream.stop);
                        tokio::spawn(pump(
                            Arc::clone(&self.inner),
                            camera_id.to_string(),
                            Arc::clone(&slot),
                            stream.events,
                        ));
                        info!(camera_id = %camera_id, "Upstream livestream started");
                    }
                    Err(e) => {
                        warn!(camera_id = %camera_id, error = %e, "Failed to start livestream");
                        self.inner.retire(camera_id, &slot, &mut guard).await;
                        return Err(e);
                    }
                }
            }

            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            let _ = sink.try_send(SinkMessage::Control(ControlFrame::StreamStarted {
                camera_id: camera_id.to_string(),
            }));
            if let Some(codec) = &guard.codec {
                let _ = sink.try_send(SinkMessage::Control(ControlFrame::Codec {
                    codec: codec.clone(),
                }));
            }
            guard.subscribers.push((id, sink));
            #[cfg(feature = "metrics")]
            self.inner.metrics.viewer_joined(camera_id);
            info!(
                camera_id = %camera_id,
                subscription_id = id,
                subscribers = guard.subscribers.len(),
                "Livestream subscriber attached"
            );
            return Ok(id);
        }
    }

    /// Detach a subscriber. The last one out stops the upstream session.
    pub async fn unsubscribe(&self, camera_id: &str, id: SubscriptionId) {
        let Some(slot) = self.inner.cameras.lock().await.get(camera_id).cloned() else {
            return;
        };
        let mut guard = slot.lock().await;
        if guard.retired {
            return;
        }

        let before = guard.subscribers.len();
        guard.subscribers.retain(|(sid, _)| *sid != id);
        if guard.subscribers.len() == before {
            return;
        }
        debug!(camera_id = %camera_id, subscription_id = id, "Livestream subscriber detached");

        if guard.subscribers.is_empty() {
            self.inner.retire(camera_id, &slot, &mut guard).await;
            info!(camera_id = %camera_id, "Last subscriber left; upstream livestream stopped");
        }
    }

    /// Cameras with a live upstream session.
    pub async fn active_cameras(&self) -> Vec<String> {
        let mut cameras: Vec<String> = self.inner.cameras.lock().await.keys().cloned().collect();
        cameras.sort();
        cameras
    }

    pub async fn subscriber_count(&self, camera_id: &str) -> usize {
        let Some(slot) = self.inner.cameras.lock().await.get(camera_id).cloned() else {
            return 0;
        };
        let guard = slot.lock().await;
        if guard.retired { 0 } else { guard.subscribers.len() }
    }
}

/// Move upstream events into every subscriber queue until the upstream ends
/// or the slot is retired.
async fn pump(
    inner: Arc<Inner>,
    camera_id: String,
    slot: Slot,
    mut events: mpsc::Receiver<LivestreamEvent>,
) {
    while let Some(event) = events.recv().await {
        let mut guard = slot.lock().await;
        if guard.retired {
            return;
        }
        match event {
            LivestreamEvent::Codec(codec) => {
                if guard.codec.is_none() {
                    debug!(camera_id = %camera_id, codec = %codec, "Livestream codec detected");
                    guard.codec = Some(codec.clone());
                    guard.broadcast(&camera_id, &SinkMessage::Control(ControlFrame::Codec { codec }));
                }
            }
            LivestreamEvent::Data(data) => {
                guard.broadcast(&camera_id, &SinkMessage::Media(data));
            }
        }
    }

    let mut guard = slot.lock().await;
    if !guard.retired {
        let dropped = guard.subscribers.len();
        // Dropping the senders is what tells each socket task to close.
        inner.retire(&camera_id, &slot, &mut guard).await;
        warn!(camera_id = %camera_id, subscribers = dropped, "Upstream livestream ended");
    }
}
