//! Refresh strategies for the state cache.
//!
//! Exactly one of [`PollingStrategy`] and [`WebsocketStrategy`] runs at a
//! time. [`StrategySelector`] follows the connection mode and always stops
//! (and joins) the running strategy before starting the other, so snapshot
//! polling and socket deltas never write into the cache concurrently.

use std::sync::Arc;
use std::time::Duration;

use hearth_core::protocol::EntityState;
use serde_json::Map;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::StateCache;
use crate::fetch::StateFetcher;
use crate::mode::ConnectionMode;
use crate::pending::CommandResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Polling,
    Websocket,
}

struct Running {
    kind: StrategyKind,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Full snapshot now, then again every `interval`.
///
/// Stops on its own once the cache leaves polling mode.
#[derive(Clone)]
pub struct PollingStrategy {
    fetcher: Arc<dyn StateFetcher>,
    interval: Duration,
}

impl PollingStrategy {
    pub fn new(fetcher: Arc<dyn StateFetcher>, interval: Duration) -> Self {
        Self { fetcher, interval }
    }

    pub fn start(&self, cache: StateCache, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(poll_loop(
            Arc::clone(&self.fetcher),
            self.interval,
            cache,
            cancel,
        ))
    }
}

async fn poll_loop(
    fetcher: Arc<dyn StateFetcher>,
    interval: Duration,
    cache: StateCache,
    cancel: CancellationToken,
) {
    let mut mode = cache.subscribe_mode();
    loop {
        if *mode.borrow_and_update() != ConnectionMode::Polling {
            debug!("Left polling mode");
            return;
        }

        let fetched = tokio::select! {
            () = cancel.cancelled() => return,
            fetched = fetcher.fetch_states() => fetched,
        };
        match fetched {
            Ok(states) => cache.apply_snapshot(states).await,
            Err(e) => warn!(error = %e, "State poll failed"),
        }

        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(interval) => {}
            changed = mode.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}

/// Snapshot over the socket, then live `state_changed` deltas.
#[derive(Clone, Copy, Default)]
pub struct WebsocketStrategy;

impl WebsocketStrategy {
    pub fn start(self, cache: StateCache, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(stream_loop(cache, cancel))
    }
}

async fn stream_loop(cache: StateCache, cancel: CancellationToken) {
    let hub = cache.hub();
    let mut changes = tokio::select! {
        () = cancel.cancelled() => return,
        sub = hub.subscribe_entities(&[]) => match sub {
            Ok(sub) => sub,
            Err(e) => {
                warn!(error = %e, "Failed to subscribe to state changes");
                return;
            }
        },
    };

    // Catch up on anything missed while polling.
    let snapshot = tokio::select! {
        () = cancel.cancelled() => None,
        result = hub.send_command("get_states", Map::new()) => Some(result),
    };
    match snapshot {
        Some(Ok(CommandResult {
            success: true,
            result: Some(value),
            ..
        })) => match serde_json::from_value::<Vec<EntityState>>(value) {
            Ok(states) => cache.apply_snapshot(states).await,
            Err(e) => warn!(error = %e, "Invalid get_states payload"),
        },
        Some(Ok(result)) => warn!(error = ?result.error, "get_states was refused"),
        Some(Err(e)) => warn!(error = %e, "get_states failed"),
        None => {}
    }

    while !cancel.is_cancelled() {
        tokio::select! {
            () = cancel.cancelled() => break,
            change = changes.recv() => match change {
                Some(change) => cache.apply_state_changed(change).await,
                None => break,
            },
        }
    }

    if let Err(e) = hub.unsubscribe(changes.id()).await {
        debug!(error = %e, "Unsubscribe after stream stop failed");
    }
}

/// Runs whichever strategy the connection mode calls for.
pub struct StrategySelector {
    cache: StateCache,
    polling: PollingStrategy,
    websocket: WebsocketStrategy,
    running: Option<Running>,
}

impl StrategySelector {
    pub const fn new(
        cache: StateCache,
        polling: PollingStrategy,
        websocket: WebsocketStrategy,
    ) -> Self {
        Self {
            cache,
            polling,
            websocket,
            running: None,
        }
    }

    pub fn active(&self) -> Option<StrategyKind> {
        self.running.as_ref().map(|r| r.kind)
    }

    /// React to a mode transition.
    ///
    /// `Connecting` keeps whatever is running; `Disconnected` stops
    /// everything.
    pub async fn on_mode_change(&mut self, mode: ConnectionMode) {
        let wanted = match mode {
            ConnectionMode::Connecting => return,
            ConnectionMode::Disconnected => None,
            ConnectionMode::Websocket => Some(StrategyKind::Websocket),
            ConnectionMode::Polling => Some(StrategyKind::Polling),
        };
        if self.active() == wanted {
            return;
        }

        self.stop().await;
        let Some(kind) = wanted else {
            return;
        };

        let cancel = CancellationToken::new();
        let task = match kind {
            StrategyKind::Polling => self.polling.start(self.cache.clone(), cancel.clone()),
            StrategyKind::Websocket => self.websocket.start(self.cache.clone(), cancel.clone()),
        };
        info!(strategy = ?kind, "Refresh strategy started");
        self.running = Some(Running { kind, cancel, task });
    }

    /// Cancel the running strategy and wait for it to finish.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.cancel.cancel();
        if let Err(e) = running.task.await {
            warn!(error = %e, strategy = ?running.kind, "Refresh strategy task failed");
        }
        debug!(strategy = ?running.kind, "Refresh strategy stopped");
    }

    /// Follow the cache's mode until `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut mode = self.cache.subscribe_mode();
        let initial = *mode.borrow_and_update();
        self.on_mode_change(initial).await;

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                changed = mode.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let next = *mode.borrow_and_update();
                    self.on_mode_change(next).await;
                }
            }
        }
        self.stop().await;
    }
}
