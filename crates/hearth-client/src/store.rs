//! Wiring of client, cache and refresh strategies.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::StateCache;
use crate::client::HubClient;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::fetch::{HttpStateFetcher, StateFetcher};
use crate::mode::ModeSignal;
use crate::strategy::{PollingStrategy, StrategySelector, WebsocketStrategy};

/// A hub client, its state cache, and the task keeping the cache fresh.
pub struct HubStore {
    client: HubClient,
    cache: StateCache,
    shutdown: CancellationToken,
    selector: JoinHandle<()>,
}

impl HubStore {
    /// Real WebSocket client with HTTP polling against the same relay.
    pub fn start(config: ClientConfig) -> Result<Self, ClientError> {
        let fetcher = HttpStateFetcher::from_config(&config)?;
        let poll_interval = config.poll_interval;
        let client = HubClient::websocket(config, ModeSignal::new());
        Ok(Self::with_parts(client, Arc::new(fetcher), poll_interval))
    }

    pub fn with_parts(
        client: HubClient,
        fetcher: Arc<dyn StateFetcher>,
        poll_interval: Duration,
    ) -> Self {
        let cache = StateCache::new(client.mode_signal().clone(), Arc::new(client.clone()));
        let selector = StrategySelector::new(
            cache.clone(),
            PollingStrategy::new(fetcher, poll_interval),
            WebsocketStrategy,
        );
        let shutdown = CancellationToken::new();
        let selector = tokio::spawn(selector.run(shutdown.clone()));
        Self {
            client,
            cache,
            shutdown,
            selector,
        }
    }

    pub async fn connect(&self) -> Result<(), ClientError> {
        self.client.connect().await
    }

    pub const fn cache(&self) -> &StateCache {
        &self.cache
    }

    pub const fn client(&self) -> &HubClient {
        &self.client
    }

    /// Close the socket and stop refreshing.
    pub async fn shutdown(self) {
        let _ = self.client.close().await;
        self.shutdown.cancel();
        let _ = self.selector.await;
    }
}
