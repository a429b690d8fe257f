//! State reconciliation cache.
//!
//! The single place the rest of a dashboard reads hub state from. Whichever
//! refresh strategy is active writes into it: full snapshots while polling,
//! `state_changed` deltas while the socket is up.

use std::collections::HashMap;
use std::sync::Arc;

use hearth_core::protocol::{EntityState, StateChanged};
use serde_json::{Map, Value};
use tokio::sync::{RwLock, watch};
use tracing::debug;

use crate::client::HubApi;
use crate::error::ClientError;
use crate::mode::{ConnectionMode, ModeSignal};
use crate::pending::CommandResult;

struct CacheInner {
    entities: RwLock<HashMap<String, EntityState>>,
    mode: ModeSignal,
    hub: Arc<dyn HubApi>,
}

#[derive(Clone)]
pub struct StateCache {
    inner: Arc<CacheInner>,
}

impl StateCache {
    pub fn new(mode: ModeSignal, hub: Arc<dyn HubApi>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entities: RwLock::new(HashMap::new()),
                mode,
                hub,
            }),
        }
    }

    /// Replace the whole table with a fresh snapshot.
    pub async fn apply_snapshot(&self, states: Vec<EntityState>) {
        let table: HashMap<String, EntityState> = states
            .into_iter()
            .map(|s| (s.entity_id.clone(), s))
            .collect();
        let count = table.len();
        *self.inner.entities.write().await = table;
        debug!(entities = count, "Applied state snapshot");
    }

    /// Apply one delta. A missing `new_state` removes the entity.
    pub async fn apply_state_changed(&self, change: StateChanged) {
        let mut entities = self.inner.entities.write().await;
        match change.new_state {
            Some(state) => {
                entities.insert(change.entity_id, state);
            }
            None => {
                entities.remove(&change.entity_id);
            }
        }
    }

    pub fn set_mode(&self, mode: ConnectionMode) -> bool {
        self.inner.mode.set(mode)
    }

    pub fn mode(&self) -> ConnectionMode {
        self.inner.mode.get()
    }

    pub fn subscribe_mode(&self) -> watch::Receiver<ConnectionMode> {
        self.inner.mode.subscribe()
    }

    pub async fn get(&self, entity_id: &str) -> Option<EntityState> {
        self.inner.entities.read().await.get(entity_id).cloned()
    }

    /// Every known entity, sorted by id.
    pub async fn all(&self) -> Vec<EntityState> {
        let mut states: Vec<EntityState> =
            self.inner.entities.read().await.values().cloned().collect();
        states.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        states
    }

    pub async fn len(&self) -> usize {
        self.inner.entities.read().await.len()
    }

    /// Send a command over the socket.
    ///
    /// `Ok` means the hub answered, even with `success: false`; the effect
    /// shows up as state changes. `Err` is a transport failure.
    pub async fn send_command(
        &self,
        kind: &str,
        payload: Map<String, Value>,
    ) -> Result<CommandResult, ClientError> {
        self.inner.hub.send_command(kind, payload).await
    }

    /// `call_service` shorthand, e.g. `("light", "turn_on", {"entity_id": ..})`.
    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        service_data: Map<String, Value>,
    ) -> Result<CommandResult, ClientError> {
        let mut payload = Map::new();
        payload.insert("domain".into(), Value::from(domain));
        payload.insert("service".into(), Value::from(service));
        payload.insert("service_data".into(), Value::Object(service_data));
        self.send_command("call_service", payload).await
    }

    pub(crate) fn hub(&self) -> Arc<dyn HubApi> {
        Arc::clone(&self.inner.hub)
    }
}
