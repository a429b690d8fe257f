//! In-memory fakes for unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use hearth_core::protocol::{EntityState, StateChanged};
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;

use crate::client::{EntitySubscription, HubApi};
use crate::error::ClientError;
use crate::events::SubscriptionId;
use crate::fetch::StateFetcher;
use crate::pending::CommandResult;

pub fn entity(id: &str, state: &str) -> EntityState {
    serde_json::from_value(json!({"entity_id": id, "state": state})).unwrap()
}

/// Answers commands from canned data and hands out entity subscriptions
/// the test can push into.
#[derive(Default)]
pub struct FakeHub {
    reply: Mutex<Option<Result<CommandResult, ClientError>>>,
    states: Mutex<Vec<EntityState>>,
    commands: Mutex<Vec<(String, Map<String, Value>)>>,
    sinks: Mutex<Vec<mpsc::UnboundedSender<StateChanged>>>,
    unsubscribed: Mutex<Vec<SubscriptionId>>,
    next_id: AtomicU64,
}

impl FakeHub {
    pub fn reply_with(&self, result: CommandResult) {
        *self.reply.lock().unwrap() = Some(Ok(result));
    }

    pub fn fail_with(&self, error: ClientError) {
        *self.reply.lock().unwrap() = Some(Err(error));
    }

    pub fn set_states(&self, states: Vec<EntityState>) {
        *self.states.lock().unwrap() = states;
    }

    pub fn last_command(&self) -> Option<(String, Map<String, Value>)> {
        self.commands.lock().unwrap().last().cloned()
    }

    pub fn push_change(&self, change: StateChanged) -> usize {
        self.sinks
            .lock()
            .unwrap()
            .iter()
            .filter(|sink| sink.send(change.clone()).is_ok())
            .count()
    }

    pub fn live_subscribers(&self) -> usize {
        self.sinks
            .lock()
            .unwrap()
            .iter()
            .filter(|sink| !sink.is_closed())
            .count()
    }

    pub fn unsubscribed(&self) -> Vec<SubscriptionId> {
        self.unsubscribed.lock().unwrap().clone()
    }
}

#[async_trait]
impl HubApi for FakeHub {
    async fn send_command(
        &self,
        kind: &str,
        payload: Map<String, Value>,
    ) -> Result<CommandResult, ClientError> {
        self.commands
            .lock()
            .unwrap()
            .push((kind.to_string(), payload));
        if let Some(reply) = self.reply.lock().unwrap().clone() {
            return reply;
        }
        let states = serde_json::to_value(&*self.states.lock().unwrap()).unwrap();
        Ok(CommandResult {
            success: true,
            result: (kind == "get_states").then_some(states),
            error: None,
        })
    }

    async fn subscribe_entities(
        &self,
        _entity_ids: &[String],
    ) -> Result<EntitySubscription, ClientError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sinks.lock().unwrap().push(tx);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(EntitySubscription::new(id, rx))
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ClientError> {
        self.unsubscribed.lock().unwrap().push(id);
        Ok(())
    }
}

/// Returns the same snapshot every time and counts calls.
pub struct FakeFetcher {
    states: Vec<EntityState>,
    calls: AtomicUsize,
}

impl FakeFetcher {
    pub const fn new(states: Vec<EntityState>) -> Self {
        Self {
            states,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateFetcher for FakeFetcher {
    async fn fetch_states(&self) -> Result<Vec<EntityState>, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.states.clone())
    }
}
