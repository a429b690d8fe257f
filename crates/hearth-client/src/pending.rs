//! Request/response correlation by message id.
//!
//! Every completion is removed from the table before it fires, so a response
//! racing a timeout for the same id completes the caller exactly once.

use std::collections::HashMap;
use std::time::Duration;

use hearth_core::protocol::HubError;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::ClientError;

/// What the hub answered for one command.
///
/// `success == false` is still a delivered answer; the hub reports the
/// effect of a command through its own state changes.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<HubError>,
}

pub type Completion = oneshot::Sender<Result<CommandResult, ClientError>>;

struct PendingEntry {
    completion: Completion,
    deadline: Instant,
}

/// Pending commands keyed by id.
pub struct PendingTable {
    next_id: u64,
    timeout: Duration,
    entries: HashMap<u64, PendingEntry>,
}

impl PendingTable {
    pub fn new(timeout: Duration) -> Self {
        Self {
            next_id: 1,
            timeout,
            entries: HashMap::new(),
        }
    }

    /// Allocate an id without tracking a response (pings, re-subscribes).
    ///
    /// Ids increase monotonically for the life of the table and are shared
    /// with [`register`](Self::register).
    pub const fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        id
    }

    /// Track a new command; returns the id to put on the wire.
    pub fn register(&mut self, completion: Completion) -> u64 {
        let id = self.next_id();
        self.entries.insert(
            id,
            PendingEntry {
                completion,
                deadline: Instant::now() + self.timeout,
            },
        );
        id
    }

    /// Complete `id` with `outcome`. Returns false for unknown ids.
    pub fn resolve(&mut self, id: u64, outcome: Result<CommandResult, ClientError>) -> bool {
        let Some(entry) = self.entries.remove(&id) else {
            return false;
        };
        // The caller may have stopped waiting.
        let _ = entry.completion.send(outcome);
        true
    }

    /// Fail every entry whose deadline is at or before `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<u64> {
        let expired: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            self.resolve(*id, Err(ClientError::Timeout(self.timeout)));
        }
        expired
    }

    /// Fail everything still pending, e.g. when the socket drops.
    pub fn fail_all(&mut self, error: &ClientError) -> usize {
        let drained: Vec<PendingEntry> = self.entries.drain().map(|(_, entry)| entry).collect();
        let count = drained.len();
        for entry in drained {
            let _ = entry.completion.send(Err(error.clone()));
        }
        count
    }

    /// Earliest deadline among pending entries.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|entry| entry.deadline).min()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
