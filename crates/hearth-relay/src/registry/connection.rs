//! In-memory registry of relayed client connections.
//!
//! Each relay task registers itself for the lifetime of its client socket.
//! The registry is only read for health reporting.

use std::collections::HashMap;
use std::sync::Arc;

use hearth_core::db::unix_timestamp;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// One relayed dashboard connection.
#[derive(Debug, Clone)]
pub struct RelayConnection {
    pub connection_id: String,
    pub user_id: String,
    pub opened_at: i64,
}

/// Thread-safe registry of active relay connections.
#[derive(Clone)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<String, RelayConnection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a connection for `user_id` and return its id.
    pub async fn register(&self, user_id: &str) -> String {
        let connection_id = uuid::Uuid::new_v4().to_string();
        let conn = RelayConnection {
            connection_id: connection_id.clone(),
            user_id: user_id.to_string(),
            opened_at: unix_timestamp(),
        };
        self.connections
            .write()
            .await
            .insert(connection_id.clone(), conn);
        info!(connection_id = %connection_id, user_id = %user_id, "Relay connection registered");
        connection_id
    }

    /// Remove a connection.
    pub async fn unregister(&self, connection_id: &str) -> Option<RelayConnection> {
        let conn = self.connections.write().await.remove(connection_id);
        if conn.is_some() {
            info!(connection_id = %connection_id, "Relay connection unregistered");
        } else {
            warn!(connection_id = %connection_id, "Tried to unregister unknown connection");
        }
        conn
    }

    pub async fn get(&self, connection_id: &str) -> Option<RelayConnection> {
        self.connections.read().await.get(connection_id).cloned()
    }

    /// Active connections belonging to `user_id`.
    pub async fn connections_for_user(&self, user_id: &str) -> Vec<RelayConnection> {
        self.connections
            .read()
            .await
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Count of active connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
