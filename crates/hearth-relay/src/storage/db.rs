//! SQLite database for the Hearth relay server.

use std::path::Path;

use hearth_core::db::{Location, connect};
use sqlx::SqlitePool;
use tracing::info;

pub use hearth_core::db::DatabaseError;

/// Relay database handle. Cheap to clone.
#[derive(Clone)]
pub struct RelayDatabase {
    pool: SqlitePool,
}

impl RelayDatabase {
    /// Open or create the database at `path` and migrate it.
    pub async fn open(path: &Path) -> Result<Self, DatabaseError> {
        Self::migrated(connect(Location::File(path)).await?).await
    }

    pub async fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::migrated(connect(Location::Memory).await?).await
    }

    async fn migrated(pool: SqlitePool) -> Result<Self, DatabaseError> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        info!("Relay database migrations complete");
        Ok(Self { pool })
    }

    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
