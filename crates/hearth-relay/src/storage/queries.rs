//! Database queries for the Hearth relay server.

use hearth_core::db::unix_timestamp;

use super::db::{DatabaseError, RelayDatabase};
use super::models::{CredentialRow, SessionRecord, User};

/// A credential row to be written.
#[derive(Debug, Clone, Copy)]
pub struct CredentialWrite<'a> {
    pub purpose: &'a str,
    pub value: &'a str,
    pub nonce: Option<&'a str>,
    pub encrypted: bool,
}

impl<'a> CredentialWrite<'a> {
    pub const fn plain(purpose: &'a str, value: &'a str) -> Self {
        Self {
            purpose,
            value,
            nonce: None,
            encrypted: false,
        }
    }

    pub const fn sealed(purpose: &'a str, ciphertext: &'a str, nonce: &'a str) -> Self {
        Self {
            purpose,
            value: ciphertext,
            nonce: Some(nonce),
            encrypted: true,
        }
    }
}

impl RelayDatabase {
    // =========================================================================
    // User queries
    // =========================================================================

    /// Create a new user.
    pub async fn create_user(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
    ) -> Result<User, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO users (id, username, password_hash, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(username)
        .bind(password_hash)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_user(id).await
    }

    /// Get a user by ID.
    pub async fn get_user(&self, id: &str) -> Result<User, DatabaseError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("User {id}")))
    }

    /// Get a user by username.
    pub async fn get_user_by_username(&self, username: &str) -> Result<User, DatabaseError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("User with username {username}")))
    }

    /// Replace a user's password hash.
    pub async fn update_password(&self, id: &str, password_hash: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(password_hash)
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Session queries
    // =========================================================================

    /// Store a session keyed by token hash.
    pub async fn create_session(
        &self,
        token_hash: &str,
        user_id: &str,
        expires_at: i64,
    ) -> Result<SessionRecord, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO sessions (token_hash, user_id, expires_at, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(token_hash)
        .bind(user_id)
        .bind(expires_at)
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(SessionRecord {
            token_hash: token_hash.to_string(),
            user_id: user_id.to_string(),
            expires_at,
            created_at: now,
        })
    }

    /// Look up a session by token hash, expired or not.
    pub async fn get_session(
        &self,
        token_hash: &str,
    ) -> Result<Option<SessionRecord>, DatabaseError> {
        let session =
            sqlx::query_as::<_, SessionRecord>("SELECT * FROM sessions WHERE token_hash = ?")
                .bind(token_hash)
                .fetch_optional(self.pool())
                .await?;

        Ok(session)
    }

    /// Delete a session by token hash.
    pub async fn delete_session(&self, token_hash: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
            .bind(token_hash)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete every session whose expiry is before `now`.
    pub async fn delete_expired_sessions(&self, now: i64) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
            .bind(now)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected())
    }

    // =========================================================================
    // Credential queries
    // =========================================================================

    /// Get a single credential row.
    pub async fn get_credential(
        &self,
        purpose: &str,
    ) -> Result<Option<CredentialRow>, DatabaseError> {
        let row = sqlx::query_as::<_, CredentialRow>("SELECT * FROM credentials WHERE purpose = ?")
            .bind(purpose)
            .fetch_optional(self.pool())
            .await?;

        Ok(row)
    }

    /// All credential rows.
    pub async fn list_credentials(&self) -> Result<Vec<CredentialRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, CredentialRow>("SELECT * FROM credentials ORDER BY purpose")
            .fetch_all(self.pool())
            .await?;

        Ok(rows)
    }

    /// Replace a group of credential rows in one transaction.
    pub async fn put_credentials(
        &self,
        rows: &[CredentialWrite<'_>],
    ) -> Result<(), DatabaseError> {
        let now = unix_timestamp();
        let mut tx = self.pool().begin().await?;

        for row in rows {
            sqlx::query(
                "INSERT OR REPLACE INTO credentials (purpose, value, nonce, encrypted, updated_at) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(row.purpose)
            .bind(row.value)
            .bind(row.nonce)
            .bind(row.encrypted)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Remove a credential row.
    pub async fn delete_credential(&self, purpose: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM credentials WHERE purpose = ?")
            .bind(purpose)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
