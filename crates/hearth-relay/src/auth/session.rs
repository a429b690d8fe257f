//! Cookie session validation.
//!
//! Raw tokens never touch the database; lookups go through their SHA-256.
//! An expired session is indistinguishable from a missing one.

use std::time::Duration;

use hearth_core::db::unix_timestamp;
use hearth_crypto::{hash_token, random_token};
use tracing::{debug, warn};

use crate::storage::{DatabaseError, RelayDatabase};

/// A freshly created session. `token` goes into the cookie and nowhere else.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub user_id: String,
    pub expires_at: i64,
}

#[derive(Clone)]
pub struct SessionValidator {
    db: RelayDatabase,
    ttl_secs: i64,
}

impl SessionValidator {
    pub fn new(db: RelayDatabase, ttl: Duration) -> Self {
        Self {
            db,
            ttl_secs: i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX),
        }
    }

    pub const fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    /// Resolve a cookie token to its user id.
    ///
    /// Expired rows are deleted on sight and reported as absent.
    pub async fn validate(&self, token: &str) -> Result<Option<String>, DatabaseError> {
        if token.is_empty() {
            return Ok(None);
        }
        let token_hash = hash_token(token);
        let Some(session) = self.db.get_session(&token_hash).await? else {
            return Ok(None);
        };

        if unix_timestamp() > session.expires_at {
            if let Err(e) = self.db.delete_session(&token_hash).await {
                warn!(error = %e, "Failed to delete expired session");
            } else {
                debug!(user_id = %session.user_id, "Expired session removed");
            }
            return Ok(None);
        }

        Ok(Some(session.user_id))
    }

    /// Issue a new session for `user_id`.
    pub async fn create_session(&self, user_id: &str) -> Result<IssuedSession, DatabaseError> {
        let token = random_token();
        let expires_at = unix_timestamp().saturating_add(self.ttl_secs);
        self.db
            .create_session(&hash_token(&token), user_id, expires_at)
            .await?;
        Ok(IssuedSession {
            token,
            user_id: user_id.to_string(),
            expires_at,
        })
    }

    /// Delete the session behind `token`. Returns whether one existed.
    pub async fn revoke(&self, token: &str) -> Result<bool, DatabaseError> {
        self.db.delete_session(&hash_token(token)).await
    }

    /// Remove every expired session.
    pub async fn sweep_expired(&self) -> Result<u64, DatabaseError> {
        self.db.delete_expired_sessions(unix_timestamp()).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn setup() -> (RelayDatabase, SessionValidator) {
        let db = RelayDatabase::open_in_memory().await.unwrap();
        db.create_user("u1", "alice", "h").await.unwrap();
        let validator = SessionValidator::new(db.clone(), Duration::from_secs(3600));
        (db, validator)
    }

    #[tokio::test]
    async fn issued_session_validates() {
        let (db, validator) = setup().await;
        let issued = validator.create_session("u1").await.unwrap();

        assert_eq!(issued.token.len(), 64);
        assert_eq!(
            validator.validate(&issued.token).await.unwrap().as_deref(),
            Some("u1")
        );
        // Only the hash is stored.
        assert!(db.get_session(&issued.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_session_is_treated_as_missing() {
        let (db, validator) = setup().await;
        let token = "expired-token";
        db.create_session(&hash_token(token), "u1", unix_timestamp() - 5)
            .await
            .unwrap();

        let expired = validator.validate(token).await.unwrap();
        let missing = validator.validate("never-issued").await.unwrap();
        assert_eq!(expired, missing);
        assert!(expired.is_none());
        // Opportunistically deleted.
        assert!(db.get_session(&hash_token(token)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_token_is_absent() {
        let (_db, validator) = setup().await;
        assert!(validator.validate("").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revoke_invalidates_session() {
        let (_db, validator) = setup().await;
        let issued = validator.create_session("u1").await.unwrap();

        assert!(validator.revoke(&issued.token).await.unwrap());
        assert!(validator.validate(&issued.token).await.unwrap().is_none());
        assert!(!validator.revoke(&issued.token).await.unwrap());
    }

    #[tokio::test]
    async fn sweep_removes_only_expired() {
        let (db, validator) = setup().await;
        db.create_session("stale", "u1", unix_timestamp() - 100)
            .await
            .unwrap();
        let live = validator.create_session("u1").await.unwrap();

        assert_eq!(validator.sweep_expired().await.unwrap(), 1);
        assert!(validator.validate(&live.token).await.unwrap().is_some());
    }
}
