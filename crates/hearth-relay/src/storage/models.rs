//! Data models for relay storage.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRecord {
    pub token_hash: String,
    pub user_id: String,
    pub expires_at: i64,
    pub created_at: i64,
}

/// One stored credential. `nonce` is set only for encrypted rows.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CredentialRow {
    pub purpose: String,
    pub value: String,
    pub nonce: Option<String>,
    pub encrypted: bool,
    pub updated_at: i64,
}
