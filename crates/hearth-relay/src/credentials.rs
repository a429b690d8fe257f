//! Upstream credentials, read through the vault.
//!
//! Rows are cached for a short time so every relay start does not hit SQLite.
//! Secrets are decrypted per read; the cache holds only ciphertext.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hearth_crypto::{CredentialVault, CryptoError, EncryptedSecret, NONCE_SIZE};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::storage::{CredentialRow, CredentialWrite, DatabaseError, RelayDatabase};

pub const HUB_URL: &str = "hub_url";
pub const HUB_TOKEN: &str = "hub_token";
pub const CONTROLLER_HOST: &str = "controller_host";
pub const CONTROLLER_USERNAME: &str = "controller_username";
pub const CONTROLLER_PASSWORD: &str = "controller_password";

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("missing credential: {0}")]
    NotConfigured(&'static str),

    #[error("stored credential {purpose} is unreadable: {source}")]
    Unreadable {
        purpose: &'static str,
        #[source]
        source: CryptoError,
    },

    #[error("failed to encrypt credential: {0}")]
    Seal(#[source] CryptoError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

#[derive(Clone)]
pub struct HubCredentials {
    pub url: String,
    pub token: String,
}

impl std::fmt::Debug for HubCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubCredentials")
            .field("url", &self.url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Clone)]
pub struct ControllerCredentials {
    pub host: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for ControllerCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerCredentials")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

struct CachedRows {
    rows: HashMap<String, CredentialRow>,
    fetched_at: Instant,
}

pub struct CredentialStore {
    db: RelayDatabase,
    vault: Arc<CredentialVault>,
    cache: RwLock<Option<CachedRows>>,
    cache_ttl: Duration,
}

impl CredentialStore {
    pub fn new(db: RelayDatabase, vault: Arc<CredentialVault>) -> Self {
        Self::with_cache_ttl(db, vault, DEFAULT_CACHE_TTL)
    }

    pub fn with_cache_ttl(
        db: RelayDatabase,
        vault: Arc<CredentialVault>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            db,
            vault,
            cache: RwLock::new(None),
            cache_ttl,
        }
    }

    /// Hub base URL and decrypted long-lived token.
    pub async fn hub(&self) -> Result<HubCredentials, CredentialError> {
        let rows = self.rows().await?;
        let url = plain(&rows, HUB_URL)?;
        let token = self.open(&rows, HUB_TOKEN)?;
        Ok(HubCredentials { url, token })
    }

    /// Surveillance-controller host, username and decrypted password.
    pub async fn controller(&self) -> Result<ControllerCredentials, CredentialError> {
        let rows = self.rows().await?;
        Ok(ControllerCredentials {
            host: plain(&rows, CONTROLLER_HOST)?,
            username: plain(&rows, CONTROLLER_USERNAME)?,
            password: self.open(&rows, CONTROLLER_PASSWORD)?,
        })
    }

    pub async fn set_hub(&self, url: &str, token: &str) -> Result<(), CredentialError> {
        let sealed = self.vault.encrypt_str(token).map_err(CredentialError::Seal)?;
        let (ciphertext, nonce) = sealed.to_hex();
        let url = url.trim().trim_end_matches('/');
        self.db
            .put_credentials(&[
                CredentialWrite::plain(HUB_URL, url),
                CredentialWrite::sealed(HUB_TOKEN, &ciphertext, &nonce),
            ])
            .await?;
        self.invalidate().await;
        info!(url = %url, "Hub credentials updated");
        Ok(())
    }

    pub async fn set_controller(
        &self,
        host: &str,
        username: &str,
        password: &str,
    ) -> Result<(), CredentialError> {
        let sealed = self
            .vault
            .encrypt_str(password)
            .map_err(CredentialError::Seal)?;
        let (ciphertext, nonce) = sealed.to_hex();
        self.db
            .put_credentials(&[
                CredentialWrite::plain(CONTROLLER_HOST, host.trim()),
                CredentialWrite::plain(CONTROLLER_USERNAME, username),
                CredentialWrite::sealed(CONTROLLER_PASSWORD, &ciphertext, &nonce),
            ])
            .await?;
        self.invalidate().await;
        info!(host = %host, "Controller credentials updated");
        Ok(())
    }

    /// Drop cached rows so the next read goes to the database.
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    async fn rows(&self) -> Result<HashMap<String, CredentialRow>, CredentialError> {
        if let Some(cached) = self.cache.read().await.as_ref() {
            if cached.fetched_at.elapsed() < self.cache_ttl {
                return Ok(cached.rows.clone());
            }
        }

        let mut cache = self.cache.write().await;
        // Another task may have refilled it while we waited for the write lock.
        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < self.cache_ttl {
                return Ok(cached.rows.clone());
            }
        }

        let rows: HashMap<String, CredentialRow> = self
            .db
            .list_credentials()
            .await?
            .into_iter()
            .map(|r| (r.purpose.clone(), r))
            .collect();
        debug!(count = rows.len(), "Credential cache refilled");
        *cache = Some(CachedRows {
            rows: rows.clone(),
            fetched_at: Instant::now(),
        });
        Ok(rows)
    }

    fn open(
        &self,
        rows: &HashMap<String, CredentialRow>,
        purpose: &'static str,
    ) -> Result<String, CredentialError> {
        let row = rows
            .get(purpose)
            .filter(|r| !r.value.is_empty())
            .ok_or(CredentialError::NotConfigured(purpose))?;
        if !row.encrypted {
            return Ok(row.value.clone());
        }
        let unreadable = |source: CryptoError| CredentialError::Unreadable { purpose, source };
        let nonce = row.nonce.as_deref().ok_or_else(|| {
            unreadable(CryptoError::InvalidNonceLength {
                expected: NONCE_SIZE,
                actual: 0,
            })
        })?;
        let sealed = EncryptedSecret::from_hex(&row.value, nonce).map_err(unreadable)?;
        self.vault.decrypt_string(&sealed).map_err(unreadable)
    }
}

fn plain(
    rows: &HashMap<String, CredentialRow>,
    purpose: &'static str,
) -> Result<String, CredentialError> {
    rows.get(purpose)
        .map(|r| r.value.clone())
        .filter(|v| !v.is_empty())
        .ok_or(CredentialError::NotConfigured(purpose))
}
