//! Crypto error types.

use std::path::PathBuf;

/// Errors from cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Authentication tag did not verify, or the plaintext was not valid UTF-8.
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid nonce length: expected {expected}, got {actual}")]
    InvalidNonceLength { expected: usize, actual: usize },

    #[error("Invalid hex encoding: {0}")]
    InvalidHex(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors resolving the vault key at startup.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Encryption key is not 64 hex characters: {0}")]
    InvalidKey(#[source] CryptoError),

    #[error(
        "Encryption key file {} not found. In production the key must be provisioned \
         before startup: run `openssl rand -hex 32 > {0} && chmod 600 {0}` \
         or set HEARTH_ENCRYPTION_KEY",
        path.display()
    )]
    MissingKeyFile { path: PathBuf },

    #[error("Encryption key file {} has insecure permissions {mode:o} (expected 600)", path.display())]
    InsecureKeyFile { path: PathBuf, mode: u32 },

    #[error("Encryption key file {}: {source}", path.display())]
    KeyFile {
        path: PathBuf,
        #[source]
        source: CryptoError,
    },
}
