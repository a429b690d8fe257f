//! Hearth Credential Vault
//!
//! Keeps hub and surveillance-controller secrets encrypted at rest.
//!
//! ## Crypto primitives
//!
//! - **Key**: 256-bit, from configuration or an owner-only hex key file
//! - **Encryption**: ChaCha20-Poly1305 AEAD, random 12-byte nonce per secret
//! - **Session tokens**: 256 random bits, persisted only as SHA-256

pub mod error;
pub mod key;
pub mod token;
pub mod vault;

pub use error::{CryptoError, VaultError};
pub use key::{KeySource, VaultKey, resolve_key};
pub use token::{hash_token, random_token};
pub use vault::{CredentialVault, EncryptedSecret, NONCE_SIZE};
