//! Credential vault: envelope encryption of stored secrets.
//!
//! ChaCha20-Poly1305 with a fresh random 96-bit nonce per encryption and the
//! 128-bit tag appended to the ciphertext. Decryption fails closed.

use std::path::Path;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;

use crate::error::{CryptoError, VaultError};
use crate::key::{KeySource, VaultKey, resolve_key};

/// Nonce size for ChaCha20-Poly1305.
pub const NONCE_SIZE: usize = 12;

/// Ciphertext plus the nonce needed to open it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedSecret {
    /// Ciphertext with the 16-byte auth tag appended.
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
}

impl EncryptedSecret {
    /// Hex-encoded `(ciphertext, nonce)` for storage.
    pub fn to_hex(&self) -> (String, String) {
        (hex::encode(&self.ciphertext), hex::encode(self.nonce))
    }

    pub fn from_hex(ciphertext: &str, nonce: &str) -> Result<Self, CryptoError> {
        let ciphertext =
            hex::decode(ciphertext).map_err(|e| CryptoError::InvalidHex(e.to_string()))?;
        let nonce_bytes = hex::decode(nonce).map_err(|e| CryptoError::InvalidHex(e.to_string()))?;
        let nonce: [u8; NONCE_SIZE] =
            nonce_bytes
                .as_slice()
                .try_into()
                .map_err(|_| CryptoError::InvalidNonceLength {
                    expected: NONCE_SIZE,
                    actual: nonce_bytes.len(),
                })?;
        Ok(Self { ciphertext, nonce })
    }
}

/// Encrypts and decrypts credential secrets with the process-wide key.
///
/// Resolve once at startup and share behind an `Arc`.
pub struct CredentialVault {
    cipher: ChaCha20Poly1305,
    source: KeySource,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl CredentialVault {
    pub fn new(key: &VaultKey, source: KeySource) -> Self {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        Self { cipher, source }
    }

    /// Resolve the key (explicit, key file, or generated) and build the vault.
    pub fn resolve(
        explicit_hex: Option<&str>,
        key_file: &Path,
        production: bool,
    ) -> Result<Self, VaultError> {
        let (key, source) = resolve_key(explicit_hex, key_file, production)?;
        Ok(Self::new(&key, source))
    }

    pub const fn source(&self) -> &KeySource {
        &self.source
    }

    /// Encrypt under a freshly drawn random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedSecret, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        Ok(EncryptedSecret {
            ciphertext,
            nonce: nonce_bytes,
        })
    }

    /// Decrypt and verify. Never returns partial plaintext.
    pub fn decrypt(&self, ciphertext: &[u8], nonce_bytes: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(CryptoError::InvalidNonceLength {
                expected: NONCE_SIZE,
                actual: nonce_bytes.len(),
            });
        }
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }

    pub fn encrypt_str(&self, plaintext: &str) -> Result<EncryptedSecret, CryptoError> {
        self.encrypt(plaintext.as_bytes())
    }

    pub fn decrypt_string(&self, secret: &EncryptedSecret) -> Result<String, CryptoError> {
        let bytes = self.decrypt(&secret.ciphertext, &secret.nonce)?;
        String::from_utf8(bytes)
            .map_err(|_| CryptoError::DecryptionFailed("plaintext is not UTF-8".into()))
    }
}
