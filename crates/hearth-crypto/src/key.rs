//! Vault key material and its resolution order.
//!
//! 1. An explicit 64-hex key from configuration.
//! 2. Production: an existing key file. A missing file is fatal.
//! 3. Otherwise: the same key file, generated with owner-only permissions if absent.

use std::path::{Path, PathBuf};

use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::{Zeroize, Zeroizing};

use crate::error::{CryptoError, VaultError};

/// Key length for ChaCha20-Poly1305.
pub const KEY_SIZE: usize = 32;

/// A 256-bit vault key, wiped on drop.
pub struct VaultKey([u8; KEY_SIZE]);

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VaultKey([REDACTED])")
    }
}

impl Drop for VaultKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Where the active key came from. Logged once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    Explicit,
    KeyFile(PathBuf),
    Generated(PathBuf),
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Explicit => f.write_str("configured key"),
            Self::KeyFile(p) => write!(f, "key file {}", p.display()),
            Self::Generated(p) => write!(f, "generated key file {}", p.display()),
        }
    }
}

impl VaultKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Parse 64 hex characters. Surrounding whitespace is ignored.
    pub fn from_hex(input: &str) -> Result<Self, CryptoError> {
        let trimmed = input.trim();
        if trimmed.len() != KEY_SIZE * 2 {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: trimmed.len() / 2,
            });
        }
        let mut bytes = [0u8; KEY_SIZE];
        hex::decode_to_slice(trimmed, &mut bytes)
            .map_err(|e| CryptoError::InvalidHex(e.to_string()))?;
        Ok(Self(bytes))
    }

    pub(crate) const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Write the key as hex with 0600 permissions, creating parent dirs.
    pub fn save_to_file(&self, path: &Path) -> Result<(), CryptoError> {
        let dir = path.parent().ok_or_else(|| {
            CryptoError::IoError(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "path has no parent directory",
            ))
        })?;
        std::fs::create_dir_all(dir)?;

        let encoded = Zeroizing::new(hex::encode(self.0));
        std::fs::write(path, encoded.as_bytes())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Read a hex key file, refusing files readable by group or others.
    pub fn load_from_file(path: &Path) -> Result<Self, VaultError> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let metadata = std::fs::metadata(path).map_err(|e| VaultError::KeyFile {
                path: path.to_path_buf(),
                source: e.into(),
            })?;
            let mode = metadata.permissions().mode() & 0o777;
            if mode & 0o077 != 0 {
                return Err(VaultError::InsecureKeyFile {
                    path: path.to_path_buf(),
                    mode,
                });
            }
        }

        let content = Zeroizing::new(std::fs::read_to_string(path).map_err(|e| {
            VaultError::KeyFile {
                path: path.to_path_buf(),
                source: e.into(),
            }
        })?);
        Self::from_hex(&content).map_err(|source| VaultError::KeyFile {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Resolve the vault key following the documented precedence.
pub fn resolve_key(
    explicit_hex: Option<&str>,
    key_file: &Path,
    production: bool,
) -> Result<(VaultKey, KeySource), VaultError> {
    if let Some(hex_key) = explicit_hex.filter(|k| !k.trim().is_empty()) {
        let key = VaultKey::from_hex(hex_key).map_err(VaultError::InvalidKey)?;
        return Ok((key, KeySource::Explicit));
    }

    if key_file.exists() {
        let key = VaultKey::load_from_file(key_file)?;
        return Ok((key, KeySource::KeyFile(key_file.to_path_buf())));
    }

    if production {
        return Err(VaultError::MissingKeyFile {
            path: key_file.to_path_buf(),
        });
    }

    let key = VaultKey::generate();
    key.save_to_file(key_file)
        .map_err(|source| VaultError::KeyFile {
            path: key_file.to_path_buf(),
            source,
        })?;
    Ok((key, KeySource::Generated(key_file.to_path_buf())))
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    const HEX_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn from_hex_accepts_64_chars_with_newline() {
        let key = VaultKey::from_hex(&format!("{HEX_KEY}\n")).unwrap();
        assert_eq!(key.as_bytes()[31], 0x1f);
    }

    #[test]
    fn from_hex_rejects_short_and_non_hex() {
        assert!(matches!(
            VaultKey::from_hex("abcd"),
            Err(CryptoError::InvalidKeyLength { .. })
        ));
        let bad = "zz".repeat(32);
        assert!(matches!(
            VaultKey::from_hex(&bad),
            Err(CryptoError::InvalidHex(_))
        ));
    }

    #[test]
    fn debug_redacts_key() {
        let key = VaultKey::from_hex(HEX_KEY).unwrap();
        assert!(!format!("{key:?}").contains("0001"));
    }

    #[test]
    fn explicit_key_wins_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.key");
        let (_, source) = resolve_key(Some(HEX_KEY), &path, true).unwrap();
        assert_eq!(source, KeySource::Explicit);
        assert!(!path.exists());
    }

    #[test]
    fn invalid_explicit_key_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.key");
        assert!(matches!(
            resolve_key(Some("nope"), &path, false),
            Err(VaultError::InvalidKey(_))
        ));
    }

    #[test]
    fn production_without_key_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.key");
        let err = resolve_key(None, &path, true).unwrap_err();
        assert!(matches!(err, VaultError::MissingKeyFile { .. }));
        assert!(err.to_string().contains("chmod 600"));
        assert!(!path.exists());
    }

    #[test]
    fn development_generates_then_reuses_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("secret.key");

        let (first, source) = resolve_key(None, &path, false).unwrap();
        assert_eq!(source, KeySource::Generated(path.clone()));
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.len(), 64);

        let (second, source) = resolve_key(None, &path, true).unwrap();
        assert_eq!(source, KeySource::KeyFile(path.clone()));
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[cfg(unix)]
    #[test]
    fn generated_key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.key");
        resolve_key(None, &path, false).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn load_rejects_group_readable_key_file() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.key");
        VaultKey::generate().save_to_file(&path).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o640)).unwrap();

        assert!(matches!(
            VaultKey::load_from_file(&path),
            Err(VaultError::InsecureKeyFile { mode: 0o640, .. })
        ));
    }

    #[test]
    fn corrupt_key_file_is_reported_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.key");
        std::fs::write(&path, "short").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        }
        let err = resolve_key(None, &path, false).unwrap_err();
        assert!(matches!(err, VaultError::KeyFile { .. }));
        assert!(err.to_string().contains("secret.key"));
    }
}
