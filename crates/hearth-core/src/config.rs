//! Configuration resolution for Hearth.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/hearth/settings.json)
//! 3. Environment variables
//! 4. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Complete Hearth configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub livestream: LivestreamConfig,
}

/// Relay server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub addr: String,
    pub database_path: Option<PathBuf>,
    /// Production mode enforces the origin allow-list, requires an existing
    /// key file and marks session cookies `Secure`.
    pub production: bool,
    pub allowed_origins: Vec<String>,
    pub hub_connect_timeout_secs: u64,
    /// How long a relayed client has to answer the synthetic `auth_required`.
    pub client_auth_timeout_secs: u64,
    pub session_cookie: String,
    pub session_ttl_secs: i64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8099".to_string(),
            database_path: None,
            production: false,
            allowed_origins: Vec::new(),
            hub_connect_timeout_secs: 10,
            client_auth_timeout_secs: 10,
            session_cookie: "hearth_session".to_string(),
            session_ttl_secs: 7 * 24 * 60 * 60, // 7 days
        }
    }
}

/// Credential vault configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VaultConfig {
    /// Explicit 64-hex-character key. Takes precedence over the key file.
    pub encryption_key: Option<String>,
    pub key_file: Option<PathBuf>,
}

/// Livestream fan-out configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivestreamConfig {
    /// Per-subscriber outbound queue depth. A subscriber that falls this far
    /// behind drops media frames instead of stalling the camera.
    pub subscriber_buffer: usize,
    /// Accept self-signed certificates from the surveillance controller.
    pub controller_insecure_tls: bool,
}

impl Default for LivestreamConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 64,
            controller_insecure_tls: true,
        }
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config() -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            let global = load_config_file(&global_path)?;
            merge_config(&mut config, global);
        }
    }

    apply_env_overrides(&mut config);

    Ok(config)
}

/// Per-user Hearth data directory.
pub fn hearth_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".hearth"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/hearth"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("hearth"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    hearth_dir().map(|d| d.join("settings.json"))
}

/// Default path of the relay database.
pub fn database_path() -> Option<PathBuf> {
    hearth_dir().map(|d| d.join("relay.db"))
}

/// Default path of the vault key file.
pub fn key_file_path() -> Option<PathBuf> {
    hearth_dir().map(|d| d.join("secret.key"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut Config, overlay: Config) {
    if overlay.relay.database_path.is_some() {
        base.relay.database_path = overlay.relay.database_path;
    }
    base.relay.addr = overlay.relay.addr;
    base.relay.production = overlay.relay.production;
    base.relay.allowed_origins = overlay.relay.allowed_origins;
    base.relay.hub_connect_timeout_secs = overlay.relay.hub_connect_timeout_secs;
    base.relay.client_auth_timeout_secs = overlay.relay.client_auth_timeout_secs;
    base.relay.session_cookie = overlay.relay.session_cookie;
    base.relay.session_ttl_secs = overlay.relay.session_ttl_secs;

    if overlay.vault.encryption_key.is_some() {
        base.vault.encryption_key = overlay.vault.encryption_key;
    }
    if overlay.vault.key_file.is_some() {
        base.vault.key_file = overlay.vault.key_file;
    }

    base.livestream = overlay.livestream;
}

fn apply_env_overrides(config: &mut Config) {
    apply_overrides(config, |key| std::env::var(key).ok());
}

fn apply_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("HEARTH_ENV") {
        config.relay.production = val.eq_ignore_ascii_case("production");
    }
    if let Some(val) = lookup("HEARTH_ADDR") {
        config.relay.addr = val;
    }
    if let Some(val) = lookup("HEARTH_DB_PATH") {
        config.relay.database_path = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("HEARTH_ALLOWED_ORIGINS") {
        config.relay.allowed_origins = val
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
    }
    if let Some(val) = lookup("HEARTH_HUB_CONNECT_TIMEOUT") {
        if let Ok(n) = val.parse() {
            config.relay.hub_connect_timeout_secs = n;
        }
    }
    if let Some(val) = lookup("HEARTH_ENCRYPTION_KEY") {
        config.vault.encryption_key = Some(val);
    }
    if let Some(val) = lookup("HEARTH_KEY_FILE") {
        config.vault.key_file = Some(PathBuf::from(val));
    }
}
