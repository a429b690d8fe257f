//! Hearth Relay Server
//!
//! Cookie-authenticated WebSocket relay between dashboards and the home hub,
//! plus camera livestream fan-out.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use hearth_core::Config;
use hearth_core::config::{database_path, key_file_path, load_config};
use hearth_core::tracing_init::init_tracing_with_metrics;
use hearth_crypto::CredentialVault;

use hearth_relay::auth::password::hash_password;
use hearth_relay::auth::{OriginPolicy, SessionValidator};
use hearth_relay::credentials::CredentialStore;
use hearth_relay::hub::{HubRelay, HubRestClient, UpstreamConnector};
use hearth_relay::livestream::{LivestreamManager, ProtectController};
use hearth_relay::registry::ConnectionRegistry;
use hearth_relay::server::{AppState, CookieSettings, build_router};
use hearth_relay::storage::RelayDatabase;
use hearth_relay::tls;

#[derive(Parser, Debug)]
#[command(name = "hearth-relay")]
#[command(
    version,
    about = "Hearth relay server - hub WebSocket relay and camera fan-out"
)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Path to SQLite database file.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Path to the vault key file.
    #[arg(long, global = true)]
    key_file: Option<PathBuf>,

    /// Production mode: enforce origins, require an existing key file.
    #[arg(long, global = true)]
    production: bool,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay (default).
    Serve(ServeArgs),

    /// Create a dashboard login.
    CreateUser {
        username: String,
        #[arg(long, env = "HEARTH_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Store the hub URL and long-lived access token.
    SetHub {
        #[arg(long)]
        url: String,
        #[arg(long, env = "HEARTH_HUB_TOKEN", hide_env_values = true)]
        token: String,
    },

    /// Store surveillance controller credentials.
    SetController {
        #[arg(long)]
        host: String,
        #[arg(long)]
        username: String,
        #[arg(long, env = "HEARTH_CONTROLLER_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Address to listen on.
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Allowed WebSocket origins (comma-separated). Enforced in production.
    #[arg(long, value_delimiter = ',')]
    allowed_origins: Vec<String>,

    /// Hub connect and handshake timeout in seconds.
    #[arg(long)]
    hub_connect_timeout: Option<u64>,

    /// Session lifetime in seconds.
    #[arg(long)]
    session_ttl: Option<i64>,

    /// OTLP collector endpoint (requires the `metrics` feature).
    #[arg(long, env = "HEARTH_METRICS_ENDPOINT")]
    metrics_endpoint: Option<String>,
}

impl CommonArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(path) = &self.db_path {
            config.relay.database_path = Some(path.clone());
        }
        if let Some(path) = &self.key_file {
            config.vault.key_file = Some(path.clone());
        }
        if self.production {
            config.relay.production = true;
        }
    }
}

impl ServeArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(addr) = self.addr {
            config.relay.addr = addr.to_string();
        }
        if !self.allowed_origins.is_empty() {
            config.relay.allowed_origins.clone_from(&self.allowed_origins);
        }
        if let Some(secs) = self.hub_connect_timeout {
            config.relay.hub_connect_timeout_secs = secs;
        }
        if let Some(secs) = self.session_ttl {
            config.relay.session_ttl_secs = secs;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    let mut config = load_config()?;
    cli.common.apply(&mut config);
    let metrics_endpoint = match &command {
        Command::Serve(args) => {
            args.apply(&mut config);
            args.metrics_endpoint.clone()
        }
        _ => None,
    };

    let telemetry = init_tracing_with_metrics(
        "hearth_relay=info",
        cli.common.log_json,
        metrics_endpoint.as_deref(),
    );
    tls::install_crypto_provider();

    let db = open_database(&config).await?;
    let vault = open_vault(&config)?;
    let credentials = Arc::new(CredentialStore::new(db.clone(), Arc::new(vault)));

    match command {
        Command::Serve(_) => serve(&config, db, credentials).await?,
        Command::CreateUser { username, password } => {
            let hash = hash_password(&password)
                .map_err(|e| anyhow::anyhow!("Failed to hash password: {e}"))?;
            let id = uuid::Uuid::new_v4().to_string();
            db.create_user(&id, &username, &hash).await?;
            info!(user_id = %id, username = %username, "User created");
        }
        Command::SetHub { url, token } => {
            credentials.set_hub(&url, &token).await?;
        }
        Command::SetController {
            host,
            username,
            password,
        } => {
            credentials
                .set_controller(&host, &username, &password)
                .await?;
        }
    }

    telemetry.shutdown();
    Ok(())
}

async fn open_database(config: &Config) -> anyhow::Result<RelayDatabase> {
    let path = match &config.relay.database_path {
        Some(path) => path.clone(),
        None => database_path().context("Cannot determine data directory; pass --db-path")?,
    };
    info!(path = %path.display(), "Opening relay database");
    Ok(RelayDatabase::open(&path).await?)
}

fn open_vault(config: &Config) -> anyhow::Result<CredentialVault> {
    let key_file = match &config.vault.key_file {
        Some(path) => path.clone(),
        None => key_file_path().context("Cannot determine data directory; pass --key-file")?,
    };
    let vault = CredentialVault::resolve(
        config.vault.encryption_key.as_deref(),
        &key_file,
        config.relay.production,
    )?;
    info!(source = %vault.source(), "Credential vault ready");
    Ok(vault)
}

async fn serve(
    config: &Config,
    db: RelayDatabase,
    credentials: Arc<CredentialStore>,
) -> anyhow::Result<()> {
    let relay_cfg = &config.relay;
    let addr: SocketAddr = relay_cfg
        .addr
        .parse()
        .with_context(|| format!("Invalid listen address {}", relay_cfg.addr))?;
    let connect_timeout = Duration::from_secs(relay_cfg.hub_connect_timeout_secs);

    let sessions = SessionValidator::new(
        db.clone(),
        Duration::from_secs(u64::try_from(relay_cfg.session_ttl_secs).unwrap_or(0)),
    );
    let origins = OriginPolicy::new(relay_cfg.production, &relay_cfg.allowed_origins);
    if origins.is_enforced() && relay_cfg.allowed_origins.is_empty() {
        warn!("No allowed origins configured; only same-host origins will be accepted");
    }

    let relay = HubRelay::new(
        Arc::clone(&credentials),
        UpstreamConnector::new(connect_timeout),
        Duration::from_secs(relay_cfg.client_auth_timeout_secs),
        ConnectionRegistry::new(),
    );
    let rest = HubRestClient::new(Arc::clone(&credentials), connect_timeout)?;
    let controller = ProtectController::new(
        Arc::clone(&credentials),
        config.livestream.controller_insecure_tls,
        connect_timeout,
    )?;

    let state = AppState {
        db,
        sessions: sessions.clone(),
        origins: Arc::new(origins),
        cookie: CookieSettings {
            name: relay_cfg.session_cookie.clone(),
            secure: relay_cfg.production,
        },
        relay: Arc::new(relay),
        rest: Arc::new(rest),
        livestreams: LivestreamManager::new(Arc::new(controller)),
        subscriber_buffer: config.livestream.subscriber_buffer,
    };

    // Spawn background task to sweep expired sessions (hourly)
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        interval.tick().await; // Skip first immediate tick
        loop {
            interval.tick().await;
            match sessions.sweep_expired().await {
                Ok(removed) if removed > 0 => {
                    info!(removed, "Background session sweep completed");
                }
                Err(e) => {
                    warn!(error = %e, "Background session sweep failed");
                }
                _ => {}
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %addr,
        production = relay_cfg.production,
        "Relay server listening"
    );

    tokio::select! {
        result = axum::serve(listener, build_router(state)) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Relay stopped");
    Ok(())
}
