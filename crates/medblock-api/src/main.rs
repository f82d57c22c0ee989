//! medblock-server binary.
//!
//! Reads `config.toml` (or the path specified with `--config`) layered with
//! `MEDBLOCK_*` environment variables, initializes the SQLite patient store,
//! and serves the JSON API over HTTP.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use clap::Parser;
use medblock_api::{AppState, ServerConfig};
use medblock_core::engine::StorageLocation;
use medblock_store_sqlite::{Session, SessionConfig, SqliteLoader};
use medblock_sync::{DEFAULT_CAPACITY, DEFAULT_CHANNEL, SyncHub};
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "MedBlock patient records server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Load configuration.
  let settings = config::Config::builder()
    .set_default("host", "127.0.0.1")?
    .set_default("port", 8080_i64)?
    .set_default("store_path", "~/.local/share/medblock/medblock.db")?
    .set_default("seed_sample_data", true)?
    .set_default("channel_name", DEFAULT_CHANNEL)?
    .set_default("sync_capacity", DEFAULT_CAPACITY as u64)?
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("MEDBLOCK"))
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  // Expand `~` in store path.
  let store_path = expand_tilde(&server_cfg.store_path);
  let location = StorageLocation::parse(&store_path.to_string_lossy());

  // Start initializing before the first request. A failure here is not fatal:
  // requests retry it and `/health` reports it.
  let session = Session::new(
    SqliteLoader,
    SessionConfig::new(location.clone()).with_seed(server_cfg.seed_sample_data),
  );
  if !medblock_api::warm_up(&session).await {
    tracing::warn!(store = %location, "serving with an uninitialized patient store");
  }

  let hub = SyncHub::with_capacity(server_cfg.sync_capacity);
  let state = AppState::new(Arc::new(session), hub, &server_cfg.channel_name);

  let app = medblock_api::router(state);
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
