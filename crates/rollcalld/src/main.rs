//! rollcalld — Biometric attendance daemon.
//!
//! Owns the identity store, the enrollment image archive, and the clients
//! for the face model runtime, and exposes enrollment, attendance capture,
//! and reporting over D-Bus.

mod config;
mod dbus_interface;
mod engine;
mod models;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use rollcall_store::{FsBlobStore, SqliteStore, KEY_LEN};

use crate::config::Config;
use crate::dbus_interface::RollcallService;
use crate::models::{DbusExtractor, DbusLivenessGate};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::from_env();
    tracing::info!(
        db = %config.db_path.display(),
        images = %config.blob_dir.display(),
        threshold = config.match_threshold,
        "configuration loaded"
    );

    let key = match &config.seal_key_file {
        Some(path) => Some(load_or_create_key(path)?),
        None => {
            tracing::warn!("no sealing key configured; templates are stored as plain JSON");
            None
        }
    };
    let sealed = key.is_some();

    let store = SqliteStore::open(&config.db_path, key)
        .with_context(|| format!("open store {}", config.db_path.display()))?;
    let blobs = FsBlobStore::open(&config.blob_dir)
        .with_context(|| format!("open image archive {}", config.blob_dir.display()))?;

    let proxy = models::connect(Duration::from_secs(config.model_timeout_secs))
        .context("connect to face model runtime")?;
    let gate = Arc::new(DbusLivenessGate::new(proxy.clone()));
    let extractor = Arc::new(DbusExtractor::new(proxy));

    let engine = engine::spawn_engine(store, blobs, gate, extractor, config.match_threshold);
    let service = RollcallService::new(engine, config.match_threshold, sealed);

    let _conn = zbus::connection::Builder::system()?
        .name("org.rollcall.Attendance1")?
        .serve_at("/org/rollcall/Attendance1", service)?
        .build()
        .await?;

    tracing::info!("rollcalld ready on org.rollcall.Attendance1");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}

/// Load the AES-256 sealing key, generating one on first run.
fn load_or_create_key(path: &Path) -> Result<[u8; KEY_LEN]> {
    match std::fs::read(path) {
        Ok(bytes) => bytes.try_into().map_err(|bytes: Vec<u8>| {
            anyhow::anyhow!(
                "sealing key file {} holds {} bytes, need exactly {KEY_LEN}",
                path.display(),
                bytes.len()
            )
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
            let key = rollcall_store::generate_key();
            write_new_key(path, &key)
                .with_context(|| format!("write sealing key {}", path.display()))?;
            tracing::info!(path = %path.display(), "generated new template sealing key");
            Ok(key)
        }
        Err(e) => Err(e).with_context(|| format!("read sealing key {}", path.display())),
    }
}

fn write_new_key(path: &Path, key: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(key)
}
