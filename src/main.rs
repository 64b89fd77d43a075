//! SnapKV server entry point.
//!
//! Parses the command line, loads the snapshot, starts the expiry sweeper and
//! serves clients until Ctrl+C.

use anyhow::Context;
use clap::Parser;
use snapkv::config::Config;
use snapkv::server::Server;
use snapkv::snapshot::{self, SnapshotError};
use snapkv::storage::{start_expiry_sweeper, StorageEngine};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging(config: &Config) {
    let filter = match &config.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Loads the snapshot into `storage`. A damaged file is reported but never
/// prevents startup.
fn load_snapshot(config: &Config, storage: &StorageEngine) {
    let path = config.snapshot_path();
    match snapshot::load_into(&path, storage) {
        Ok(_) => {}
        Err(e @ SnapshotError::Corrupt { .. }) => warn!(
            path = %path.display(),
            error = %e,
            keys = storage.len(),
            "Snapshot is corrupt, continuing with the keys read before the damage"
        ),
        Err(e) => warn!(
            path = %path.display(),
            error = %e,
            "Could not read snapshot, starting with an empty dataset"
        ),
    }
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, stopping server...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_logging(&config);

    info!(version = snapkv::VERSION, "Starting SnapKV");
    info!(dir = %config.dir, dbfilename = %config.dbfilename, "Snapshot location");

    let storage = Arc::new(StorageEngine::new());
    load_snapshot(&config, &storage);

    let _sweeper = start_expiry_sweeper(Arc::clone(&storage));

    let server = Server::bind(
        &config.bind_address(),
        Arc::clone(&storage),
        Arc::new(config.server_config()),
    )
    .await
    .context("cannot start server")?;
    info!(addr = %server.local_addr()?, "Ready to accept connections");

    server.run_until(shutdown_signal()).await;

    info!("Server shutdown complete");
    Ok(())
}
