use std::path::Path;

use anyhow::Context;
use common::ShutdownController;
use common::config::Configuration;
use flights::Services;
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Configuration::load().context("Failed to load configuration")?;

    ensure_sqlite_dir(&config.database.dsn).await?;
    ensure_sqlite_dir(&config.document_store.dsn).await?;

    let services = Services::open(&config)
        .await
        .context("Failed to open metadata catalog and document store")?;
    let shutdown = ShutdownController::new();
    log::info!(
        "Data repository ready (batch size {}, snapshot batch size {})",
        config.filesystem.batch_size,
        config.filesystem.snapshot_batch_size
    );
    log::debug!("Services: {services:?}");

    signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    log::info!("Shutting down data repository");
    shutdown.shutdown();

    Ok(())
}

/// SQLite creates the database file but not its directory.
async fn ensure_sqlite_dir(dsn: &str) -> anyhow::Result<()> {
    let Some(file) = dsn.strip_prefix("sqlite://") else {
        return Ok(());
    };
    let file = file.split('?').next().unwrap_or(file);
    if let Some(dir) = Path::new(file).parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    Ok(())
}
