//! Monitor command: the long-running daemon.

use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Args;
use confluence_core::{ConfigWatcher, PipelineConfig};
use confluence_pipeline::{FileSnapshotProvider, MonitoringPipeline};
use tokio::sync::watch;

use super::Context;

/// Arguments for the monitor command.
#[derive(Args, Debug, Clone)]
pub struct MonitorArgs {
    /// Directory holding one `<SYMBOL>.json` snapshot per instrument
    #[arg(long)]
    pub snapshots_dir: String,

    /// Comma-separated symbols (defaults to `pipeline.symbols` from config)
    #[arg(long, value_delimiter = ',')]
    pub symbols: Vec<String>,

    /// Seconds between cycles (defaults to `pipeline.cycle_interval_secs`)
    #[arg(long)]
    pub interval_secs: Option<u64>,
}

impl MonitorArgs {
    fn settings(&self, base: &PipelineConfig) -> PipelineConfig {
        let mut settings = base.clone();
        if !self.symbols.is_empty() {
            settings.symbols.clone_from(&self.symbols);
        }
        if let Some(secs) = self.interval_secs {
            settings.cycle_interval_secs = secs;
        }
        settings
    }
}

/// Runs the monitoring pipeline and the kill switch until Ctrl+C.
///
/// # Errors
/// Returns an error if the settings are invalid or the store cannot be
/// reached at startup.
pub async fn run_monitor(context: &Context, args: MonitorArgs) -> Result<()> {
    let settings = args.settings(&context.config.pipeline);
    settings.validate()?;

    let config_store = context.config_store()?;
    let stores = context.stores().await?;
    let governor = Arc::new(context.governor(config_store.clone(), &stores));
    if !governor.restore().await {
        bail!(
            "could not restore kill-switch state: {}",
            governor.status().last_error.unwrap_or_default()
        );
    }

    let provider = Arc::new(FileSnapshotProvider::new(&args.snapshots_dir));
    let pipeline = Arc::new(
        MonitoringPipeline::new(provider, config_store.clone(), settings)
            .with_performance_store(stores.performance.clone()),
    );

    tracing::info!(
        symbols = ?pipeline.settings().symbols,
        store = stores.backend,
        mode = governor.mode().as_str(),
        "Starting monitor"
    );
    tracing::info!("Press Ctrl+C to stop");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let watcher = ConfigWatcher::new(config_store, &context.config_path);
    let watcher_handle = tokio::spawn(async move {
        if let Err(e) = watcher.watch().await {
            tracing::warn!("Config watcher stopped: {}", e);
        }
    });

    let governor_task = {
        let governor = Arc::clone(&governor);
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { governor.run(shutdown).await })
    };
    let pipeline_task = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.run(shutdown_rx).await })
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received Ctrl+C, shutting down");
    let _ = shutdown_tx.send(true);

    if let Err(e) = pipeline_task.await {
        tracing::error!("Pipeline task failed: {}", e);
    }
    if let Err(e) = governor_task.await {
        tracing::error!("Governor task failed: {}", e);
    }
    watcher_handle.abort();

    tracing::info!("Monitor stopped");
    Ok(())
}
