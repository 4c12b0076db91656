//! Sync command implementation.
//!
//! Builds a sync engine over the configured REST backend and runs it once or
//! until interrupted.

use serde_json::json;
use tracing::warn;

use crate::cli::args::{OutputFormat, SyncArgs};
use crate::config::{Config, SyncConfig};
use crate::error::SyncError;
use crate::features::store::LocalStore;
use crate::features::sync::{EventKind, RestGateway, SyncEngine, SyncEvent};
use crate::output::{format_event_pretty, format_report, format_stats, to_json};

/// Show queue status.
///
/// # Errors
///
/// Returns an error if the queue cannot be read.
pub async fn status(
    store: &LocalStore,
    config: &Config,
    format: OutputFormat,
) -> Result<String, SyncError> {
    let stats = store.queue().stats(config.sync.stuck_threshold).await?;
    format_stats(&stats, format)
}

/// Push pending changes, once or on an interval until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the remote backend is not configured or the pass
/// aborts. Failed items are reported in the output, not as an error.
pub async fn sync(
    store: &LocalStore,
    config: &Config,
    args: &SyncArgs,
    format: OutputFormat,
) -> Result<String, SyncError> {
    let sync_config = engine_config(config, args)?;
    let watching = sync_config.auto_sync;
    let engine = build_engine(store, config, sync_config)?;

    if watching {
        watch(&engine, format).await
    } else {
        let report = engine.synchronize().await?;
        format_report(&report, format)
    }
}

/// Engine settings for this run. Watch mode is the engine's auto-sync.
fn engine_config(config: &Config, args: &SyncArgs) -> Result<SyncConfig, SyncError> {
    let mut sync_config = config.sync.clone();
    sync_config.auto_sync = args.watch || config.sync.auto_sync;
    if let Some(interval_ms) = args.interval_ms {
        sync_config.interval_ms = interval_ms;
    }
    if sync_config.interval_ms == 0 {
        return Err(SyncError::Config(
            "Sync interval must be greater than zero".to_string(),
        ));
    }
    Ok(sync_config)
}

fn build_engine(
    store: &LocalStore,
    config: &Config,
    sync_config: SyncConfig,
) -> Result<SyncEngine, SyncError> {
    let base_url = config.remote.base_url.as_deref().ok_or_else(|| {
        SyncError::Config("remote.base_url is not set in config.yaml".to_string())
    })?;
    if config.remote.tables.is_empty() {
        return Err(SyncError::Config(
            "remote.tables is empty; list the tables to sync in config.yaml".to_string(),
        ));
    }

    let gateways = RestGateway::registry(base_url, &config.remote.tables, config.remote.timeout())?;
    Ok(SyncEngine::new(store.queue(), gateways, sync_config))
}

async fn watch(engine: &SyncEngine, format: OutputFormat) -> Result<String, SyncError> {
    for kind in [
        EventKind::SyncStart,
        EventKind::SyncComplete,
        EventKind::SyncError,
    ] {
        engine.on(kind, move |event| print_event(event, format));
    }

    match engine.synchronize().await {
        Ok(_) | Err(SyncError::SyncInProgress) => {}
        Err(e) => warn!(error = %e, "Initial sync pass aborted"),
    }

    engine.start();
    tokio::signal::ctrl_c().await?;
    engine.dispose();

    let status = engine.status().await?;
    match format {
        OutputFormat::Json => to_json(&json!({ "stopped": true, "status": status })),
        OutputFormat::Pretty => Ok(format!(
            "Stopped watching. {} changes pending.",
            status.pending_changes
        )),
    }
}

fn print_event(event: &SyncEvent, format: OutputFormat) {
    match format {
        OutputFormat::Pretty => println!("{}", format_event_pretty(event)),
        OutputFormat::Json => {
            if let Ok(line) = serde_json::to_string(event) {
                println!("{line}");
            }
        }
    }
}
