//! Queue administration commands.

use serde_json::json;
use tracing::warn;

use crate::cli::args::{OutputFormat, QueueCommands};
use crate::config::Config;
use crate::error::SyncError;
use crate::features::store::LocalStore;
use crate::output::{format_items, to_json};

/// Execute queue subcommands.
///
/// # Errors
///
/// Returns an error if the queue cannot be read or cleared, or if `clear`
/// is run without `--force`.
pub async fn queue(
    store: &LocalStore,
    config: &Config,
    cmd: QueueCommands,
    format: OutputFormat,
) -> Result<String, SyncError> {
    let queue = store.queue();

    match cmd {
        QueueCommands::List { all, limit } => {
            if all {
                let items = queue.recent(limit).await?;
                format_items(&items, "Recent changes", format)
            } else {
                let mut items = queue.pending().await?;
                items.truncate(limit);
                format_items(&items, "Pending changes", format)
            }
        }
        QueueCommands::Failed { threshold } => {
            let threshold = threshold.unwrap_or(config.sync.stuck_threshold);
            let items = queue.failed_items(threshold).await?;
            format_items(
                &items,
                &format!("Stuck changes ({threshold}+ failures)"),
                format,
            )
        }
        QueueCommands::Clear { force } => {
            if !force {
                return Err(SyncError::Config(
                    "Use --force to clear the queue; pending changes will never be synced".to_string(),
                ));
            }
            let cleared = queue.clear().await?;
            warn!(cleared, "Sync queue cleared");

            match format {
                OutputFormat::Json => to_json(&json!({ "cleared": cleared })),
                OutputFormat::Pretty => Ok(format!("Cleared {cleared} changes from the queue")),
            }
        }
    }
}
