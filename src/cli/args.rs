use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "assessor-sync")]
#[command(about = "Offline-first record store and sync queue for county assessor field work")]
#[command(long_about = "assessor-sync - offline-first data layer for assessor apps

Records are written to a local SQLite store. Every change is queued and
pushed to the county backend when a sync pass runs, in the order it was made.

QUICK START:
  assessor-sync record put parcels '{\"owner\": \"Diaz\"}' --id p-17
  assessor-sync status                 Show pending changes
  assessor-sync sync                   Push pending changes once
  assessor-sync sync --watch           Keep syncing until Ctrl-C

OUTPUT FORMATS:
  --output pretty    Human-readable colored output (default)
  --output json      Machine-readable JSON for scripting

Configuration lives in ~/.assessor-sync/config.yaml.")]
#[command(version, propagate_version = true)]
pub struct Cli {
    /// Output format for command results
    ///
    /// Use 'pretty' for human-readable colored output (default),
    /// or 'json' for machine-readable output suitable for scripting.
    #[arg(short, long, value_enum, default_value = "pretty", global = true)]
    pub output: OutputFormat,

    /// Database file to use instead of ~/.assessor-sync/store.db
    #[arg(long, global = true, env = "ASSESSOR_SYNC_DB")]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for command results.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable colored output.
    #[default]
    Pretty,
    /// Machine-readable JSON output.
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show sync queue status
    ///
    /// Displays pending, synced and stuck changes.
    Status,

    /// Push pending changes to the remote backend
    ///
    /// Replays every pending change in order against the REST backend
    /// configured under `remote` in config.yaml. Failed changes stay queued
    /// and are retried on the next pass.
    ///
    /// # Examples
    ///
    ///   assessor-sync sync                     One pass
    ///   assessor-sync sync --watch             Pass now, then every interval
    ///   assessor-sync sync -w --interval-ms 5000
    Sync(SyncArgs),

    /// Inspect or administer the sync queue
    #[command(alias = "q")]
    Queue(QueueArgs),

    /// Read and write local records
    #[command(alias = "r")]
    Record(RecordArgs),
}

#[derive(Args)]
pub struct SyncArgs {
    /// Keep running and sync on an interval until interrupted
    /// (default when sync.auto_sync is true)
    #[arg(long, short = 'w')]
    pub watch: bool,

    /// Auto-sync interval in milliseconds (overrides sync.interval_ms)
    #[arg(long)]
    pub interval_ms: Option<u64>,
}

#[derive(Args)]
pub struct QueueArgs {
    #[command(subcommand)]
    pub command: QueueCommands,
}

/// Sync queue subcommands.
#[derive(Subcommand)]
pub enum QueueCommands {
    /// List queued changes
    ///
    /// Shows pending changes in order by default, or the most recent
    /// changes in any state with --all.
    List {
        /// Include synced changes, newest first
        #[arg(long)]
        all: bool,

        /// Maximum changes to show
        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,
    },

    /// List stuck changes
    ///
    /// Pending changes that have failed at least `threshold` times. They are
    /// still retried; this is for reporting only.
    Failed {
        /// Failure count threshold (defaults to sync.stuck_threshold)
        #[arg(long, short = 't')]
        threshold: Option<u32>,
    },

    /// Delete every queued change, synced or not
    ///
    /// Pending changes are lost and will never reach the backend.
    Clear {
        /// Confirm the purge
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args)]
pub struct RecordArgs {
    #[command(subcommand)]
    pub command: RecordCommands,
}

/// Local record subcommands.
#[derive(Subcommand)]
pub enum RecordCommands {
    /// Create or overwrite a record
    ///
    /// # Examples
    ///
    ///   assessor-sync record put parcels '{"acres": 40}' --id p-17
    ///   assessor-sync record put appeals '{"parcel": "p-17"}'
    Put {
        /// Table (collection) name
        table: String,

        /// Record fields as a JSON object
        json: String,

        /// Record id (defaults to an `id` inside the JSON, else a new UUID)
        #[arg(long)]
        id: Option<String>,
    },

    /// Show one record
    Get {
        /// Table (collection) name
        table: String,

        /// Record id
        id: String,
    },

    /// Merge fields into an existing record
    Update {
        /// Table (collection) name
        table: String,

        /// Record id
        id: String,

        /// Fields to merge as a JSON object
        json: String,
    },

    /// Delete a record
    Delete {
        /// Table (collection) name
        table: String,

        /// Record id
        id: String,
    },

    /// List records of a table in insertion order
    ///
    /// # Examples
    ///
    ///   assessor-sync record query parcels
    ///   assessor-sync record query parcels --where zoning=R1 -n 10
    Query {
        /// Table (collection) name
        table: String,

        /// Only records whose field equals the value (repeatable)
        #[arg(long = "where", short = 'w', value_name = "FIELD=VALUE", value_parser = parse_filter)]
        filters: Vec<(String, String)>,

        /// Maximum records to show
        #[arg(long, short = 'n')]
        limit: Option<usize>,
    },
}

fn parse_filter(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((field, value)) if !field.is_empty() => Ok((field.to_string(), value.to_string())),
        _ => Err(format!("expected FIELD=VALUE, got '{s}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filter() {
        assert_eq!(
            parse_filter("zoning=R1").unwrap(),
            ("zoning".to_string(), "R1".to_string())
        );
        assert_eq!(
            parse_filter("note=a=b").unwrap(),
            ("note".to_string(), "a=b".to_string())
        );
        assert!(parse_filter("zoning").is_err());
        assert!(parse_filter("=R1").is_err());
    }

    #[test]
    fn test_cli_parses_query() {
        let cli = Cli::try_parse_from([
            "assessor-sync",
            "-o",
            "json",
            "record",
            "query",
            "parcels",
            "--where",
            "zoning=R1",
            "-n",
            "5",
        ])
        .unwrap();

        assert_eq!(cli.output, OutputFormat::Json);
        match cli.command {
            Commands::Record(RecordArgs {
                command: RecordCommands::Query { table, filters, limit },
            }) => {
                assert_eq!(table, "parcels");
                assert_eq!(filters.len(), 1);
                assert_eq!(limit, Some(5));
            }
            _ => panic!("expected record query"),
        }
    }

    #[test]
    fn test_cli_verifies() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
