use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use assessor_sync::cli::args::{Cli, Commands};
use assessor_sync::cli::commands;
use assessor_sync::config::Config;
use assessor_sync::{Database, LocalStore};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{}: {:#}", "error".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load().context("Failed to load configuration")?;
    init_tracing(&config.logging.filter);

    let db = match &cli.database {
        Some(path) => Database::open_at(path)?,
        None => Database::open()?,
    };
    let store = LocalStore::new(db);
    let format = cli.output;

    let output = match cli.command {
        Commands::Status => commands::status(&store, &config, format).await?,
        Commands::Sync(args) => commands::sync(&store, &config, &args, format).await?,
        Commands::Queue(args) => commands::queue(&store, &config, args.command, format).await?,
        Commands::Record(args) => commands::record(&store, args.command, format).await?,
    };

    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

/// Logs go to stderr so command output stays pipeable. `RUST_LOG` wins over
/// `logging.filter` from the config.
fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .init();
}
