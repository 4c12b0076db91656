//! Configuration management for assessor-sync.
//!
//! This module handles loading configuration from `~/.assessor-sync/`.

mod paths;
mod settings;

pub use paths::Paths;
pub use settings::{Config, LoggingConfig, RemoteConfig, SyncConfig};
