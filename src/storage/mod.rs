//! Storage layer for assessor-sync.
//!
//! This module provides SQLite-based persistence for:
//! - Local records (the offline copy of application data)
//! - Sync queue (mutations waiting for the remote backend)

mod database;
mod migrations;

pub use database::Database;
