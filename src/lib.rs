//! assessor-sync - offline-first data layer for county assessor apps
//!
//! Records are kept in a local `SQLite` store. Every mutation appends to a
//! durable operation queue in the same transaction, and the sync engine
//! replays the queue against the remote backend in order.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod cli;
pub mod config;
pub mod error;
pub mod features;
pub mod output;
pub mod storage;

pub use cli::args::{Cli, Commands, OutputFormat};
pub use error::SyncError;
pub use features::store::{LocalStore, Record};
pub use features::sync::{
    EventBus, EventKind, GatewayRegistry, RemoteGateway, SyncEngine, SyncEvent, SyncQueue,
    SyncStatus,
};
pub use storage::Database;
