//! Features of assessor-sync.
//!
//! - Local record store with queue coupling
//! - Durable operation queue and sync engine

pub mod store;
pub mod sync;
