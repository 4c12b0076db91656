//! Command implementations.
//!
//! Each command returns the text to print; `main` does the printing.

mod queue;
mod record;
mod sync;

pub use queue::queue;
pub use record::record;
pub use sync::{status, sync};
