//! Synchronization of local mutations with the remote backend.
//!
//! Every local write appends an item to the durable [`SyncQueue`]. The
//! [`SyncEngine`] replays pending items in order through per-table
//! [`RemoteGateway`]s and reports progress on an [`EventBus`].
//!
//! Features:
//! - Ordered, at-least-once delivery of queued operations
//! - Best-effort passes: one failing item never blocks the others
//! - Attempt counting and stuck-item detection
//! - Optional recurring auto-sync

pub mod engine;
pub mod events;
pub mod gateway;
pub mod operation;
pub mod queue;

pub use engine::{SyncEngine, SyncReport, SyncStatus};
pub use events::{EventBus, EventKind, ItemFailure, Subscription, SyncEvent, SyncProgress};
pub use gateway::{GatewayRegistry, RemoteGateway, RestGateway};
pub use operation::{Operation, SyncQueueItem};
pub use queue::{QueueStats, SyncQueue};
