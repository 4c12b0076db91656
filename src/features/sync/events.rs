//! Event bus for synchronization lifecycle notifications.
//!
//! Listeners subscribe to one [`EventKind`] and receive every [`SyncEvent`]
//! of that kind, synchronously and in registration order. A listener that
//! panics is isolated: the panic is logged and delivery continues with the
//! next listener. The engine never sees it.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;

/// Per-item failure collected during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemFailure {
    /// Queue item id.
    pub item_id: i64,
    /// Table of the failed item.
    pub table_name: String,
    /// Record id of the failed item, if any.
    pub record_id: Option<String>,
    /// Operation name as stored.
    pub operation: String,
    /// Error message, passed through from the gateway.
    pub message: String,
}

/// Progress through the current pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SyncProgress {
    /// Items processed so far.
    pub current: usize,
    /// Items in this pass's snapshot.
    pub total: usize,
    /// `current / total` as a percentage, 0-100.
    pub percent: f64,
}

impl SyncProgress {
    /// Build a progress value; an empty pass counts as complete.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(current: usize, total: usize) -> Self {
        let percent = if total == 0 {
            100.0
        } else {
            (current as f64 / total as f64) * 100.0
        };
        Self {
            current,
            total,
            percent,
        }
    }
}

/// Event kinds listeners can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// A pass started.
    SyncStart,
    /// One item of the pass was processed.
    SyncProgress,
    /// A pass finished without item errors.
    SyncComplete,
    /// A pass finished with item errors, or aborted.
    SyncError,
}

/// Lifecycle events emitted by the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncEvent {
    /// A pass started.
    SyncStart,
    /// One item of the pass was processed.
    SyncProgress(SyncProgress),
    /// A pass finished without item errors.
    SyncComplete {
        /// Items confirmed by the backend in this pass.
        synced_count: usize,
        /// Items still pending afterwards.
        pending: usize,
    },
    /// A pass finished with item errors, or aborted before finishing.
    SyncError {
        /// Per-item failures of this pass. Empty when the pass aborted.
        errors: Vec<ItemFailure>,
        /// Items confirmed by the backend in this pass.
        synced_count: usize,
        /// Pass-level failure that aborted the pass, if any.
        fatal: Option<String>,
    },
}

impl SyncEvent {
    /// The kind listeners subscribe to for this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::SyncStart => EventKind::SyncStart,
            Self::SyncProgress(_) => EventKind::SyncProgress,
            Self::SyncComplete { .. } => EventKind::SyncComplete,
            Self::SyncError { .. } => EventKind::SyncError,
        }
    }
}

type Listener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: HashMap<EventKind, Vec<(u64, Listener)>>,
}

/// Synchronous publish/subscribe channel for [`SyncEvent`]s.
///
/// Cloning yields another handle to the same set of listeners.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<Registry>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl EventBus {
    /// Create a bus with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `listener` to events of `kind`.
    ///
    /// Keep the returned [`Subscription`] to unsubscribe later. Dropping it
    /// does not unsubscribe.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let mut registry = self.registry();
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .listeners
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));

        Subscription {
            id,
            kind,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `event` to every listener of its kind.
    ///
    /// Listeners run outside the registry lock, so they may subscribe or
    /// unsubscribe while being called.
    pub fn emit(&self, event: &SyncEvent) {
        let listeners: Vec<(u64, Listener)> = self
            .registry()
            .listeners
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();

        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::error!(
                    listener = id,
                    kind = ?event.kind(),
                    "Sync event listener panicked; continuing with remaining listeners"
                );
            }
        }
    }

    /// Remove every listener.
    pub fn clear(&self) {
        self.registry().listeners.clear();
    }

    /// Number of registered listeners across all kinds.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.registry().listeners.values().map(Vec::len).sum()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        lock(&self.inner)
    }
}

/// Token returned by [`EventBus::on`].
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    kind: EventKind,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Stop delivering events to this listener. A no-op if the bus is gone
    /// or was cleared.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            if let Some(listeners) = lock(&registry).listeners.get_mut(&self.kind) {
                listeners.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

// A panicking listener never runs under the lock, but recover from poisoning anyway.
fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}
