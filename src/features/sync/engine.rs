//! Sync engine for replaying queued operations against the remote backend.
//!
//! One pass snapshots the pending queue and dispatches the items strictly in
//! order, one at a time. A failing item is recorded and skipped; the pass
//! carries on with the next one. Synced marks and failed attempts are written
//! together in one transaction after the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::events::{EventBus, EventKind, ItemFailure, Subscription, SyncEvent, SyncProgress};
use super::gateway::GatewayRegistry;
use super::operation::{Operation, SyncQueueItem};
use super::queue::SyncQueue;
use crate::config::SyncConfig;
use crate::error::SyncError;

/// Result of one synchronization pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    /// Items in the pass's snapshot
    pub total: usize,
    /// Ids confirmed by the backend
    pub synced: Vec<i64>,
    /// Items that failed and stay pending
    pub failures: Vec<ItemFailure>,
    /// Pending items after the pass
    pub pending: usize,
}

impl SyncReport {
    /// Whether every item in the snapshot was synced.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of items synced in this pass.
    #[must_use]
    pub fn synced_count(&self) -> usize {
        self.synced.len()
    }
}

/// Snapshot of the engine's state for presentation layers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Whether a pass is running right now
    pub is_syncing: bool,
    /// When the last pass finished (with or without item errors)
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Item failures from the most recent pass
    pub sync_errors: Vec<ItemFailure>,
    /// Pass-level failure from the most recent pass, if it aborted
    pub last_error: Option<String>,
    /// Items waiting to be synced
    pub pending_changes: usize,
    /// Progress of the current (or last) pass
    pub progress: Option<SyncProgress>,
}

#[derive(Default)]
struct PassState {
    last_sync_time: Option<DateTime<Utc>>,
    sync_errors: Vec<ItemFailure>,
    last_error: Option<String>,
    progress: Option<SyncProgress>,
}

struct EngineInner {
    queue: SyncQueue,
    gateways: GatewayRegistry,
    bus: EventBus,
    config: SyncConfig,
    running: AtomicBool,
    state: Mutex<PassState>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

/// Drives synchronization passes and the optional auto-sync timer.
///
/// Cheap to clone; clones share state, the event bus and the timer.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("gateways", &self.inner.gateways)
            .field("is_syncing", &self.is_syncing())
            .finish_non_exhaustive()
    }
}

/// A pass that stopped before its results were stored. Nothing from the pass
/// was committed; `failures` are the item errors seen before the abort.
struct PassAborted {
    error: SyncError,
    failures: Vec<ItemFailure>,
}

impl From<SyncError> for PassAborted {
    fn from(error: SyncError) -> Self {
        Self {
            error,
            failures: Vec::new(),
        }
    }
}

/// Clears the running flag when a pass ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncEngine {
    /// Create an engine. Nothing runs until [`start`](Self::start),
    /// [`synchronize`](Self::synchronize) or
    /// [`enable_auto_sync`](Self::enable_auto_sync) is called.
    #[must_use]
    pub fn new(queue: SyncQueue, gateways: GatewayRegistry, config: SyncConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                queue,
                gateways,
                bus: EventBus::new(),
                config,
                running: AtomicBool::new(false),
                state: Mutex::new(PassState::default()),
                timer: Mutex::new(None),
            }),
        }
    }

    /// Apply the startup configuration: enables auto-sync if configured.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        if self.inner.config.auto_sync {
            self.enable_auto_sync(self.inner.config.interval());
        }
    }

    /// The engine's event bus.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Subscribe to engine events. See [`EventBus::on`].
    pub fn on<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.inner.bus.on(kind, listener)
    }

    /// Whether a pass is running.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Run one synchronization pass.
    ///
    /// Item failures do not make this return `Err`; check
    /// [`SyncReport::is_success`].
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::SyncInProgress`] without side effects if a pass
    /// is already running, or the underlying error if the pass aborted
    /// (e.g. the queue could not be read).
    pub async fn synchronize(&self) -> Result<SyncReport, SyncError> {
        let Some(guard) = RunningGuard::acquire(&self.inner.running) else {
            debug!("Sync requested while a pass is running; ignoring");
            return Err(SyncError::SyncInProgress);
        };

        self.state().progress = None;
        info!("Starting sync pass");
        self.inner.bus.emit(&SyncEvent::SyncStart);

        let result = self.run_pass().await;
        drop(guard);

        match result {
            Ok(report) => {
                {
                    let mut state = self.state();
                    state.last_sync_time = Some(Utc::now());
                    state.sync_errors.clone_from(&report.failures);
                    state.last_error = None;
                }

                if report.is_success() {
                    info!(
                        synced = report.synced_count(),
                        pending = report.pending,
                        "Sync pass complete"
                    );
                    self.inner.bus.emit(&SyncEvent::SyncComplete {
                        synced_count: report.synced_count(),
                        pending: report.pending,
                    });
                } else {
                    warn!(
                        synced = report.synced_count(),
                        failed = report.failures.len(),
                        pending = report.pending,
                        "Sync pass finished with errors"
                    );
                    self.inner.bus.emit(&SyncEvent::SyncError {
                        errors: report.failures.clone(),
                        synced_count: report.synced_count(),
                        fatal: None,
                    });
                }
                Ok(report)
            }
            Err(PassAborted { error, failures }) => {
                error!(error = %error, failed = failures.len(), "Sync pass aborted");
                let message = error.to_string();
                {
                    let mut state = self.state();
                    state.sync_errors.clone_from(&failures);
                    state.last_error = Some(message.clone());
                }
                // Nothing was committed, so no item counts as synced
                self.inner.bus.emit(&SyncEvent::SyncError {
                    errors: failures,
                    synced_count: 0,
                    fatal: Some(message),
                });
                Err(error)
            }
        }
    }

    async fn run_pass(&self) -> Result<SyncReport, PassAborted> {
        let snapshot = self.inner.queue.pending().await?;
        let total = snapshot.len();

        if total == 0 {
            debug!("Sync queue empty");
            return Ok(SyncReport {
                pending: self.inner.queue.pending_count().await?,
                ..SyncReport::default()
            });
        }

        let mut synced = Vec::new();
        let mut failures = Vec::new();

        for (index, item) in snapshot.iter().enumerate() {
            match self.dispatch(item).await {
                Ok(()) => {
                    debug!(id = item.id, target = %item.target(), op = %item.operation, "Synced item");
                    synced.push(item.id);
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!(id = item.id, target = %item.target(), error = %e, "Sync item failed");
                    } else {
                        error!(
                            id = item.id,
                            target = %item.target(),
                            error = %e,
                            "Sync item is corrupt and will fail on every pass; clear it manually"
                        );
                    }
                    failures.push(ItemFailure {
                        item_id: item.id,
                        table_name: item.table_name.clone(),
                        record_id: item.record_id.clone(),
                        operation: item.operation.as_str().to_string(),
                        message: failure_message(&e),
                    });
                }
            }

            let progress = SyncProgress::new(index + 1, total);
            self.state().progress = Some(progress);
            self.inner.bus.emit(&SyncEvent::SyncProgress(progress));
        }

        let attempts: Vec<(i64, String)> = failures
            .iter()
            .map(|f| (f.item_id, f.message.clone()))
            .collect();
        if let Err(error) = self.inner.queue.complete_pass(&synced, &attempts).await {
            return Err(PassAborted { error, failures });
        }

        let pending = self.inner.queue.pending_count().await?;

        Ok(SyncReport {
            total,
            synced,
            failures,
            pending,
        })
    }

    async fn dispatch(&self, item: &SyncQueueItem) -> Result<(), SyncError> {
        let gateways = &self.inner.gateways;
        match &item.operation {
            Operation::Insert => {
                gateways
                    .get(&item.table_name)?
                    .create(payload(item)?)
                    .await
            }
            Operation::Update => {
                gateways
                    .get(&item.table_name)?
                    .upsert(record_id(item)?, payload(item)?)
                    .await
            }
            Operation::Delete => {
                gateways
                    .get(&item.table_name)?
                    .remove(record_id(item)?)
                    .await
            }
            Operation::Unknown(raw) => Err(SyncError::UnknownOperation(raw.clone())),
        }
    }

    /// Start the recurring auto-sync timer, replacing any existing one.
    ///
    /// Every `interval` the timer checks the pending count and, if non-zero,
    /// starts a pass on its own task. Cancelling the timer therefore never
    /// interrupts a pass. Must be called from within a tokio runtime.
    pub fn enable_auto_sync(&self, interval: Duration) {
        let weak = Arc::downgrade(&self.inner);

        let mut timer = lock(&self.inner.timer);
        if let Some(previous) = timer.take() {
            previous.abort();
        }

        info!(interval_ms = interval.as_millis(), "Auto-sync enabled");
        *timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                SyncEngine { inner }.auto_sync_tick().await;
            }
        }));
    }

    /// Stop the auto-sync timer. A running pass is not interrupted.
    pub fn disable_auto_sync(&self) {
        if let Some(handle) = lock(&self.inner.timer).take() {
            handle.abort();
            info!("Auto-sync disabled");
        }
    }

    /// Whether the auto-sync timer is active.
    #[must_use]
    pub fn auto_sync_enabled(&self) -> bool {
        lock(&self.inner.timer)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    async fn auto_sync_tick(&self) {
        match self.inner.queue.pending_count().await {
            Ok(0) => debug!("Auto-sync: nothing pending"),
            Ok(pending) => {
                if self.is_syncing() {
                    debug!(pending, "Auto-sync: pass already running");
                    return;
                }
                let engine = self.clone();
                tokio::spawn(async move {
                    match engine.synchronize().await {
                        Ok(_) | Err(SyncError::SyncInProgress) => {}
                        Err(e) => debug!(error = %e, "Auto-sync pass aborted"),
                    }
                });
            }
            Err(e) => warn!(error = %e, "Auto-sync: failed to count pending items"),
        }
    }

    /// Cancel the timer and drop every event subscription.
    ///
    /// Safe to call at any time; a running pass finishes normally.
    pub fn dispose(&self) {
        self.disable_auto_sync();
        self.inner.bus.clear();
    }

    /// Current status, including a fresh pending count.
    ///
    /// # Errors
    ///
    /// Returns an error if the pending count cannot be read.
    pub async fn status(&self) -> Result<SyncStatus, SyncError> {
        let pending_changes = self.inner.queue.pending_count().await?;
        let state = self.state();

        Ok(SyncStatus {
            is_syncing: self.is_syncing(),
            last_sync_time: state.last_sync_time,
            sync_errors: state.sync_errors.clone(),
            last_error: state.last_error.clone(),
            pending_changes,
            progress: state.progress,
        })
    }

    /// Pending items at or above the configured stuck threshold.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    pub async fn stuck_items(&self) -> Result<Vec<SyncQueueItem>, SyncError> {
        self.inner
            .queue
            .failed_items(self.inner.config.stuck_threshold)
            .await
    }

    fn state(&self) -> MutexGuard<'_, PassState> {
        lock(&self.inner.state)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Gateway messages are reported as the backend gave them.
fn failure_message(e: &SyncError) -> String {
    match e {
        SyncError::Gateway(message) => message.clone(),
        other => other.to_string(),
    }
}

fn payload(item: &SyncQueueItem) -> Result<&serde_json::Value, SyncError> {
    item.record_data.as_ref().ok_or_else(|| {
        SyncError::InvalidItem(format!("{} item {} has no record data", item.operation, item.id))
    })
}

fn record_id(item: &SyncQueueItem) -> Result<&str, SyncError> {
    item.record_id.as_deref().ok_or_else(|| {
        SyncError::InvalidItem(format!("{} item {} has no record id", item.operation, item.id))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::store::{fields, LocalStore};
    use crate::features::sync::gateway::RemoteGateway;
    use crate::storage::Database;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Records every call in order and fails for selected record ids.
    #[derive(Default)]
    struct FakeGateway {
        calls: Mutex<Vec<String>>,
        fail_ids: HashSet<String>,
    }

    impl FakeGateway {
        fn failing(ids: &[&str]) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_ids: ids.iter().map(|s| (*s).to_string()).collect(),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String, id: &str) -> Result<(), SyncError> {
            self.calls.lock().unwrap().push(call);
            if self.fail_ids.contains(id) {
                Err(SyncError::Gateway(format!("backend rejected {id}")))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl RemoteGateway for FakeGateway {
        async fn create(&self, record: &Value) -> Result<(), SyncError> {
            let id = record["id"].as_str().unwrap_or_default().to_string();
            self.record(format!("create {id}"), &id)
        }

        async fn upsert(&self, id: &str, _record: &Value) -> Result<(), SyncError> {
            self.record(format!("upsert {id}"), id)
        }

        async fn remove(&self, id: &str) -> Result<(), SyncError> {
            self.record(format!("remove {id}"), id)
        }
    }

    /// Blocks inside `create` until released.
    struct BlockingGateway {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl RemoteGateway for BlockingGateway {
        async fn create(&self, _record: &Value) -> Result<(), SyncError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }

        async fn upsert(&self, _id: &str, _record: &Value) -> Result<(), SyncError> {
            Ok(())
        }

        async fn remove(&self, _id: &str) -> Result<(), SyncError> {
            Ok(())
        }
    }

    fn setup(gateway: Arc<dyn RemoteGateway>) -> (LocalStore, SyncEngine) {
        let store = LocalStore::new(Database::open_in_memory().unwrap());
        let gateways = GatewayRegistry::new().with("parcels", gateway).unwrap();
        let engine = SyncEngine::new(store.queue(), gateways, SyncConfig::default());
        (store, engine)
    }

    fn count_events(engine: &SyncEngine, kind: EventKind) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let _sub = engine.on(kind, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[tokio::test]
    async fn test_empty_queue_completes_with_zero() {
        let (_store, engine) = setup(Arc::new(FakeGateway::default()));
        let completed: Arc<Mutex<Vec<SyncEvent>>> = Arc::default();
        let sink = Arc::clone(&completed);
        let _sub = engine.on(EventKind::SyncComplete, move |e| {
            sink.lock().unwrap().push(e.clone());
        });

        let report = engine.synchronize().await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.total, 0);
        assert_eq!(
            completed.lock().unwrap().as_slice(),
            &[SyncEvent::SyncComplete {
                synced_count: 0,
                pending: 0
            }]
        );
        assert!(!engine.is_syncing());
    }

    #[tokio::test]
    async fn test_pass_replays_in_order_with_mapped_operations() {
        let gateway = Arc::new(FakeGateway::default());
        let (store, engine) = setup(gateway.clone());

        store
            .put("parcels", fields(json!({"acres": 1})), Some("a"))
            .await
            .unwrap();
        store
            .update("parcels", "a", fields(json!({"acres": 2})))
            .await
            .unwrap();
        store
            .put("parcels", fields(json!({"acres": 5})), Some("b"))
            .await
            .unwrap();
        store.delete("parcels", "a").await.unwrap();

        let report = engine.synchronize().await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.synced_count(), 4);
        assert_eq!(report.pending, 0);
        assert_eq!(
            gateway.calls(),
            vec!["create a", "upsert a", "create b", "remove a"]
        );
    }

    #[tokio::test]
    async fn test_middle_failure_does_not_abort_pass() {
        let gateway = Arc::new(FakeGateway::failing(&["b"]));
        let (store, engine) = setup(gateway.clone());
        let queue = store.queue();
        let errors = count_events(&engine, EventKind::SyncError);
        let progress = count_events(&engine, EventKind::SyncProgress);

        for id in ["a", "b", "c"] {
            store
                .put("parcels", fields(json!({"n": id})), Some(id))
                .await
                .unwrap();
        }
        let before = queue.pending().await.unwrap();

        let report = engine.synchronize().await.unwrap();

        assert!(!report.is_success());
        assert_eq!(report.synced_count(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].item_id, before[1].id);
        // Gateway messages pass through without the error-kind prefix
        assert_eq!(report.failures[0].message, "backend rejected b");
        assert_eq!(gateway.calls(), vec!["create a", "create b", "create c"]);

        let pending = queue.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].record_id.as_deref(), Some("b"));
        assert_eq!(pending[0].attempts, before[1].attempts + 1);

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(progress.load(Ordering::SeqCst), 3);

        let status = engine.status().await.unwrap();
        assert_eq!(status.pending_changes, 1);
        assert_eq!(status.sync_errors.len(), 1);
        assert!(status.last_sync_time.is_some());
        assert_eq!(status.progress.map(|p| p.current), Some(3));
    }

    #[tokio::test]
    async fn test_failed_item_retried_next_pass() {
        let gateway = Arc::new(FakeGateway::failing(&["b"]));
        let (store, engine) = setup(gateway.clone());

        store.put("parcels", fields(json!({})), Some("b")).await.unwrap();
        engine.synchronize().await.unwrap();
        engine.synchronize().await.unwrap();
        engine.synchronize().await.unwrap();

        assert_eq!(gateway.calls().len(), 3);
        let stuck = engine.stuck_items().await.unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_progress_payloads() {
        let (store, engine) = setup(Arc::new(FakeGateway::default()));
        let seen: Arc<Mutex<Vec<SyncProgress>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let _sub = engine.on(EventKind::SyncProgress, move |e| {
            if let SyncEvent::SyncProgress(p) = e {
                sink.lock().unwrap().push(*p);
            }
        });

        for id in ["a", "b", "c", "d"] {
            store.put("parcels", fields(json!({})), Some(id)).await.unwrap();
        }
        engine.synchronize().await.unwrap();

        let seen = seen.lock().unwrap();
        let currents: Vec<usize> = seen.iter().map(|p| p.current).collect();
        assert_eq!(currents, vec![1, 2, 3, 4]);
        assert!(seen.iter().all(|p| p.total == 4));
        assert!((seen[1].percent - 50.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_unknown_operation_and_missing_gateway_are_item_failures() {
        let (store, engine) = setup(Arc::new(FakeGateway::default()));
        let queue = store.queue();

        queue
            .append("parcels", &Operation::Unknown("merge".to_string()), None, Some("x"))
            .await
            .unwrap();
        store.put("levies", fields(json!({})), Some("l-1")).await.unwrap();
        store.put("parcels", fields(json!({})), Some("p-1")).await.unwrap();

        let report = engine.synchronize().await.unwrap();

        assert_eq!(report.synced_count(), 1);
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures[0].message.contains("Unknown operation 'merge'"));
        assert_eq!(report.failures[0].operation, "merge");
        assert!(report.failures[1].message.contains("levies"));
    }

    #[tokio::test]
    async fn test_synchronize_while_running_is_rejected() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let gateway = Arc::new(BlockingGateway {
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
        });
        let (store, engine) = setup(gateway);
        let starts = count_events(&engine, EventKind::SyncStart);

        store.put("parcels", fields(json!({})), Some("a")).await.unwrap();

        let background = engine.clone();
        let first = tokio::spawn(async move { background.synchronize().await });
        entered.notified().await;

        assert!(engine.is_syncing());
        let second = engine.synchronize().await;
        assert!(matches!(second, Err(SyncError::SyncInProgress)));
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(store.queue().pending_count().await.unwrap(), 1);

        release.notify_one();
        let report = first.await.unwrap().unwrap();
        assert_eq!(report.synced_count(), 1);
        assert!(!engine.is_syncing());
    }

    #[tokio::test]
    async fn test_items_appended_mid_pass_wait_for_next_pass() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let gateway = Arc::new(BlockingGateway {
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
        });
        let (store, engine) = setup(gateway);

        store.put("parcels", fields(json!({})), Some("a")).await.unwrap();

        let background = engine.clone();
        let first = tokio::spawn(async move { background.synchronize().await });
        entered.notified().await;

        store.update("parcels", "a", fields(json!({"late": true}))).await.unwrap();
        release.notify_one();

        let report = first.await.unwrap().unwrap();
        assert_eq!(report.total, 1);
        assert_eq!(report.pending, 1);
    }

    #[tokio::test]
    async fn test_aborted_pass_returns_to_idle() {
        let (store, engine) = setup(Arc::new(FakeGateway::default()));
        let errors: Arc<Mutex<Vec<SyncEvent>>> = Arc::default();
        let sink = Arc::clone(&errors);
        let _sub = engine.on(EventKind::SyncError, move |e| {
            sink.lock().unwrap().push(e.clone());
        });

        store
            .database()
            .lock()
            .await
            .execute_batch("DROP TABLE sync_queue;")
            .unwrap();

        let result = engine.synchronize().await;

        assert!(matches!(result, Err(SyncError::Database(_))));
        assert!(!engine.is_syncing());
        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            SyncEvent::SyncError { fatal: Some(_), .. }
        ));
    }

    #[tokio::test]
    async fn test_failed_result_write_keeps_item_errors_and_commits_nothing() {
        let gateway = Arc::new(FakeGateway::failing(&["b"]));
        let (store, engine) = setup(gateway.clone());
        let errors: Arc<Mutex<Vec<SyncEvent>>> = Arc::default();
        let sink = Arc::clone(&errors);
        let _sub = engine.on(EventKind::SyncError, move |e| {
            sink.lock().unwrap().push(e.clone());
        });

        store.put("parcels", fields(json!({})), Some("a")).await.unwrap();
        store.put("parcels", fields(json!({})), Some("b")).await.unwrap();
        store
            .database()
            .lock()
            .await
            .execute_batch(
                r"CREATE TRIGGER reject_attempts BEFORE UPDATE OF attempts ON sync_queue
                  BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .unwrap();

        let result = engine.synchronize().await;

        assert!(matches!(result, Err(SyncError::Database(_))));
        assert_eq!(gateway.calls(), vec!["create a", "create b"]);

        // Neither the synced mark for a nor the attempt for b was stored
        let pending = store.queue().pending().await.unwrap();
        let ids: Vec<Option<&str>> = pending.iter().map(|i| i.record_id.as_deref()).collect();
        assert_eq!(ids, vec![Some("a"), Some("b")]);
        assert!(pending.iter().all(|i| i.attempts == 0));

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            SyncEvent::SyncError {
                errors,
                synced_count,
                fatal,
            } => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].record_id.as_deref(), Some("b"));
                assert_eq!(*synced_count, 0);
                assert!(fatal.as_deref().is_some_and(|m| m.contains("disk full")));
            }
            other => panic!("unexpected event {other:?}"),
        }

        let status = engine.status().await.unwrap();
        assert_eq!(status.sync_errors.len(), 1);
        assert_eq!(status.sync_errors[0].message, "backend rejected b");
        assert!(status.last_error.is_some());
        assert_eq!(status.pending_changes, 2);
    }

    #[tokio::test]
    async fn test_panicking_listener_does_not_break_pass() {
        let (store, engine) = setup(Arc::new(FakeGateway::default()));
        let _bad = engine.on(EventKind::SyncProgress, |_| panic!("ui bug"));
        let completes = count_events(&engine, EventKind::SyncComplete);

        store.put("parcels", fields(json!({})), Some("a")).await.unwrap();
        let report = engine.synchronize().await.unwrap();

        assert!(report.is_success());
        assert_eq!(completes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_sync_drains_queue_once() {
        let (store, engine) = setup(Arc::new(FakeGateway::default()));
        let completed: Arc<Mutex<Vec<SyncEvent>>> = Arc::default();
        let sink = Arc::clone(&completed);
        let _sub = engine.on(EventKind::SyncComplete, move |e| {
            sink.lock().unwrap().push(e.clone());
        });

        for id in ["a", "b", "c"] {
            store.put("parcels", fields(json!({})), Some(id)).await.unwrap();
        }

        let interval = Duration::from_millis(500);
        engine.enable_auto_sync(interval);
        assert!(engine.auto_sync_enabled());

        // Past the first tick, before the second
        tokio::time::sleep(interval + Duration::from_millis(100)).await;

        let status = engine.status().await.unwrap();
        assert_eq!(status.pending_changes, 0);
        assert_eq!(
            completed.lock().unwrap().as_slice(),
            &[SyncEvent::SyncComplete {
                synced_count: 3,
                pending: 0
            }]
        );

        // Later ticks see an empty queue and start nothing
        tokio::time::sleep(interval * 3).await;
        assert_eq!(completed.lock().unwrap().len(), 1);

        engine.dispose();
        assert!(!engine.auto_sync_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reenabling_auto_sync_keeps_single_timer() {
        let gateway = Arc::new(FakeGateway::failing(&["a"]));
        let (store, engine) = setup(gateway.clone());
        let starts = count_events(&engine, EventKind::SyncStart);

        store.put("parcels", fields(json!({})), Some("a")).await.unwrap();

        let interval = Duration::from_millis(200);
        engine.enable_auto_sync(interval);
        engine.enable_auto_sync(interval);
        engine.enable_auto_sync(interval);

        tokio::time::sleep(interval + Duration::from_millis(50)).await;

        // One timer, one tick, one pass
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.calls().len(), 1);

        engine.disable_auto_sync();
        tokio::time::sleep(interval * 5).await;
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_does_not_interrupt_timer_pass() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let gateway = Arc::new(BlockingGateway {
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
        });
        let (store, engine) = setup(gateway);
        let starts = count_events(&engine, EventKind::SyncStart);

        store.put("parcels", fields(json!({})), Some("a")).await.unwrap();

        let interval = Duration::from_millis(300);
        engine.enable_auto_sync(interval);
        entered.notified().await;
        assert!(engine.is_syncing());

        engine.dispose();
        assert!(!engine.auto_sync_enabled());
        assert!(engine.is_syncing());

        release.notify_one();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!engine.is_syncing());
        assert_eq!(store.queue().pending_count().await.unwrap(), 0);

        // No timer left to start another pass
        tokio::time::sleep(interval * 4).await;
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_auto_sync_does_not_interrupt_timer_pass() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let gateway = Arc::new(BlockingGateway {
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
        });
        let (store, engine) = setup(gateway);
        let completes = count_events(&engine, EventKind::SyncComplete);

        store.put("parcels", fields(json!({})), Some("a")).await.unwrap();

        engine.enable_auto_sync(Duration::from_millis(300));
        entered.notified().await;
        engine.disable_auto_sync();

        release.notify_one();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(completes.load(Ordering::SeqCst), 1);
        assert_eq!(store.queue().pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_start_respects_config() {
        let store = LocalStore::new(Database::open_in_memory().unwrap());
        let config = SyncConfig {
            auto_sync: true,
            ..SyncConfig::default()
        };
        let engine = SyncEngine::new(store.queue(), GatewayRegistry::new(), config);

        engine.start();
        assert!(engine.auto_sync_enabled());
        engine.dispose();

        let idle = SyncEngine::new(store.queue(), GatewayRegistry::new(), SyncConfig::default());
        idle.start();
        assert!(!idle.auto_sync_enabled());
    }

    #[tokio::test]
    async fn test_dispose_clears_subscriptions() {
        let (_store, engine) = setup(Arc::new(FakeGateway::default()));
        let starts = count_events(&engine, EventKind::SyncStart);

        engine.dispose();
        engine.synchronize().await.unwrap();

        assert_eq!(starts.load(Ordering::SeqCst), 0);
        assert_eq!(engine.events().listener_count(), 0);
    }
}
