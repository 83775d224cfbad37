//! Sync engine
//!
//! Orchestrates push (drain the offline queue) and pull (fetch per-kind
//! deltas), classifies divergences, applies the session's conflict
//! strategy, and maintains per-record sync metadata. One cycle runs at a
//! time; triggers arriving mid-cycle coalesce into a single follow-up run
//! via the watch channels they arrive on.

pub mod remote;
pub mod resolver;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::{watch, Notify};

use crate::config::SyncSettings;
use crate::db::LocalStore;
use crate::error::{Error, Result};
use crate::events::DataEvent;
use crate::models::{RecordKind, SyncStatus};
use crate::network::NetworkMonitor;
use crate::queue::{QueueEntry, QueueOperation};
use crate::schema::ColumnMap;

pub use remote::{AckOutcome, HttpRemoteApi, PullDelta, PushAck, PushOperation, RemoteApi};
pub use resolver::{Conflict, ConflictStrategy, ManualResolution, MergeFn, Resolution};

/// Engine state, observable through a watch channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    #[default]
    Idle,
    Pushing,
    Pulling,
    Reconciling,
    Paused,
    /// Last cycle hit an unrecoverable failure; next trigger re-enters idle
    Error,
}

/// Per-kind counters for one sync cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindCounts {
    pub pulled_created: usize,
    pub pulled_updated: usize,
    pub pulled_deleted: usize,
    pub pushed_created: usize,
    pub pushed_updated: usize,
    pub pushed_deleted: usize,
    /// Divergences left unresolved (manual strategy)
    pub conflicts: usize,
}

/// The unit returned to callers for one full sync cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub started_at: i64,
    pub finished_at: i64,
    pub kinds: BTreeMap<RecordKind, KindCounts>,
    /// Transient per-kind failures that did not abort the cycle
    pub errors: Vec<String>,
}

impl SyncReport {
    fn begin() -> Self {
        Self {
            started_at: chrono::Utc::now().timestamp_millis(),
            ..Self::default()
        }
    }

    fn entry(&mut self, kind: RecordKind) -> &mut KindCounts {
        self.kinds.entry(kind).or_default()
    }

    /// Counters for one kind (zeroes if the kind saw no traffic)
    #[must_use]
    pub fn counts(&self, kind: RecordKind) -> KindCounts {
        self.kinds.get(&kind).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn total_pushed(&self) -> usize {
        self.kinds
            .values()
            .map(|c| c.pushed_created + c.pushed_updated + c.pushed_deleted)
            .sum()
    }

    #[must_use]
    pub fn total_pulled(&self) -> usize {
        self.kinds
            .values()
            .map(|c| c.pulled_created + c.pulled_updated + c.pulled_deleted)
            .sum()
    }

    #[must_use]
    pub fn unresolved_conflicts(&self) -> usize {
        self.kinds.values().map(|c| c.conflicts).sum()
    }
}

/// Push/pull reconciliation engine over a [`LocalStore`] and a remote API
pub struct SyncEngine {
    store: LocalStore,
    remote: Arc<dyn RemoteApi>,
    monitor: NetworkMonitor,
    settings: SyncSettings,
    strategy: Mutex<ConflictStrategy>,
    phase_tx: watch::Sender<SyncPhase>,
    paused: AtomicBool,
    cycle_lock: tokio::sync::Mutex<()>,
    resume_notify: Notify,
}

impl SyncEngine {
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteApi>,
        monitor: NetworkMonitor,
        settings: SyncSettings,
    ) -> Self {
        let (phase_tx, _) = watch::channel(SyncPhase::Idle);
        Self {
            store,
            remote,
            monitor,
            settings,
            strategy: Mutex::new(ConflictStrategy::default()),
            phase_tx,
            paused: AtomicBool::new(false),
            cycle_lock: tokio::sync::Mutex::new(()),
            resume_notify: Notify::new(),
        }
    }

    /// Current engine phase
    pub fn phase(&self) -> SyncPhase {
        *self.phase_tx.borrow()
    }

    /// Watch channel for phase transitions
    pub fn phase_watch(&self) -> watch::Receiver<SyncPhase> {
        self.phase_tx.subscribe()
    }

    /// Select the conflict strategy for subsequent sync sessions
    pub fn set_strategy(&self, strategy: ConflictStrategy) {
        *self
            .strategy
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = strategy;
    }

    fn current_strategy(&self) -> ConflictStrategy {
        self.strategy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop starting new batches; an in-flight batch finishes
    pub fn pause_processing(&self) {
        self.paused.store(true, Ordering::SeqCst);
        if self.phase() == SyncPhase::Idle {
            self.set_phase(SyncPhase::Paused);
        }
    }

    /// Re-enter from idle and wake the background loop
    pub fn resume_processing(&self) {
        self.paused.store(false, Ordering::SeqCst);
        if self.phase() == SyncPhase::Paused {
            self.set_phase(SyncPhase::Idle);
        }
        self.resume_notify.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.phase_tx.send_replace(phase);
    }

    /// Run one full push/pull/reconcile cycle now.
    ///
    /// Serializes with any cycle already running; fails fast when offline
    /// or paused.
    pub async fn sync_now(&self) -> Result<SyncReport> {
        let _cycle = self.cycle_lock.lock().await;
        if self.is_paused() {
            return Err(Error::InvalidInput("sync is paused".to_string()));
        }
        if !self.monitor.is_online() {
            return Err(Error::NetworkUnavailable);
        }

        self.store.events().emit(&DataEvent::SyncStarted);
        tracing::debug!("sync cycle started");

        let result = self.cycle_inner().await;
        match &result {
            Ok(report) => {
                tracing::info!(
                    "sync cycle finished: {} pushed, {} pulled, {} conflict(s)",
                    report.total_pushed(),
                    report.total_pulled(),
                    report.unresolved_conflicts()
                );
                self.store
                    .events()
                    .emit(&DataEvent::SyncCompleted(report.clone()));
                self.set_phase(if self.is_paused() {
                    SyncPhase::Paused
                } else {
                    SyncPhase::Idle
                });
            }
            Err(error) => {
                tracing::warn!("sync cycle failed: {error}");
                self.store
                    .events()
                    .emit(&DataEvent::SyncError(error.to_string()));
                self.set_phase(SyncPhase::Error);
            }
        }
        result
    }

    /// Background trigger loop: connectivity regained, queue activity while
    /// online, the periodic timer, and resume notifications. Runs until the
    /// returned handle is aborted.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.trigger_loop().await })
    }

    async fn trigger_loop(&self) {
        let mut network = self.monitor.subscribe();
        let mut queue = self.store.queue_activity();
        // A fresh loop treats current state as already-seen
        network.mark_unchanged();
        queue.mark_unchanged();

        loop {
            let interval = self
                .settings
                .sync_interval
                .unwrap_or(std::time::Duration::from_secs(3600));

            let network_closed = tokio::select! {
                changed = network.changed() => changed.is_err(),
                changed = queue.changed() => changed.is_err(),
                () = tokio::time::sleep(interval) => false,
                () = self.resume_notify.notified() => false,
            };
            if network_closed {
                return;
            }
            if self.is_paused() || !self.monitor.is_online() {
                continue;
            }

            if let Err(error) = self.sync_now().await {
                if matches!(error, Error::InvalidInput(_)) {
                    continue;
                }
                // Back off before honoring the next trigger
                tokio::time::sleep(self.settings.error_backoff).await;
                self.set_phase(SyncPhase::Idle);
            }
        }
    }

    /// Bound a remote call with the configured per-request timeout; there
    /// is no preemptive cancellation of an in-flight request beyond this
    async fn bounded<T>(&self, request: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.settings.request_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(Error::RequestTimeout),
        }
    }

    async fn cycle_inner(&self) -> Result<SyncReport> {
        let mut report = SyncReport::begin();

        self.set_phase(SyncPhase::Pushing);
        self.push_phase(&mut report).await?;

        self.set_phase(SyncPhase::Pulling);
        let deltas = self.pull_phase(&mut report).await?;

        self.set_phase(SyncPhase::Reconciling);
        self.reconcile_phase(deltas, &mut report)?;

        report.finished_at = chrono::Utc::now().timestamp_millis();
        Ok(report)
    }

    /// Drain the queue in priority order, batch by batch. A transient batch
    /// failure backs off its entries and moves on; the backoff keeps them
    /// out of the following batches of this cycle.
    async fn push_phase(&self, report: &mut SyncReport) -> Result<()> {
        let mut attempted: HashSet<String> = HashSet::new();
        loop {
            if self.is_paused() {
                break;
            }
            let batch = self.store.next_push_batch(self.settings.batch_size)?;
            if batch.is_empty() {
                break;
            }
            // Seeing an already-attempted entry means the drain has wrapped;
            // leave the rest for the next cycle
            if batch.iter().any(|entry| attempted.contains(&entry.id)) {
                for entry in &batch {
                    self.store.requeue_entry(entry)?;
                }
                break;
            }
            attempted.extend(batch.iter().map(|entry| entry.id.clone()));

            let operations: Vec<PushOperation> =
                batch.iter().map(PushOperation::from_entry).collect();

            match self.bounded(self.remote.push(&operations)).await {
                Ok(acks) => self.apply_acks(&batch, &acks, report)?,
                Err(error) if error.is_transient() => {
                    tracing::debug!("push batch failed transiently: {error}");
                    for entry in &batch {
                        self.store.fail_entry(entry, &error.to_string())?;
                    }
                }
                Err(error) => {
                    // Unrecoverable (auth, schema mismatch): requeue the
                    // batch with backoff and abort the cycle
                    for entry in &batch {
                        self.store.fail_entry(entry, &error.to_string())?;
                    }
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    fn apply_acks(
        &self,
        batch: &[QueueEntry],
        acks: &[PushAck],
        report: &mut SyncReport,
    ) -> Result<()> {
        let by_id: HashMap<&str, &AckOutcome> = acks
            .iter()
            .map(|ack| (ack.operation_id.as_str(), &ack.outcome))
            .collect();

        for entry in batch {
            match by_id.get(entry.id.as_str()) {
                Some(AckOutcome::Applied) => {
                    self.store.ack_entry(entry)?;
                    let counts = report.entry(entry.kind);
                    match entry.operation {
                        QueueOperation::Create => counts.pushed_created += 1,
                        QueueOperation::Update => counts.pushed_updated += 1,
                        QueueOperation::Delete => counts.pushed_deleted += 1,
                    }
                }
                Some(AckOutcome::Rejected { code, message }) => {
                    tracing::warn!(
                        "server rejected {} for {} ({code}): {message}",
                        entry.operation,
                        entry.record_id
                    );
                    self.store.fail_entry(entry, message)?;
                }
                None => {
                    self.store.fail_entry(entry, "missing ack")?;
                }
            }
        }
        Ok(())
    }

    /// Fetch per-kind deltas since the persisted cursors. Transient
    /// failures skip the kind (cursor untouched) and are noted in the
    /// report; anything else aborts the cycle.
    async fn pull_phase(&self, report: &mut SyncReport) -> Result<Vec<(RecordKind, PullDelta)>> {
        let mut deltas = Vec::new();
        for kind in RecordKind::ALL {
            if self.is_paused() {
                break;
            }
            let since = self.store.pull_cursor(kind)?;
            match self.bounded(self.remote.pull(kind, since)).await {
                Ok(delta) => deltas.push((kind, delta)),
                Err(error) if error.is_transient() => {
                    report.errors.push(format!("pull {kind}: {error}"));
                }
                Err(error) => return Err(error),
            }
        }
        Ok(deltas)
    }

    fn reconcile_phase(
        &self,
        deltas: Vec<(RecordKind, PullDelta)>,
        report: &mut SyncReport,
    ) -> Result<()> {
        let strategy = self.current_strategy();

        for (kind, delta) in deltas {
            for (value, created) in delta
                .created
                .iter()
                .map(|v| (v, true))
                .chain(delta.updated.iter().map(|v| (v, false)))
            {
                let Some(map) = value.as_object() else {
                    report.errors.push(format!("pull {kind}: non-object payload"));
                    continue;
                };
                self.reconcile_record(kind, map, created, &strategy, report)?;
            }

            for record_id in &delta.deleted_ids {
                if self.reconcile_delete(kind, record_id)? {
                    report.entry(kind).pulled_deleted += 1;
                }
            }

            self.store.set_pull_cursor(kind, delta.server_timestamp)?;
        }
        Ok(())
    }

    fn reconcile_record(
        &self,
        kind: RecordKind,
        remote_map: &ColumnMap,
        created: bool,
        strategy: &ConflictStrategy,
        report: &mut SyncReport,
    ) -> Result<()> {
        let Some(record_id) = remote_map.get("id").and_then(Value::as_str) else {
            report.errors.push(format!("pull {kind}: payload without id"));
            return Ok(());
        };

        let Some(local) = self.store.record_map(kind, record_id)? else {
            // Local absent: apply remote directly
            self.store.apply_remote(kind, remote_map.clone())?;
            let counts = report.entry(kind);
            if created {
                counts.pulled_created += 1;
            } else {
                counts.pulled_updated += 1;
            }
            return Ok(());
        };

        let local_status = local
            .get("sync_status")
            .and_then(Value::as_str)
            .and_then(|s| serde_json::from_value::<SyncStatus>(Value::String(s.to_string())).ok())
            .unwrap_or_default();
        let remote_updated = remote_map
            .get("updated_at")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let last_synced = local
            .get("last_synced_at")
            .and_then(Value::as_i64)
            .unwrap_or(-1);

        // Duplicate of a state we already reconciled: nothing to do
        if remote_updated <= last_synced {
            return Ok(());
        }

        if local_status == SyncStatus::Synced {
            self.store.apply_remote(kind, remote_map.clone())?;
            report.entry(kind).pulled_updated += 1;
            return Ok(());
        }

        // Local pending (or failed/conflicted) and remote advanced since the
        // last sync point: a genuine divergence
        match resolver::resolve(strategy, &local, remote_map) {
            Resolution::KeepLocal => {
                // The queued local edit stands; it will push next cycle
                tracing::debug!("conflict on {kind}/{record_id}: local wins");
            }
            Resolution::TakeRemote => {
                self.store.discard_pending_intent(kind, record_id)?;
                self.store.apply_remote(kind, remote_map.clone())?;
                report.entry(kind).pulled_updated += 1;
            }
            Resolution::Merged(merged) => {
                self.store.save_merged(kind, merged)?;
            }
            Resolution::Manual => {
                self.store
                    .detect_conflict(kind, record_id, &local, remote_map)?;
                report.entry(kind).conflicts += 1;
            }
        }
        Ok(())
    }

    /// Remote delete vs local state. Returns whether a local row was
    /// removed.
    fn reconcile_delete(&self, kind: RecordKind, record_id: &str) -> Result<bool> {
        let Some(local) = self.store.record_map(kind, record_id)? else {
            return Ok(false);
        };
        let pending_edit = local
            .get("sync_status")
            .and_then(Value::as_str)
            .is_some_and(|s| s != "synced");
        if pending_edit {
            // The local edit wins trivially; its push re-establishes the
            // record server-side
            tracing::debug!("remote delete of {kind}/{record_id} superseded by local edit");
            return Ok(false);
        }
        self.store.apply_remote_delete(kind, record_id)?;
        Ok(true)
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("phase", &self.phase())
            .field("paused", &self.is_paused())
            .finish_non_exhaustive()
    }
}
