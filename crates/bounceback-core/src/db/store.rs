//! The local record store
//!
//! Single-writer transactional store over the embedded database. Every
//! committed local write updates the running size estimate, leaves exactly
//! one durable queue intent, and re-emits affected live queries. Writes
//! applied on behalf of the sync engine bypass the queue and carry synced
//! metadata instead.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value};
use tokio::sync::watch;

use crate::config::{RetryPolicy, StoreConfig};
use crate::crypto::FieldCipher;
use crate::error::{Error, Result};
use crate::events::{DataEvent, EventBus};
use crate::models::{Record, RecordId, RecordKind, SyncStatus};
use crate::quota::{CleanupReport, QuotaGuard, QuotaVerdict};
use crate::queue::{self, QueueEntry, QueueOperation, QueueState};
use crate::schema::{self, ColumnMap, KindSpec};
use crate::sync::resolver::{self, Conflict, ManualResolution};

use super::connection::Database;

/// Columns callers may never patch directly
const PROTECTED_COLUMNS: [&str; 5] = [
    "id",
    "created_at",
    "updated_at",
    "sync_status",
    "last_synced_at",
];

/// Sort direction for query ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

/// A single filter over one column
#[derive(Debug, Clone)]
pub enum Filter {
    Eq(String, Value),
    IsNull(String),
    NotNull(String),
    Gte(String, Value),
    Lte(String, Value),
}

impl Filter {
    fn column(&self) -> &str {
        match self {
            Self::Eq(col, _)
            | Self::IsNull(col)
            | Self::NotNull(col)
            | Self::Gte(col, _)
            | Self::Lte(col, _) => col,
        }
    }
}

/// A declarative record query: filters, ordering, pagination
#[derive(Debug, Clone)]
pub struct Query {
    pub kind: RecordKind,
    filters: Vec<Filter>,
    order_by: Option<(String, SortDir)>,
    limit: Option<usize>,
    offset: usize,
}

impl Query {
    #[must_use]
    pub const fn new(kind: RecordKind) -> Self {
        Self {
            kind,
            filters: Vec::new(),
            order_by: None,
            limit: None,
            offset: 0,
        }
    }

    /// Query for a typed record kind
    #[must_use]
    pub const fn of<R: Record>() -> Self {
        Self::new(R::KIND)
    }

    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Eq(column.into(), value.into()))
    }

    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>, dir: SortDir) -> Self {
        self.order_by = Some((column.into(), dir));
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub const fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

/// One operation in an atomic batch
#[derive(Debug, Clone)]
pub enum BatchOp {
    Create { kind: RecordKind, map: ColumnMap },
    Update {
        kind: RecordKind,
        id: RecordId,
        patch: ColumnMap,
    },
    Delete { kind: RecordKind, id: RecordId },
}

impl BatchOp {
    /// Create op from a typed record
    pub fn create<R: Record>(record: &R) -> Result<Self> {
        Ok(Self::Create {
            kind: R::KIND,
            map: to_map(record)?,
        })
    }

    /// Update op for a typed record kind
    pub fn update<R: Record>(id: RecordId, patch: ColumnMap) -> Self {
        Self::Update {
            kind: R::KIND,
            id,
            patch,
        }
    }
}

/// Counts and sizes exposed to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub estimated_bytes: u64,
    pub queue_depth: u64,
    pub abandoned_entries: usize,
    pub open_conflicts: usize,
    pub records: BTreeMap<RecordKind, u64>,
}

/// Handle for a registered live query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveQueryId(u64);

type Deliver = Arc<dyn Fn(&[ColumnMap]) + Send + Sync>;

struct LiveQuery {
    id: u64,
    query: Query,
    deliver: Deliver,
}

struct StoreInner {
    db: Database,
    quota: QuotaGuard,
    cipher: Option<FieldCipher>,
    retry: RetryPolicy,
    live: Vec<LiveQuery>,
    next_live_id: u64,
}

/// Effects gathered while the store lock is held, applied after release
#[derive(Default)]
struct Effects {
    warn_bytes: Option<u64>,
    enqueued: bool,
    events: Vec<DataEvent>,
    deliveries: Vec<(Deliver, Vec<ColumnMap>)>,
}

/// The serialized-writer record store
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<Mutex<StoreInner>>,
    events: EventBus,
    queue_activity: watch::Sender<u64>,
}

impl LocalStore {
    /// Open a file-backed store, running migrations and recovering any
    /// in-flight queue entries from a previous run
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        Self::from_db(Database::open(path)?, config)
    }

    /// Open an in-memory store (primarily for tests)
    pub fn open_in_memory(config: StoreConfig) -> Result<Self> {
        Self::from_db(Database::open_in_memory()?, config)
    }

    fn from_db(db: Database, config: StoreConfig) -> Result<Self> {
        queue::requeue_in_flight(db.connection())?;
        let quota = QuotaGuard::new(config.quota, &db)?;
        let (queue_activity, _) = watch::channel(0);
        Ok(Self {
            inner: Arc::new(Mutex::new(StoreInner {
                db,
                quota,
                cipher: config.encryption_key.map(|key| FieldCipher::new(&key)),
                retry: config.retry,
                live: Vec::new(),
                next_live_id: 0,
            })),
            events: EventBus::new(),
            queue_activity,
        })
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Observability hook registry
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Watch channel bumped whenever a queue intent is recorded; the sync
    /// engine uses it as a trigger
    pub fn queue_activity(&self) -> watch::Receiver<u64> {
        self.queue_activity.subscribe()
    }

    /// Retry policy stamped onto queue entries
    pub fn retry_policy(&self) -> RetryPolicy {
        self.lock().retry
    }

    // ---- CRUD ----------------------------------------------------------

    /// Persist a new record; it becomes pending and a create intent is
    /// queued in the same transaction
    pub fn create<R: Record>(&self, mut record: R) -> Result<R> {
        record.meta_mut().sync_status = SyncStatus::Pending;
        let map = to_map(&record)?;

        let effects = {
            let mut inner = self.lock();
            self.execute_ops(
                &mut inner,
                vec![WriteIntent::Upsert {
                    kind: R::KIND,
                    map,
                    queue_op: Some(QueueOperation::Create),
                }],
            )?
        };
        self.finish(effects);
        Ok(record)
    }

    /// Fetch a typed record by id
    pub fn get<R: Record>(&self, id: RecordId) -> Result<Option<R>> {
        let inner = self.lock();
        let map = fetch_map(&inner, R::KIND, &id.as_str())?;
        drop(inner);
        map.map(decode).transpose()
    }

    /// Apply a partial column patch to a record. Refreshes `updated_at`,
    /// drops the record back to pending, and queues an update intent.
    pub fn update<R: Record>(&self, id: RecordId, patch: ColumnMap) -> Result<R> {
        let (record, effects) = {
            let mut inner = self.lock();
            let map = merge_patch(&inner, R::KIND, id, patch)?;
            let effects = self.execute_ops(
                &mut inner,
                vec![WriteIntent::Upsert {
                    kind: R::KIND,
                    map: map.clone(),
                    queue_op: Some(QueueOperation::Update),
                }],
            )?;
            (decode::<R>(map)?, effects)
        };
        self.finish(effects);
        Ok(record)
    }

    /// Hard-delete a record locally and queue a delete intent
    pub fn delete(&self, kind: RecordKind, id: RecordId) -> Result<()> {
        let effects = {
            let mut inner = self.lock();
            self.execute_ops(
                &mut inner,
                vec![WriteIntent::Remove {
                    kind,
                    id: id.as_str(),
                    enqueue: true,
                }],
            )?
        };
        self.finish(effects);
        Ok(())
    }

    /// Execute a heterogeneous batch atomically: either every operation
    /// commits or none does
    pub fn batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        let effects = {
            let mut inner = self.lock();
            let mut intents = Vec::with_capacity(ops.len());
            for op in ops {
                intents.push(match op {
                    BatchOp::Create { kind, map } => WriteIntent::Upsert {
                        kind,
                        map,
                        queue_op: Some(QueueOperation::Create),
                    },
                    BatchOp::Update { kind, id, patch } => WriteIntent::Upsert {
                        kind,
                        map: merge_patch(&inner, kind, id, patch)?,
                        queue_op: Some(QueueOperation::Update),
                    },
                    BatchOp::Delete { kind, id } => WriteIntent::Remove {
                        kind,
                        id: id.as_str(),
                        enqueue: true,
                    },
                });
            }
            self.execute_ops(&mut inner, intents)?
        };
        self.finish(effects);
        Ok(())
    }

    /// Run a query and decode the results
    pub fn find<R: Record>(&self, query: &Query) -> Result<Vec<R>> {
        self.find_maps(query)?.into_iter().map(decode).collect()
    }

    /// Run a query and return raw column maps
    pub fn find_maps(&self, query: &Query) -> Result<Vec<ColumnMap>> {
        let inner = self.lock();
        query_maps(&inner, query)
    }

    /// Register a live query. The callback receives the current result set
    /// immediately and again after every committed write touching the
    /// query's kind.
    pub fn subscribe<R: Record>(
        &self,
        query: Query,
        callback: impl Fn(Vec<R>) + Send + Sync + 'static,
    ) -> Result<LiveQueryId> {
        let deliver: Deliver = Arc::new(move |rows: &[ColumnMap]| {
            let records: Vec<R> = rows.iter().cloned().filter_map(|m| decode(m).ok()).collect();
            callback(records);
        });

        let (id, initial) = {
            let mut inner = self.lock();
            let rows = query_maps(&inner, &query)?;
            let id = inner.next_live_id;
            inner.next_live_id += 1;
            inner.live.push(LiveQuery {
                id,
                query,
                deliver: Arc::clone(&deliver),
            });
            (id, rows)
        };

        deliver(&initial);
        Ok(LiveQueryId(id))
    }

    /// Drop a live query registration
    pub fn unsubscribe(&self, id: LiveQueryId) {
        let mut inner = self.lock();
        inner.live.retain(|lq| lq.id != id.0);
    }

    // ---- Sync engine surface ------------------------------------------

    /// Apply a server-confirmed record state: marked synced, not re-queued
    pub fn apply_remote(&self, kind: RecordKind, mut map: ColumnMap) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        map.insert("sync_status".to_string(), json!("synced"));
        map.insert("last_synced_at".to_string(), json!(now));

        let effects = {
            let mut inner = self.lock();
            self.execute_ops(
                &mut inner,
                vec![WriteIntent::Upsert {
                    kind,
                    map,
                    queue_op: None,
                }],
            )?
        };
        self.finish(effects);
        Ok(())
    }

    /// Apply a server-side deletion. Idempotent: deleting an absent record
    /// is a no-op.
    pub fn apply_remote_delete(&self, kind: RecordKind, record_id: &str) -> Result<()> {
        let effects = {
            let inner = self.lock();
            let spec = schema::spec(kind);
            let removed = inner.db.connection().execute(
                &format!("DELETE FROM {} WHERE id = ?1", spec.table),
                params![record_id],
            )?;
            if removed == 0 {
                Effects::default()
            } else {
                Effects {
                    deliveries: collect_deliveries(&inner, &BTreeSet::from([kind])),
                    ..Effects::default()
                }
            }
        };
        self.finish(effects);
        Ok(())
    }

    /// Dequeue the next push batch (entries become in-flight)
    pub fn next_push_batch(&self, limit: usize) -> Result<Vec<QueueEntry>> {
        let inner = self.lock();
        let now = chrono::Utc::now().timestamp_millis();
        queue::next_batch(inner.db.connection(), now, limit)
    }

    /// The server acknowledged an entry: dequeue it and, unless a newer
    /// local edit is already queued, mark the record synced
    pub fn ack_entry(&self, entry: &QueueEntry) -> Result<()> {
        let effects = {
            let inner = self.lock();
            let conn = inner.db.connection();
            queue::ack(conn, &entry.id)?;

            let mut effects = Effects::default();
            if entry.operation != QueueOperation::Delete {
                let newer = queue::entry_for_record(conn, entry.kind, &entry.record_id)?;
                if newer.is_none() {
                    let spec = schema::spec(entry.kind);
                    let now = chrono::Utc::now().timestamp_millis();
                    conn.execute(
                        &format!(
                            "UPDATE {} SET sync_status = 'synced', last_synced_at = ?2
                             WHERE id = ?1",
                            spec.table
                        ),
                        params![entry.record_id, now],
                    )?;
                    effects.deliveries =
                        collect_deliveries(&inner, &BTreeSet::from([entry.kind]));
                }
            }
            effects
        };
        self.finish(effects);
        Ok(())
    }

    /// A push attempt failed: apply backoff, or abandon and mark the record
    /// failed once the retry budget is exhausted
    pub fn fail_entry(&self, entry: &QueueEntry, error: &str) -> Result<QueueState> {
        let (state, effects) = {
            let inner = self.lock();
            let conn = inner.db.connection();
            let now = chrono::Utc::now().timestamp_millis();
            let state = queue::fail(conn, &entry.id, &inner.retry, now, error)?;

            let mut effects = Effects::default();
            if state == QueueState::Abandoned {
                let spec = schema::spec(entry.kind);
                conn.execute(
                    &format!("UPDATE {} SET sync_status = 'failed' WHERE id = ?1", spec.table),
                    params![entry.record_id],
                )?;
                effects.events.push(DataEvent::EntryAbandoned {
                    kind: entry.kind,
                    record_id: entry.record_id.clone(),
                    error: error.to_string(),
                });
                effects.deliveries = collect_deliveries(&inner, &BTreeSet::from([entry.kind]));
            }
            (state, effects)
        };
        self.finish(effects);
        Ok(state)
    }

    /// Return a dequeued entry to the queue untouched (cycle ended before
    /// it could be sent)
    pub fn requeue_entry(&self, entry: &QueueEntry) -> Result<()> {
        let inner = self.lock();
        queue::requeue(inner.db.connection(), &entry.id)
    }

    /// Reset abandoned entries for another retry round
    pub fn retry_abandoned(&self) -> Result<usize> {
        let count = {
            let inner = self.lock();
            queue::retry_abandoned(inner.db.connection())?
        };
        if count > 0 {
            self.queue_activity.send_modify(|n| *n += 1);
        }
        Ok(count)
    }

    /// Decrypted column map for one record, if present
    pub fn record_map(&self, kind: RecordKind, record_id: &str) -> Result<Option<ColumnMap>> {
        let inner = self.lock();
        fetch_map(&inner, kind, record_id)
    }

    /// Drop the queued intent for a record whose local edit lost an
    /// auto-resolved conflict
    pub fn discard_pending_intent(&self, kind: RecordKind, record_id: &str) -> Result<()> {
        let inner = self.lock();
        queue::remove_for_record(inner.db.connection(), kind, record_id)
    }

    /// Persist a merged conflict outcome: the record becomes pending again
    /// and an update intent replaces whatever was queued
    pub fn save_merged(&self, kind: RecordKind, mut map: ColumnMap) -> Result<()> {
        map.insert(
            "updated_at".to_string(),
            json!(chrono::Utc::now().timestamp_millis()),
        );
        map.insert("sync_status".to_string(), json!("pending"));
        let effects = {
            let mut inner = self.lock();
            self.execute_ops(
                &mut inner,
                vec![WriteIntent::Upsert {
                    kind,
                    map,
                    queue_op: Some(QueueOperation::Update),
                }],
            )?
        };
        self.finish(effects);
        Ok(())
    }

    /// Persist a detected divergence, mark the record conflicted, and emit
    /// the conflict hook
    pub fn detect_conflict(
        &self,
        kind: RecordKind,
        record_id: &str,
        local: &ColumnMap,
        remote: &ColumnMap,
    ) -> Result<Conflict> {
        let (conflict, effects) = {
            let inner = self.lock();
            let conn = inner.db.connection();
            let conflict = resolver::insert_conflict(conn, kind, record_id, local, remote)?;
            let spec = schema::spec(kind);
            conn.execute(
                &format!(
                    "UPDATE {} SET sync_status = 'conflicted' WHERE id = ?1",
                    spec.table
                ),
                params![record_id],
            )?;

            let mut effects = Effects::default();
            effects.events.push(DataEvent::ConflictDetected(conflict.clone()));
            effects.deliveries = collect_deliveries(&inner, &BTreeSet::from([kind]));
            (conflict, effects)
        };
        self.finish(effects);
        Ok(conflict)
    }

    /// Conflicts awaiting manual resolution, oldest first
    pub fn list_conflicts(&self) -> Result<Vec<Conflict>> {
        let inner = self.lock();
        resolver::list_open(inner.db.connection())
    }

    /// Guard for flows that need a clean sync state (export, account
    /// unlink): fails while manually surfaced conflicts remain open
    pub fn ensure_no_open_conflicts(&self) -> Result<()> {
        let open = self.list_conflicts()?.len();
        if open > 0 {
            return Err(Error::ConflictUnresolved(open));
        }
        Ok(())
    }

    /// Close a manually surfaced conflict with the caller's decision
    pub fn resolve_conflict(
        &self,
        conflict_id: &str,
        resolution: &ManualResolution,
    ) -> Result<()> {
        let effects = {
            let mut inner = self.lock();
            let conn = inner.db.connection();
            let conflict = resolver::get(conn, conflict_id)?
                .ok_or_else(|| Error::NotFound(conflict_id.to_string()))?;
            if !conflict.is_open() {
                return Err(Error::InvalidInput(format!(
                    "conflict {conflict_id} is already resolved"
                )));
            }

            let kind = conflict.kind;
            let record_id = conflict.record_id.clone();
            resolver::mark_resolved(conn, conflict_id, resolution.as_str())?;

            match resolution {
                ManualResolution::KeepLocal => {
                    // Re-queue the local version now that the conflict no
                    // longer blocks its push
                    match fetch_map(&inner, kind, &record_id)? {
                        Some(mut map) => {
                            map.insert("sync_status".to_string(), json!("pending"));
                            self.execute_ops(
                                &mut inner,
                                vec![WriteIntent::Upsert {
                                    kind,
                                    map,
                                    queue_op: Some(QueueOperation::Update),
                                }],
                            )?
                        }
                        None => Effects::default(),
                    }
                }
                ManualResolution::KeepRemote => {
                    let remote = conflict
                        .remote
                        .as_object()
                        .cloned()
                        .ok_or_else(|| Error::InvalidInput("conflict lost its payload".into()))?;
                    queue::remove_for_record(inner.db.connection(), kind, &record_id)?;
                    let now = chrono::Utc::now().timestamp_millis();
                    let mut map = remote;
                    map.insert("sync_status".to_string(), json!("synced"));
                    map.insert("last_synced_at".to_string(), json!(now));
                    self.execute_ops(
                        &mut inner,
                        vec![WriteIntent::Upsert {
                            kind,
                            map,
                            queue_op: None,
                        }],
                    )?
                }
                ManualResolution::Merged(merged) => {
                    let mut map = merged.clone();
                    map.insert("id".to_string(), json!(record_id));
                    map.insert(
                        "updated_at".to_string(),
                        json!(chrono::Utc::now().timestamp_millis()),
                    );
                    map.insert("sync_status".to_string(), json!("pending"));
                    self.execute_ops(
                        &mut inner,
                        vec![WriteIntent::Upsert {
                            kind,
                            map,
                            queue_op: Some(QueueOperation::Update),
                        }],
                    )?
                }
            }
        };
        self.finish(effects);
        Ok(())
    }

    /// Last successful pull cursor for a kind
    pub fn pull_cursor(&self, kind: RecordKind) -> Result<Option<i64>> {
        let inner = self.lock();
        let cursor = inner
            .db
            .connection()
            .query_row(
                "SELECT last_pulled_at FROM sync_cursors WHERE record_kind = ?1",
                params![kind.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(cursor)
    }

    /// Advance the pull cursor after a successful pull
    pub fn set_pull_cursor(&self, kind: RecordKind, at: i64) -> Result<()> {
        let inner = self.lock();
        inner.db.connection().execute(
            "INSERT INTO sync_cursors (record_kind, last_pulled_at) VALUES (?1, ?2)
             ON CONFLICT(record_kind) DO UPDATE SET last_pulled_at = excluded.last_pulled_at",
            params![kind.as_str(), at],
        )?;
        Ok(())
    }

    // ---- Quota and maintenance ----------------------------------------

    /// Re-measure the store, emit a storage warning if the soft limit is
    /// crossed, and run the retention cleanup pass when needed
    pub fn run_storage_check(&self) -> Result<Option<CleanupReport>> {
        let (report, effects) = {
            let mut inner = self.lock();
            let inner = &mut *inner;
            let size = inner.quota.remeasure(&inner.db)?;
            if !inner.quota.above_soft_limit() {
                (None, Effects::default())
            } else {
                let mut effects = Effects::default();
                effects.events.push(DataEvent::StorageWarning(size));
                let report = inner.quota.run_cleanup(&inner.db)?;
                let touched: BTreeSet<RecordKind> = report.removed.keys().copied().collect();
                effects.deliveries = collect_deliveries(inner, &touched);
                (Some(report), effects)
            }
        };
        self.finish(effects);
        Ok(report)
    }

    /// Current size estimate in bytes
    pub fn estimated_size_bytes(&self) -> u64 {
        self.lock().quota.estimated_bytes()
    }

    /// Counters for the status surface
    pub fn stats(&self) -> Result<StoreStats> {
        let inner = self.lock();
        let conn = inner.db.connection();

        let mut records = BTreeMap::new();
        for kind in RecordKind::ALL {
            let table = schema::spec(kind).table;
            let count: u64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            records.insert(kind, count);
        }

        let open_conflicts = resolver::list_open(conn)?.len();
        Ok(StoreStats {
            estimated_bytes: inner.quota.estimated_bytes(),
            queue_depth: queue::depth(conn)?,
            abandoned_entries: queue::list_abandoned(conn)?.len(),
            open_conflicts,
            records,
        })
    }

    // ---- Write plumbing -----------------------------------------------

    fn execute_ops(&self, inner: &mut StoreInner, ops: Vec<WriteIntent>) -> Result<Effects> {
        let inner = &mut *inner;
        inner.quota.maybe_remeasure(&inner.db)?;

        let incoming: u64 = ops
            .iter()
            .map(|op| match op {
                WriteIntent::Upsert { map, .. } => {
                    Value::Object(map.clone()).to_string().len() as u64
                }
                WriteIntent::Remove { .. } => 0,
            })
            .sum();
        let verdict = inner.quota.ensure_capacity(incoming)?;

        let mut touched = BTreeSet::new();
        let mut enqueued = false;

        let cipher = inner.cipher.clone();
        let retry = inner.retry;
        let tx = inner.db.connection_mut().transaction()?;
        for op in &ops {
            match op {
                WriteIntent::Upsert {
                    kind,
                    map,
                    queue_op,
                } => {
                    let spec = schema::spec(*kind);
                    validate_map(spec, map)?;
                    let replace = !matches!(queue_op, Some(QueueOperation::Create));
                    write_row(&tx, spec, cipher.as_ref(), map, replace)?;

                    if let Some(operation) = queue_op {
                        let record_id = record_id_of(map)?;
                        queue::enqueue(
                            &tx,
                            *kind,
                            record_id,
                            *operation,
                            &Value::Object(queue_payload(map)),
                            spec.priority,
                            &retry,
                        )?;
                        enqueued = true;
                    }
                    touched.insert(*kind);
                }
                WriteIntent::Remove { kind, id, enqueue } => {
                    let spec = schema::spec(*kind);
                    let removed = tx.execute(
                        &format!("DELETE FROM {} WHERE id = ?1", spec.table),
                        params![id],
                    )?;
                    if removed == 0 {
                        return Err(Error::NotFound(id.clone()));
                    }
                    if *enqueue {
                        let record_id: RecordId = id
                            .parse()
                            .map_err(|_| Error::InvalidInput(format!("invalid record id {id}")))?;
                        queue::enqueue(
                            &tx,
                            *kind,
                            record_id,
                            QueueOperation::Delete,
                            &json!({ "id": id }),
                            spec.priority,
                            &retry,
                        )?;
                        enqueued = true;
                    }
                    touched.insert(*kind);
                }
            }
        }
        tx.commit()?;
        inner.quota.record_write(incoming);

        let mut effects = Effects {
            enqueued,
            deliveries: collect_deliveries(inner, &touched),
            ..Effects::default()
        };
        if let QuotaVerdict::Warn(projected) = verdict {
            effects.warn_bytes = Some(projected);
        }
        Ok(effects)
    }

    /// Apply gathered effects outside the store lock
    fn finish(&self, effects: Effects) {
        if let Some(bytes) = effects.warn_bytes {
            self.events.emit(&DataEvent::StorageWarning(bytes));
        }
        for event in &effects.events {
            self.events.emit(event);
        }
        if effects.enqueued {
            self.queue_activity.send_modify(|n| *n += 1);
        }
        for (deliver, rows) in effects.deliveries {
            deliver(&rows);
        }
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore").finish_non_exhaustive()
    }
}

enum WriteIntent {
    Upsert {
        kind: RecordKind,
        map: ColumnMap,
        /// `None` for sync-engine applies, which are not re-queued
        queue_op: Option<QueueOperation>,
    },
    Remove {
        kind: RecordKind,
        id: String,
        enqueue: bool,
    },
}

/// Serialize a typed record into its column map
pub fn to_map<R: Record>(record: &R) -> Result<ColumnMap> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        _ => Err(Error::Serialization(serde::ser::Error::custom(
            "record did not serialize to an object",
        ))),
    }
}

fn decode<R: Record>(map: ColumnMap) -> Result<R> {
    Ok(serde_json::from_value(Value::Object(map))?)
}

fn record_id_of(map: &ColumnMap) -> Result<RecordId> {
    map.get("id")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::InvalidInput("record map is missing a valid id".to_string()))
}

/// Push payload: the record's columns minus engine-owned sync state
fn queue_payload(map: &ColumnMap) -> ColumnMap {
    let mut payload = map.clone();
    payload.remove("sync_status");
    payload.remove("last_synced_at");
    payload
}

fn validate_map(spec: &KindSpec, map: &ColumnMap) -> Result<()> {
    schema::check_columns(spec, map, false).map_err(Error::SchemaViolation)?;
    (spec.validate)(map).map_err(Error::SchemaViolation)
}

fn merge_patch(
    inner: &StoreInner,
    kind: RecordKind,
    id: RecordId,
    patch: ColumnMap,
) -> Result<ColumnMap> {
    for key in patch.keys() {
        if PROTECTED_COLUMNS.contains(&key.as_str()) {
            return Err(Error::InvalidInput(format!(
                "column {key} cannot be patched directly"
            )));
        }
    }

    let mut map = fetch_map(inner, kind, &id.as_str())?
        .ok_or_else(|| Error::NotFound(id.to_string()))?;
    for (key, value) in patch {
        map.insert(key, value);
    }
    map.insert(
        "updated_at".to_string(),
        json!(chrono::Utc::now().timestamp_millis()),
    );
    map.insert("sync_status".to_string(), json!("pending"));
    Ok(map)
}

fn json_to_sql(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(i64::from(*b)),
        Value::Number(n) => n.as_i64().map_or_else(
            || Sql::Real(n.as_f64().unwrap_or(0.0)),
            Sql::Integer,
        ),
        Value::String(s) => Sql::Text(s.clone()),
        other => Sql::Text(other.to_string()),
    }
}

fn sql_to_json(value: rusqlite::types::Value) -> Value {
    use rusqlite::types::Value as Sql;
    match value {
        Sql::Null => Value::Null,
        Sql::Integer(i) => json!(i),
        Sql::Real(f) => json!(f),
        Sql::Text(s) => Value::String(s),
        Sql::Blob(_) => Value::Null,
    }
}

fn write_row(
    conn: &Connection,
    spec: &KindSpec,
    cipher: Option<&FieldCipher>,
    map: &ColumnMap,
    replace: bool,
) -> Result<()> {
    let mut columns = vec!["id"];
    let mut values: Vec<rusqlite::types::Value> = vec![json_to_sql(
        map.get("id").unwrap_or(&Value::Null),
    )];

    for col in spec.columns() {
        let value = map.get(col.name).cloned().unwrap_or(Value::Null);
        let sql_value = if spec.is_encrypted(col.name) && !value.is_null() {
            let cipher = cipher.ok_or_else(|| {
                Error::Encryption(format!(
                    "no encryption key configured for {}.{}",
                    spec.table, col.name
                ))
            })?;
            rusqlite::types::Value::Text(cipher.encrypt_value(&value)?)
        } else {
            json_to_sql(&value)
        };
        columns.push(col.name);
        values.push(sql_value);
    }

    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let verb = if replace { "INSERT OR REPLACE" } else { "INSERT" };
    let sql = format!(
        "{verb} INTO {} ({}) VALUES ({})",
        spec.table,
        columns.join(", "),
        placeholders.join(", ")
    );

    conn.execute(&sql, rusqlite::params_from_iter(values))
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(code, msg)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Error::SchemaViolation(msg.unwrap_or_else(|| code.to_string()))
            }
            other => Error::Database(other),
        })?;
    Ok(())
}

fn select_columns(spec: &KindSpec) -> String {
    let mut cols = vec!["id"];
    cols.extend(spec.columns().map(|c| c.name));
    cols.join(", ")
}

fn rows_to_maps(
    spec: &KindSpec,
    cipher: Option<&FieldCipher>,
    raw_rows: Vec<Vec<rusqlite::types::Value>>,
) -> Result<Vec<ColumnMap>> {
    let mut maps = Vec::with_capacity(raw_rows.len());
    for raw in raw_rows {
        let mut map = ColumnMap::new();
        let mut iter = raw.into_iter();
        map.insert(
            "id".to_string(),
            sql_to_json(iter.next().unwrap_or(rusqlite::types::Value::Null)),
        );
        for col in spec.columns() {
            let value = iter.next().unwrap_or(rusqlite::types::Value::Null);
            let json = if spec.is_encrypted(col.name) {
                match value {
                    rusqlite::types::Value::Text(encoded) => {
                        let cipher = cipher.ok_or_else(|| {
                            Error::Encryption(format!(
                                "no encryption key configured for {}.{}",
                                spec.table, col.name
                            ))
                        })?;
                        cipher.decrypt_value(&encoded)?
                    }
                    _ => Value::Null,
                }
            } else {
                sql_to_json(value)
            };
            map.insert(col.name.to_string(), json);
        }
        maps.push(map);
    }
    Ok(maps)
}

fn fetch_raw_rows(
    conn: &Connection,
    spec: &KindSpec,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Vec<rusqlite::types::Value>>> {
    let column_count = spec.columns().count() + 1;
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| {
            let mut raw = Vec::with_capacity(column_count);
            for i in 0..column_count {
                raw.push(row.get::<_, rusqlite::types::Value>(i)?);
            }
            Ok(raw)
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn fetch_map(inner: &StoreInner, kind: RecordKind, record_id: &str) -> Result<Option<ColumnMap>> {
    let spec = schema::spec(kind);
    let sql = format!(
        "SELECT {} FROM {} WHERE id = ?1",
        select_columns(spec),
        spec.table
    );
    let raw = fetch_raw_rows(inner.db.connection(), spec, &sql, params![record_id])?;
    Ok(rows_to_maps(spec, inner.cipher.as_ref(), raw)?.into_iter().next())
}

fn query_maps(inner: &StoreInner, query: &Query) -> Result<Vec<ColumnMap>> {
    let spec = schema::spec(query.kind);

    let mut sql = format!("SELECT {} FROM {}", select_columns(spec), spec.table);
    let mut params: Vec<rusqlite::types::Value> = Vec::new();

    if !query.filters.is_empty() {
        let mut clauses = Vec::with_capacity(query.filters.len());
        for filter in &query.filters {
            if spec.is_encrypted(filter.column()) {
                return Err(Error::InvalidInput(format!(
                    "cannot filter on encrypted column {}",
                    filter.column()
                )));
            }
            let clause = match filter {
                Filter::Eq(col, value) => {
                    params.push(json_to_sql(value));
                    format!("{col} = ?{}", params.len())
                }
                Filter::IsNull(col) => format!("{col} IS NULL"),
                Filter::NotNull(col) => format!("{col} IS NOT NULL"),
                Filter::Gte(col, value) => {
                    params.push(json_to_sql(value));
                    format!("{col} >= ?{}", params.len())
                }
                Filter::Lte(col, value) => {
                    params.push(json_to_sql(value));
                    format!("{col} <= ?{}", params.len())
                }
            };
            clauses.push(clause);
        }
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }

    match &query.order_by {
        Some((col, dir)) => {
            let dir = match dir {
                SortDir::Asc => "ASC",
                SortDir::Desc => "DESC",
            };
            sql.push_str(&format!(" ORDER BY {col} {dir}"));
        }
        None => sql.push_str(" ORDER BY updated_at DESC"),
    }

    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {limit} OFFSET {}", query.offset));
    } else if query.offset > 0 {
        sql.push_str(&format!(" LIMIT -1 OFFSET {}", query.offset));
    }

    let raw = fetch_raw_rows(
        inner.db.connection(),
        spec,
        &sql,
        rusqlite::params_from_iter(params),
    )?;
    rows_to_maps(spec, inner.cipher.as_ref(), raw)
}

fn collect_deliveries(
    inner: &StoreInner,
    touched: &BTreeSet<RecordKind>,
) -> Vec<(Deliver, Vec<ColumnMap>)> {
    let mut deliveries = Vec::new();
    for lq in &inner.live {
        if !touched.contains(&lq.query.kind) {
            continue;
        }
        match query_maps(inner, &lq.query) {
            Ok(rows) => deliveries.push((Arc::clone(&lq.deliver), rows)),
            Err(error) => {
                tracing::warn!("live query {} failed to refresh: {error}", lq.id);
            }
        }
    }
    deliveries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuotaConfig;
    use crate::models::{BouncePlanTask, BudgetEntry, EntryKind, JobApplication, MoodEntry};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store() -> LocalStore {
        LocalStore::open_in_memory(StoreConfig::default().with_encryption_key([3u8; 32])).unwrap()
    }

    #[test]
    fn create_and_get_roundtrip() {
        let store = store();
        let app = store
            .create(JobApplication::new("user-1", "Acme", "Engineer"))
            .unwrap();

        let fetched: JobApplication = store.get(app.id).unwrap().unwrap();
        assert_eq!(fetched.company, "Acme");
        assert_eq!(fetched.meta.sync_status, SyncStatus::Pending);
        assert!(fetched.meta.last_synced_at.is_none());
    }

    #[test]
    fn create_queues_one_intent() {
        let store = store();
        store.create(MoodEntry::new("user-1", 4)).unwrap();
        assert_eq!(store.stats().unwrap().queue_depth, 1);
    }

    #[test]
    fn update_patches_and_requeues() {
        let store = store();
        let app = store
            .create(JobApplication::new("user-1", "Acme", "Engineer"))
            .unwrap();

        let mut patch = ColumnMap::new();
        patch.insert("status".to_string(), json!("applied"));
        let updated: JobApplication = store.update(app.id, patch).unwrap();

        assert_eq!(updated.status.as_str(), "applied");
        assert!(updated.meta.updated_at >= app.meta.updated_at);
        // create + update coalesced into one queued intent
        assert_eq!(store.stats().unwrap().queue_depth, 1);
    }

    #[test]
    fn update_rejects_protected_columns() {
        let store = store();
        let app = store
            .create(JobApplication::new("user-1", "Acme", "Engineer"))
            .unwrap();

        let mut patch = ColumnMap::new();
        patch.insert("sync_status".to_string(), json!("synced"));
        let err = store.update::<JobApplication>(app.id, patch).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn schema_violation_rolls_back_whole_batch() {
        let store = store();
        let good = MoodEntry::new("user-1", 3);
        let bad = MoodEntry::new("user-1", 11);

        let err = store
            .batch(vec![
                BatchOp::create(&good).unwrap(),
                BatchOp::create(&bad).unwrap(),
            ])
            .unwrap_err();
        assert!(matches!(err, Error::SchemaViolation(_)));

        // Nothing committed, nothing queued
        let found: Vec<MoodEntry> = store.find(&Query::of::<MoodEntry>()).unwrap();
        assert!(found.is_empty());
        assert_eq!(store.stats().unwrap().queue_depth, 0);
    }

    #[test]
    fn duplicate_plan_task_key_is_a_schema_violation() {
        let store = store();
        store
            .create(BouncePlanTask::new("user-1", "day1_breathe"))
            .unwrap();
        let err = store
            .create(BouncePlanTask::new("user-1", "day1_breathe"))
            .unwrap_err();
        assert!(matches!(err, Error::SchemaViolation(_)));
    }

    #[test]
    fn delete_removes_row_and_queues_delete() {
        let store = store();
        let entry = store.create(MoodEntry::new("user-1", 2)).unwrap();

        // Drain the create so the delete doesn't cancel against it
        let batch = store.next_push_batch(10).unwrap();
        store.ack_entry(&batch[0]).unwrap();

        store.delete(RecordKind::MoodEntry, entry.id).unwrap();
        assert!(store.get::<MoodEntry>(entry.id).unwrap().is_none());

        let batch = store.next_push_batch(10).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].operation, QueueOperation::Delete);
    }

    #[test]
    fn delete_missing_record_is_not_found() {
        let store = store();
        let err = store
            .delete(RecordKind::MoodEntry, RecordId::new())
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn budget_amount_is_encrypted_at_rest() {
        let store = store();
        let entry = store
            .create(BudgetEntry::new(
                "user-1",
                "groceries",
                98_765,
                EntryKind::Expense,
            ))
            .unwrap();

        // Raw column text must not contain the plaintext amount
        let raw: String = {
            let inner = store.lock();
            inner
                .db
                .connection()
                .query_row(
                    "SELECT amount_cents FROM budget_entries WHERE id = ?1",
                    params![entry.id.as_str()],
                    |row| row.get(0),
                )
                .unwrap()
        };
        assert!(!raw.contains("98765"));

        let decoded: BudgetEntry = store.get(entry.id).unwrap().unwrap();
        assert_eq!(decoded.amount_cents, 98_765);
    }

    #[test]
    fn find_filters_and_paginates() {
        let store = store();
        for (company, status) in [("A", "applied"), ("B", "saved"), ("C", "applied")] {
            let mut app = JobApplication::new("user-1", company, "Role");
            if status == "applied" {
                app = app.with_status(crate::models::ApplicationStatus::Applied);
            }
            store.create(app).unwrap();
        }

        let applied: Vec<JobApplication> = store
            .find(&Query::of::<JobApplication>().eq("status", "applied"))
            .unwrap();
        assert_eq!(applied.len(), 2);

        let paged: Vec<JobApplication> = store
            .find(
                &Query::of::<JobApplication>()
                    .order_by("company", SortDir::Asc)
                    .limit(1)
                    .offset(1),
            )
            .unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].company, "B");
    }

    #[test]
    fn filtering_on_encrypted_column_is_rejected() {
        let store = store();
        let err = store
            .find::<BudgetEntry>(&Query::of::<BudgetEntry>().eq("amount_cents", 5))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn live_query_reemits_on_matching_writes_only() {
        let store = store();
        let emissions = Arc::new(AtomicUsize::new(0));
        let emissions_clone = Arc::clone(&emissions);

        store
            .subscribe::<MoodEntry>(Query::of::<MoodEntry>(), move |_rows| {
                emissions_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert_eq!(emissions.load(Ordering::SeqCst), 1); // initial result set

        store.create(MoodEntry::new("user-1", 3)).unwrap();
        assert_eq!(emissions.load(Ordering::SeqCst), 2);

        // A write to a different kind must not re-emit this query
        store
            .create(JobApplication::new("user-1", "Acme", "Engineer"))
            .unwrap();
        assert_eq!(emissions.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribe_stops_live_query() {
        let store = store();
        let emissions = Arc::new(AtomicUsize::new(0));
        let emissions_clone = Arc::clone(&emissions);

        let id = store
            .subscribe::<MoodEntry>(Query::of::<MoodEntry>(), move |_rows| {
                emissions_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        store.unsubscribe(id);
        store.create(MoodEntry::new("user-1", 3)).unwrap();
        assert_eq!(emissions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn hard_limit_blocks_writes_atomically() {
        let quota = QuotaConfig {
            soft_limit_bytes: 1,
            hard_limit_bytes: 2,
            measure_interval: std::time::Duration::from_secs(3600),
        };
        let store =
            LocalStore::open_in_memory(StoreConfig::default().with_quota(quota)).unwrap();

        let err = store.create(MoodEntry::new("user-1", 3)).unwrap_err();
        assert!(matches!(err, Error::StorageLimitExceeded { .. }));

        let found: Vec<MoodEntry> = store.find(&Query::of::<MoodEntry>()).unwrap();
        assert!(found.is_empty());
        assert_eq!(store.stats().unwrap().queue_depth, 0);
    }

    #[test]
    fn soft_limit_warns_but_commits() {
        let quota = QuotaConfig {
            soft_limit_bytes: 1,
            hard_limit_bytes: u64::MAX,
            measure_interval: std::time::Duration::from_secs(3600),
        };
        let store =
            LocalStore::open_in_memory(StoreConfig::default().with_quota(quota)).unwrap();

        let warnings = Arc::new(AtomicUsize::new(0));
        let warnings_clone = Arc::clone(&warnings);
        store.events().subscribe(move |event| {
            if matches!(event, DataEvent::StorageWarning(_)) {
                warnings_clone.fetch_add(1, Ordering::SeqCst);
            }
        });

        store.create(MoodEntry::new("user-1", 3)).unwrap();
        assert_eq!(warnings.load(Ordering::SeqCst), 1);
        assert_eq!(store.stats().unwrap().records[&RecordKind::MoodEntry], 1);
    }

    #[test]
    fn apply_remote_is_synced_and_not_queued() {
        let store = store();
        let mut entry = MoodEntry::new("user-1", 4);
        entry.meta.mark_synced(123);
        let map = to_map(&entry).unwrap();

        store.apply_remote(RecordKind::MoodEntry, map).unwrap();

        let fetched: MoodEntry = store.get(entry.id).unwrap().unwrap();
        assert_eq!(fetched.meta.sync_status, SyncStatus::Synced);
        assert!(fetched.meta.last_synced_at.is_some());
        assert_eq!(store.stats().unwrap().queue_depth, 0);
    }

    #[test]
    fn ack_marks_record_synced_unless_newer_edit_queued() {
        let store = store();
        let entry = store.create(MoodEntry::new("user-1", 2)).unwrap();

        let batch = store.next_push_batch(10).unwrap();
        assert_eq!(batch.len(), 1);

        // A newer local edit lands while the entry is in flight
        let mut patch = ColumnMap::new();
        patch.insert("score".to_string(), json!(5));
        store.update::<MoodEntry>(entry.id, patch).unwrap();

        store.ack_entry(&batch[0]).unwrap();
        let fetched: MoodEntry = store.get(entry.id).unwrap().unwrap();
        // Still pending: the newer edit has not been pushed yet
        assert_eq!(fetched.meta.sync_status, SyncStatus::Pending);

        let batch = store.next_push_batch(10).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload["score"], 5);
        store.ack_entry(&batch[0]).unwrap();

        let fetched: MoodEntry = store.get(entry.id).unwrap().unwrap();
        assert_eq!(fetched.meta.sync_status, SyncStatus::Synced);
    }

    #[test]
    fn pull_cursor_roundtrip() {
        let store = store();
        assert_eq!(store.pull_cursor(RecordKind::MoodEntry).unwrap(), None);
        store.set_pull_cursor(RecordKind::MoodEntry, 42).unwrap();
        store.set_pull_cursor(RecordKind::MoodEntry, 99).unwrap();
        assert_eq!(store.pull_cursor(RecordKind::MoodEntry).unwrap(), Some(99));
    }

    #[test]
    fn retention_prunes_only_old_synced_records() {
        let store = store();
        let day_ms = 24 * 60 * 60 * 1000;
        let now = chrono::Utc::now().timestamp_millis();

        // 91 days old and synced: prunable. 89 days old: retained.
        let mut old = crate::models::CoachConversation::new(
            "user-1",
            crate::models::TurnRole::User,
            "old turn",
        );
        old.meta.created_at = now - 91 * day_ms;
        old.meta.mark_synced(now);
        let mut fresh = crate::models::CoachConversation::new(
            "user-1",
            crate::models::TurnRole::User,
            "fresh turn",
        );
        fresh.meta.created_at = now - 89 * day_ms;
        fresh.meta.mark_synced(now);

        store
            .apply_remote(RecordKind::CoachConversation, to_map(&old).unwrap())
            .unwrap();
        store
            .apply_remote(RecordKind::CoachConversation, to_map(&fresh).unwrap())
            .unwrap();

        {
            let inner = store.lock();
            let removed =
                crate::quota::prune_kind(&inner.db, RecordKind::CoachConversation, now).unwrap();
            assert_eq!(removed, 1);
        }

        let left: Vec<crate::models::CoachConversation> = store
            .find(&Query::of::<crate::models::CoachConversation>())
            .unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].content, "fresh turn");
    }

    #[test]
    fn open_conflicts_block_clean_state_guard() {
        let store = store();
        let entry = store.create(MoodEntry::new("user-1", 2)).unwrap();
        assert!(store.ensure_no_open_conflicts().is_ok());

        let local = store.record_map(RecordKind::MoodEntry, &entry.id.as_str())
            .unwrap()
            .unwrap();
        let mut remote = local.clone();
        remote.insert("score".to_string(), json!(5));
        let conflict = store
            .detect_conflict(RecordKind::MoodEntry, &entry.id.as_str(), &local, &remote)
            .unwrap();

        let err = store.ensure_no_open_conflicts().unwrap_err();
        assert!(matches!(err, Error::ConflictUnresolved(1)));

        store
            .resolve_conflict(&conflict.id, &ManualResolution::KeepLocal)
            .unwrap();
        assert!(store.ensure_no_open_conflicts().is_ok());
    }

    #[test]
    fn storage_check_warns_and_cleans_up() {
        let quota = QuotaConfig {
            // Anything measurable is over the soft limit
            soft_limit_bytes: 1,
            hard_limit_bytes: u64::MAX,
            measure_interval: std::time::Duration::from_secs(3600),
        };
        let store =
            LocalStore::open_in_memory(StoreConfig::default().with_quota(quota)).unwrap();

        let day_ms = 24 * 60 * 60 * 1000;
        let now = chrono::Utc::now().timestamp_millis();
        let mut task = BouncePlanTask::new("user-1", "day1_breathe");
        task.complete(now - 61 * day_ms);
        task.meta.created_at = now - 61 * day_ms;
        task.meta.mark_synced(now);
        store
            .apply_remote(RecordKind::BouncePlanTask, to_map(&task).unwrap())
            .unwrap();

        let warnings = Arc::new(AtomicUsize::new(0));
        let warnings_clone = Arc::clone(&warnings);
        store.events().subscribe(move |event| {
            if matches!(event, DataEvent::StorageWarning(_)) {
                warnings_clone.fetch_add(1, Ordering::SeqCst);
            }
        });

        let report = store.run_storage_check().unwrap().expect("cleanup ran");
        assert_eq!(warnings.load(Ordering::SeqCst), 1);
        assert_eq!(report.removed.get(&RecordKind::BouncePlanTask), Some(&1));

        let left: Vec<BouncePlanTask> = store.find(&Query::of::<BouncePlanTask>()).unwrap();
        assert!(left.is_empty());
    }
}
