//! Offline write queue
//!
//! Durable, ordered list of server-bound intents. Entries are written in
//! the same transaction as the local write they mirror, so a crash can
//! never lose a pending mutation. Multiple mutations to one record
//! coalesce into a single latest-wins entry that keeps its original
//! creation order; FIFO per record is therefore structural.

use std::fmt;
use std::str::FromStr;

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use uuid::Uuid;

use crate::config::RetryPolicy;
use crate::error::{Error, Result};
use crate::models::{RecordId, RecordKind};

/// Priority tier of a queue entry; higher drains first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QueuePriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl QueuePriority {
    const fn from_i64(value: i64) -> Self {
        match value {
            0 => Self::Low,
            2 => Self::High,
            3 => Self::Critical,
            _ => Self::Normal,
        }
    }
}

/// The server-side effect a queue entry requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOperation {
    Create,
    Update,
    Delete,
}

impl QueueOperation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for QueueOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueOperation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown queue operation: {other}")),
        }
    }
}

/// Lifecycle state of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Waiting to be picked up by a push batch
    Queued,
    /// Dequeued for a network send
    InFlight,
    /// Retries exhausted; left for manual intervention
    Abandoned,
}

impl QueueState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InFlight => "in_flight",
            Self::Abandoned => "abandoned",
        }
    }
}

impl FromStr for QueueState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "in_flight" => Ok(Self::InFlight),
            "abandoned" => Ok(Self::Abandoned),
            other => Err(format!("unknown queue state: {other}")),
        }
    }
}

/// One durable server-bound intent
#[derive(Debug, Clone)]
pub struct QueueEntry {
    /// Operation id; the server deduplicates on this
    pub id: String,
    pub kind: RecordKind,
    pub record_id: String,
    pub operation: QueueOperation,
    /// Full column map at the time of the latest coalesced mutation
    pub payload: Value,
    pub priority: QueuePriority,
    pub state: QueueState,
    pub created_at: i64,
    pub attempts: u32,
    pub max_retries: u32,
    pub next_attempt_at: i64,
    pub last_error: Option<String>,
}

fn parse_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueEntry> {
    let kind: String = row.get(1)?;
    let operation: String = row.get(3)?;
    let payload: String = row.get(4)?;
    let state: String = row.get(6)?;
    Ok(QueueEntry {
        id: row.get(0)?,
        kind: kind.parse().unwrap_or(RecordKind::Profile),
        record_id: row.get(2)?,
        operation: operation.parse().unwrap_or(QueueOperation::Update),
        payload: serde_json::from_str(&payload).unwrap_or(Value::Null),
        priority: QueuePriority::from_i64(row.get(5)?),
        state: state.parse().unwrap_or(QueueState::Queued),
        created_at: row.get(7)?,
        attempts: row.get(8)?,
        max_retries: row.get(9)?,
        next_attempt_at: row.get(10)?,
        last_error: row.get(11)?,
    })
}

const ENTRY_COLUMNS: &str = "id, record_kind, record_id, operation, payload, priority, state, \
     created_at, attempts, max_retries, next_attempt_at, last_error";

/// Record a durable intent for a committed local write, coalescing with any
/// still-queued entry for the same record.
///
/// Must run inside the transaction of the originating write.
pub fn enqueue(
    conn: &Connection,
    kind: RecordKind,
    record_id: RecordId,
    operation: QueueOperation,
    payload: &Value,
    priority: QueuePriority,
    policy: &RetryPolicy,
) -> Result<()> {
    let existing: Option<(String, String)> = conn
        .query_row(
            "SELECT id, operation FROM sync_queue
             WHERE record_kind = ?1 AND record_id = ?2 AND state = 'queued'",
            params![kind.as_str(), record_id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let payload_text = serde_json::to_string(payload)?;
    let now = chrono::Utc::now().timestamp_millis();

    match existing {
        None => {
            conn.execute(
                "INSERT INTO sync_queue
                 (id, record_kind, record_id, operation, payload, priority, state,
                  created_at, attempts, max_retries, next_attempt_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'queued', ?7, 0, ?8, 0)",
                params![
                    Uuid::now_v7().to_string(),
                    kind.as_str(),
                    record_id.as_str(),
                    operation.as_str(),
                    payload_text,
                    priority as i64,
                    now,
                    policy.max_retries,
                ],
            )?;
        }
        Some((entry_id, prior_op)) => {
            let prior: QueueOperation = prior_op
                .parse()
                .map_err(|e: String| Error::InvalidInput(e))?;
            match (prior, operation) {
                // The server never saw this record; nothing to tell it
                (QueueOperation::Create, QueueOperation::Delete) => {
                    conn.execute("DELETE FROM sync_queue WHERE id = ?1", params![entry_id])?;
                }
                // A still-unpushed create absorbs later edits; the fresh
                // mutation resets the retry clock
                (QueueOperation::Create, _) => {
                    conn.execute(
                        "UPDATE sync_queue
                         SET payload = ?2, attempts = 0, next_attempt_at = 0
                         WHERE id = ?1",
                        params![entry_id, payload_text],
                    )?;
                }
                // Latest mutation wins; creation order is preserved
                (_, new_op) => {
                    conn.execute(
                        "UPDATE sync_queue
                         SET operation = ?2, payload = ?3, attempts = 0, next_attempt_at = 0
                         WHERE id = ?1",
                        params![entry_id, new_op.as_str(), payload_text],
                    )?;
                }
            }
        }
    }

    Ok(())
}

/// Dequeue the next push batch: queued entries whose backoff has elapsed and
/// whose record has no open conflict, highest priority first, FIFO within a
/// tier. Returned entries are marked in-flight.
pub fn next_batch(conn: &Connection, now: i64, limit: usize) -> Result<Vec<QueueEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLUMNS} FROM sync_queue q
         WHERE q.state = 'queued' AND q.next_attempt_at <= ?1
           AND NOT EXISTS (
               SELECT 1 FROM sync_conflicts c
               WHERE c.record_kind = q.record_kind
                 AND c.record_id = q.record_id
                 AND c.resolved_at IS NULL
           )
         ORDER BY q.priority DESC, q.created_at ASC, q.id ASC
         LIMIT ?2"
    ))?;

    let entries = stmt
        .query_map(params![now, limit as i64], parse_entry)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for entry in &entries {
        conn.execute(
            "UPDATE sync_queue SET state = 'in_flight' WHERE id = ?1",
            params![entry.id],
        )?;
    }

    Ok(entries)
}

/// Remove an entry after the server acknowledged it
pub fn ack(conn: &Connection, entry_id: &str) -> Result<()> {
    conn.execute("DELETE FROM sync_queue WHERE id = ?1", params![entry_id])?;
    Ok(())
}

/// Apply the retry policy to a failed entry.
///
/// Returns the state the entry landed in: re-queued with backoff, or
/// abandoned once attempts reach the entry's retry budget.
pub fn fail(
    conn: &Connection,
    entry_id: &str,
    policy: &RetryPolicy,
    now: i64,
    error: &str,
) -> Result<QueueState> {
    let (attempts, max_retries): (u32, u32) = conn.query_row(
        "SELECT attempts, max_retries FROM sync_queue WHERE id = ?1",
        params![entry_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let attempts = attempts + 1;
    let state = if attempts >= max_retries {
        QueueState::Abandoned
    } else {
        QueueState::Queued
    };
    let delay_ms = i64::try_from(policy.delay_for(attempts).as_millis()).unwrap_or(i64::MAX);

    conn.execute(
        "UPDATE sync_queue
         SET state = ?2, attempts = ?3, next_attempt_at = ?4, last_error = ?5
         WHERE id = ?1",
        params![
            entry_id,
            state.as_str(),
            attempts,
            now.saturating_add(delay_ms),
            error,
        ],
    )?;

    Ok(state)
}

/// Put a dequeued entry back without touching its retry budget. Used when
/// a push cycle ends before the entry could be sent.
pub fn requeue(conn: &Connection, entry_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE sync_queue SET state = 'queued' WHERE id = ?1 AND state = 'in_flight'",
        params![entry_id],
    )?;
    Ok(())
}

/// Reset in-flight entries back to queued. Called on startup: entries left
/// in-flight belong to a push interrupted by a crash.
pub fn requeue_in_flight(conn: &Connection) -> Result<usize> {
    let count = conn.execute(
        "UPDATE sync_queue SET state = 'queued' WHERE state = 'in_flight'",
        [],
    )?;
    if count > 0 {
        tracing::info!("Re-queued {count} in-flight entries from a previous run");
    }
    Ok(count)
}

/// Give abandoned entries another retry budget after user intervention
pub fn retry_abandoned(conn: &Connection) -> Result<usize> {
    let count = conn.execute(
        "UPDATE sync_queue
         SET state = 'queued', attempts = 0, next_attempt_at = 0, last_error = NULL
         WHERE state = 'abandoned'",
        [],
    )?;
    Ok(count)
}

/// Drop any still-queued entry for a record (e.g. after remote-wins
/// resolution discarded the local edit)
pub fn remove_for_record(conn: &Connection, kind: RecordKind, record_id: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM sync_queue
         WHERE record_kind = ?1 AND record_id = ?2 AND state != 'in_flight'",
        params![kind.as_str(), record_id],
    )?;
    Ok(())
}

/// Number of entries not yet acknowledged
pub fn depth(conn: &Connection) -> Result<u64> {
    let count: u64 = conn.query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?;
    Ok(count)
}

/// Entries abandoned after exhausting retries
pub fn list_abandoned(conn: &Connection) -> Result<Vec<QueueEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLUMNS} FROM sync_queue
         WHERE state = 'abandoned'
         ORDER BY created_at ASC"
    ))?;
    let entries = stmt
        .query_map([], parse_entry)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

/// The still-queued entry for one record, if any
pub fn entry_for_record(
    conn: &Connection,
    kind: RecordKind,
    record_id: &str,
) -> Result<Option<QueueEntry>> {
    let entry = conn
        .query_row(
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM sync_queue
                 WHERE record_kind = ?1 AND record_id = ?2 AND state = 'queued'"
            ),
            params![kind.as_str(), record_id],
            parse_entry,
        )
        .optional()?;
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
    }

    #[test]
    fn enqueue_then_drain_in_priority_order() {
        let db = setup();
        let conn = db.connection();

        let low = RecordId::new();
        let high = RecordId::new();
        enqueue(
            conn,
            RecordKind::CoachConversation,
            low,
            QueueOperation::Create,
            &json!({"content": "a"}),
            QueuePriority::Low,
            &policy(),
        )
        .unwrap();
        enqueue(
            conn,
            RecordKind::Profile,
            high,
            QueueOperation::Create,
            &json!({"display_name": "b"}),
            QueuePriority::High,
            &policy(),
        )
        .unwrap();

        let batch = next_batch(conn, chrono::Utc::now().timestamp_millis(), 10).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].record_id, high.as_str());
        assert_eq!(batch[0].state, QueueState::Queued); // snapshot taken before flip
        assert_eq!(batch[1].record_id, low.as_str());

        // Entries are now in flight and invisible to the next batch
        let empty = next_batch(conn, chrono::Utc::now().timestamp_millis(), 10).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn updates_coalesce_latest_wins() {
        let db = setup();
        let conn = db.connection();
        let id = RecordId::new();

        for score in [1, 2, 5] {
            enqueue(
                conn,
                RecordKind::MoodEntry,
                id,
                QueueOperation::Update,
                &json!({"score": score}),
                QueuePriority::Normal,
                &policy(),
            )
            .unwrap();
        }

        assert_eq!(depth(conn).unwrap(), 1);
        let entry = entry_for_record(conn, RecordKind::MoodEntry, &id.as_str())
            .unwrap()
            .unwrap();
        assert_eq!(entry.payload["score"], 5);
    }

    #[test]
    fn create_then_delete_cancels_out() {
        let db = setup();
        let conn = db.connection();
        let id = RecordId::new();

        enqueue(
            conn,
            RecordKind::MoodEntry,
            id,
            QueueOperation::Create,
            &json!({"score": 3}),
            QueuePriority::Normal,
            &policy(),
        )
        .unwrap();
        enqueue(
            conn,
            RecordKind::MoodEntry,
            id,
            QueueOperation::Delete,
            &json!({}),
            QueuePriority::Normal,
            &policy(),
        )
        .unwrap();

        assert_eq!(depth(conn).unwrap(), 0);
    }

    #[test]
    fn create_absorbs_later_update() {
        let db = setup();
        let conn = db.connection();
        let id = RecordId::new();

        enqueue(
            conn,
            RecordKind::MoodEntry,
            id,
            QueueOperation::Create,
            &json!({"score": 2}),
            QueuePriority::Normal,
            &policy(),
        )
        .unwrap();
        enqueue(
            conn,
            RecordKind::MoodEntry,
            id,
            QueueOperation::Update,
            &json!({"score": 4}),
            QueuePriority::Normal,
            &policy(),
        )
        .unwrap();

        let entry = entry_for_record(conn, RecordKind::MoodEntry, &id.as_str())
            .unwrap()
            .unwrap();
        assert_eq!(entry.operation, QueueOperation::Create);
        assert_eq!(entry.payload["score"], 4);
    }

    #[test]
    fn fail_applies_backoff_then_abandons() {
        let db = setup();
        let conn = db.connection();
        let id = RecordId::new();
        let policy = RetryPolicy {
            max_retries: 2,
            ..RetryPolicy::default()
        };

        enqueue(
            conn,
            RecordKind::MoodEntry,
            id,
            QueueOperation::Create,
            &json!({"score": 3}),
            QueuePriority::Normal,
            &policy,
        )
        .unwrap();

        let entry = next_batch(conn, chrono::Utc::now().timestamp_millis(), 1)
            .unwrap()
            .remove(0);

        let state = fail(conn, &entry.id, &policy, 0, "boom").unwrap();
        assert_eq!(state, QueueState::Queued);

        // Backoff keeps it out of an immediate batch
        assert!(next_batch(conn, 0, 10).unwrap().is_empty());

        let far_future = i64::MAX / 2;
        let entry = next_batch(conn, far_future, 1).unwrap().remove(0);
        let state = fail(conn, &entry.id, &policy, 0, "boom again").unwrap();
        assert_eq!(state, QueueState::Abandoned);

        let abandoned = list_abandoned(conn).unwrap();
        assert_eq!(abandoned.len(), 1);
        assert_eq!(abandoned[0].last_error.as_deref(), Some("boom again"));
    }

    #[test]
    fn retry_abandoned_resets_budget() {
        let db = setup();
        let conn = db.connection();
        let id = RecordId::new();
        let policy = RetryPolicy {
            max_retries: 1,
            ..RetryPolicy::default()
        };

        enqueue(
            conn,
            RecordKind::MoodEntry,
            id,
            QueueOperation::Create,
            &json!({"score": 3}),
            QueuePriority::Normal,
            &policy,
        )
        .unwrap();
        let entry = next_batch(conn, chrono::Utc::now().timestamp_millis(), 1)
            .unwrap()
            .remove(0);
        fail(conn, &entry.id, &policy, 0, "down").unwrap();
        assert_eq!(list_abandoned(conn).unwrap().len(), 1);

        assert_eq!(retry_abandoned(conn).unwrap(), 1);
        assert!(list_abandoned(conn).unwrap().is_empty());
        assert_eq!(next_batch(conn, 0, 10).unwrap().len(), 1);
    }

    #[test]
    fn in_flight_entries_recovered_on_startup() {
        let db = setup();
        let conn = db.connection();
        let id = RecordId::new();

        enqueue(
            conn,
            RecordKind::MoodEntry,
            id,
            QueueOperation::Create,
            &json!({"score": 3}),
            QueuePriority::Normal,
            &policy(),
        )
        .unwrap();
        next_batch(conn, chrono::Utc::now().timestamp_millis(), 1).unwrap();

        assert_eq!(requeue_in_flight(conn).unwrap(), 1);
        assert_eq!(
            next_batch(conn, chrono::Utc::now().timestamp_millis(), 1)
                .unwrap()
                .len(),
            1
        );
    }
}
