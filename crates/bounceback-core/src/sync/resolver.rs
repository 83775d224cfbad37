//! Conflict detection records and resolution strategies

use std::fmt;
use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::models::RecordKind;
use crate::schema::ColumnMap;

/// How the engine adjudicates divergent local/remote versions.
///
/// Selectable per sync session; `Manual` never resolves silently.
#[derive(Clone, Default)]
pub enum ConflictStrategy {
    /// The local pending edit wins; it stays queued for push
    LocalWins,
    /// The server version wins; the local edit is discarded
    RemoteWins,
    /// Whichever side has the greater `updated_at` wins
    #[default]
    LatestWins,
    /// Caller-supplied field-level merge over both column maps
    Merge(MergeFn),
    /// Persist the conflict and wait for an explicit resolution call
    Manual,
}

impl fmt::Debug for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LocalWins => "local_wins",
            Self::RemoteWins => "remote_wins",
            Self::LatestWins => "latest_wins",
            Self::Merge(_) => "merge",
            Self::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// Field-level merge: receives the full local and remote column maps and
/// returns the merged map. Sync metadata columns are engine-owned and
/// overwritten after the merge.
pub type MergeFn = Arc<dyn Fn(&ColumnMap, &ColumnMap) -> ColumnMap + Send + Sync>;

/// What the strategy decided for one divergent record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    KeepLocal,
    TakeRemote,
    Merged(ColumnMap),
    /// Surface in the conflict list; no automatic outcome
    Manual,
}

/// Apply a strategy to a divergent pair of column maps
pub fn resolve(strategy: &ConflictStrategy, local: &ColumnMap, remote: &ColumnMap) -> Resolution {
    match strategy {
        ConflictStrategy::LocalWins => Resolution::KeepLocal,
        ConflictStrategy::RemoteWins => Resolution::TakeRemote,
        ConflictStrategy::LatestWins => {
            if updated_at(remote) > updated_at(local) {
                Resolution::TakeRemote
            } else {
                Resolution::KeepLocal
            }
        }
        ConflictStrategy::Merge(merge) => Resolution::Merged(merge(local, remote)),
        ConflictStrategy::Manual => Resolution::Manual,
    }
}

fn updated_at(map: &ColumnMap) -> i64 {
    map.get("updated_at").and_then(Value::as_i64).unwrap_or(0)
}

/// A persisted divergence awaiting (or recording) resolution
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    pub id: String,
    pub kind: RecordKind,
    pub record_id: String,
    /// Local column map at detection time
    pub local: Value,
    /// Remote column map at detection time
    pub remote: Value,
    pub local_updated_at: i64,
    pub remote_updated_at: i64,
    pub detected_at: i64,
    pub resolved_at: Option<i64>,
    /// Name of the resolution that closed this conflict
    pub resolution: Option<String>,
}

impl Conflict {
    pub const fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

/// The caller's answer for one manually surfaced conflict
#[derive(Debug, Clone)]
pub enum ManualResolution {
    KeepLocal,
    KeepRemote,
    /// Replace both sides with this merged column map
    Merged(ColumnMap),
}

impl ManualResolution {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::KeepLocal => "keep_local",
            Self::KeepRemote => "keep_remote",
            Self::Merged(_) => "merged",
        }
    }
}

fn parse_conflict(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conflict> {
    let kind: String = row.get(1)?;
    let local: String = row.get(3)?;
    let remote: String = row.get(4)?;
    Ok(Conflict {
        id: row.get(0)?,
        kind: kind.parse().unwrap_or(RecordKind::Profile),
        record_id: row.get(2)?,
        local: serde_json::from_str(&local).unwrap_or(Value::Null),
        remote: serde_json::from_str(&remote).unwrap_or(Value::Null),
        local_updated_at: row.get(5)?,
        remote_updated_at: row.get(6)?,
        detected_at: row.get(7)?,
        resolved_at: row.get(8)?,
        resolution: row.get(9)?,
    })
}

const CONFLICT_COLUMNS: &str = "id, record_kind, record_id, local_payload, remote_payload, \
     local_updated_at, remote_updated_at, detected_at, resolved_at, resolution";

/// Persist a freshly detected conflict and mark any previous open conflict
/// for the same record as superseded by it
pub fn insert_conflict(
    conn: &Connection,
    kind: RecordKind,
    record_id: &str,
    local: &ColumnMap,
    remote: &ColumnMap,
) -> Result<Conflict> {
    let now = chrono::Utc::now().timestamp_millis();
    let conflict = Conflict {
        id: Uuid::now_v7().to_string(),
        kind,
        record_id: record_id.to_string(),
        local: Value::Object(local.clone()),
        remote: Value::Object(remote.clone()),
        local_updated_at: local.get("updated_at").and_then(Value::as_i64).unwrap_or(0),
        remote_updated_at: remote.get("updated_at").and_then(Value::as_i64).unwrap_or(0),
        detected_at: now,
        resolved_at: None,
        resolution: None,
    };

    // A newer divergence replaces an older unresolved one for the record
    conn.execute(
        "UPDATE sync_conflicts
         SET resolved_at = ?3, resolution = 'superseded'
         WHERE record_kind = ?1 AND record_id = ?2 AND resolved_at IS NULL",
        params![kind.as_str(), record_id, now],
    )?;

    conn.execute(
        "INSERT INTO sync_conflicts
         (id, record_kind, record_id, local_payload, remote_payload,
          local_updated_at, remote_updated_at, detected_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            conflict.id,
            kind.as_str(),
            record_id,
            conflict.local.to_string(),
            conflict.remote.to_string(),
            conflict.local_updated_at,
            conflict.remote_updated_at,
            now,
        ],
    )?;

    Ok(conflict)
}

/// Open conflicts, oldest first
pub fn list_open(conn: &Connection) -> Result<Vec<Conflict>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts
         WHERE resolved_at IS NULL
         ORDER BY detected_at ASC"
    ))?;
    let conflicts = stmt
        .query_map([], parse_conflict)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(conflicts)
}

/// Fetch one conflict by id
pub fn get(conn: &Connection, conflict_id: &str) -> Result<Option<Conflict>> {
    let conflict = conn
        .query_row(
            &format!("SELECT {CONFLICT_COLUMNS} FROM sync_conflicts WHERE id = ?1"),
            params![conflict_id],
            parse_conflict,
        )
        .optional()?;
    Ok(conflict)
}

/// Close a conflict with the chosen resolution
pub fn mark_resolved(conn: &Connection, conflict_id: &str, resolution: &str) -> Result<()> {
    conn.execute(
        "UPDATE sync_conflicts SET resolved_at = ?2, resolution = ?3 WHERE id = ?1",
        params![
            conflict_id,
            chrono::Utc::now().timestamp_millis(),
            resolution
        ],
    )?;
    Ok(())
}

/// Whether a record currently has an unresolved conflict
pub fn has_open_conflict(conn: &Connection, kind: RecordKind, record_id: &str) -> Result<bool> {
    let open: bool = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM sync_conflicts
            WHERE record_kind = ?1 AND record_id = ?2 AND resolved_at IS NULL
        )",
        params![kind.as_str(), record_id],
        |row| row.get(0),
    )?;
    Ok(open)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;

    fn map_of(value: Value) -> ColumnMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn latest_wins_compares_updated_at() {
        let local = map_of(json!({"updated_at": 100, "score": 2}));
        let remote = map_of(json!({"updated_at": 200, "score": 4}));
        assert_eq!(
            resolve(&ConflictStrategy::LatestWins, &local, &remote),
            Resolution::TakeRemote
        );
        assert_eq!(
            resolve(&ConflictStrategy::LatestWins, &remote, &local),
            Resolution::KeepLocal
        );
    }

    #[test]
    fn latest_wins_ties_keep_local() {
        let local = map_of(json!({"updated_at": 100}));
        let remote = map_of(json!({"updated_at": 100}));
        assert_eq!(
            resolve(&ConflictStrategy::LatestWins, &local, &remote),
            Resolution::KeepLocal
        );
    }

    #[test]
    fn merge_invokes_caller_function() {
        let merge: MergeFn = Arc::new(|local, remote| {
            let mut merged = remote.clone();
            if let Some(notes) = local.get("notes") {
                merged.insert("notes".to_string(), notes.clone());
            }
            merged
        });
        let local = map_of(json!({"notes": "mine", "score": 2}));
        let remote = map_of(json!({"notes": "theirs", "score": 4}));

        match resolve(&ConflictStrategy::Merge(merge), &local, &remote) {
            Resolution::Merged(map) => {
                assert_eq!(map["notes"], "mine");
                assert_eq!(map["score"], 4);
            }
            other => panic!("expected merge, got {other:?}"),
        }
    }

    #[test]
    fn conflict_roundtrip_and_supersede() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let local = map_of(json!({"updated_at": 10, "score": 1}));
        let remote = map_of(json!({"updated_at": 20, "score": 5}));

        let first =
            insert_conflict(conn, RecordKind::MoodEntry, "rec-1", &local, &remote).unwrap();
        assert!(has_open_conflict(conn, RecordKind::MoodEntry, "rec-1").unwrap());

        let second =
            insert_conflict(conn, RecordKind::MoodEntry, "rec-1", &local, &remote).unwrap();
        let open = list_open(conn).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, second.id);

        let superseded = get(conn, &first.id).unwrap().unwrap();
        assert_eq!(superseded.resolution.as_deref(), Some("superseded"));

        mark_resolved(conn, &second.id, "keep_local").unwrap();
        assert!(!has_open_conflict(conn, RecordKind::MoodEntry, "rec-1").unwrap());
        assert!(list_open(conn).unwrap().is_empty());
    }
}
