//! Database migrations
//!
//! Record tables are generated from the schema descriptions in
//! [`crate::schema`]; sync infrastructure tables are declared inline.
//! Versions are applied in sequence inside one transaction each; a failed
//! step surfaces as [`crate::Error::MigrationFailed`] and leaves the store
//! untouched.

use rusqlite::{Connection, Transaction};

use crate::error::{Error, Result};
use crate::models::RecordKind;
use crate::schema;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn).map_err(migration_failed)?;

    if version < 1 {
        apply(conn, 1, migrate_v1)?;
    }
    if version < 2 {
        apply(conn, 2, migrate_v2)?;
    }

    Ok(())
}

fn migration_failed(error: rusqlite::Error) -> Error {
    Error::MigrationFailed(error.to_string())
}

fn apply(
    conn: &mut Connection,
    version: i32,
    step: fn(&Transaction<'_>) -> rusqlite::Result<()>,
) -> Result<()> {
    let tx = conn.transaction().map_err(migration_failed)?;
    step(&tx).map_err(migration_failed)?;
    tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])
        .map_err(migration_failed)?;
    tx.commit().map_err(migration_failed)?;
    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> rusqlite::Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
}

/// Version 1: record tables from the schema registry
fn migrate_v1(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
    )?;

    for kind in RecordKind::ALL {
        let spec = schema::spec(kind);
        tx.execute_batch(&spec.create_table_sql())?;
        for index_sql in spec.create_index_sql() {
            tx.execute_batch(&index_sql)?;
        }
    }

    Ok(())
}

/// Version 2: offline queue, pull cursors, and conflict list
fn migrate_v2(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS sync_queue (
            id TEXT PRIMARY KEY,
            record_kind TEXT NOT NULL,
            record_id TEXT NOT NULL,
            operation TEXT NOT NULL,
            payload TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 1,
            state TEXT NOT NULL DEFAULT 'queued',
            created_at INTEGER NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL DEFAULT 5,
            next_attempt_at INTEGER NOT NULL DEFAULT 0,
            last_error TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_sync_queue_drain
            ON sync_queue(state, priority, created_at);
        CREATE INDEX IF NOT EXISTS idx_sync_queue_record
            ON sync_queue(record_kind, record_id);

        CREATE TABLE IF NOT EXISTS sync_cursors (
            record_kind TEXT PRIMARY KEY,
            last_pulled_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sync_conflicts (
            id TEXT PRIMARY KEY,
            record_kind TEXT NOT NULL,
            record_id TEXT NOT NULL,
            local_payload TEXT NOT NULL,
            remote_payload TEXT NOT NULL,
            local_updated_at INTEGER NOT NULL,
            remote_updated_at INTEGER NOT NULL,
            detected_at INTEGER NOT NULL,
            resolved_at INTEGER,
            resolution TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_sync_conflicts_record
            ON sync_conflicts(record_kind, record_id);
        CREATE INDEX IF NOT EXISTS idx_sync_conflicts_open
            ON sync_conflicts(resolved_at);",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn migrations_reach_current_version() {
        let mut conn = setup();
        run(&mut conn).unwrap();
        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn migrations_are_idempotent() {
        let mut conn = setup();
        run(&mut conn).unwrap();
        run(&mut conn).unwrap();
        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn all_record_tables_exist() {
        let mut conn = setup();
        run(&mut conn).unwrap();

        for kind in RecordKind::ALL {
            let table = schema::spec(kind).table;
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1)",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert!(exists, "missing table {table}");
        }
    }

    #[test]
    fn queue_and_conflict_tables_exist() {
        let mut conn = setup();
        run(&mut conn).unwrap();

        for table in ["sync_queue", "sync_cursors", "sync_conflicts"] {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1)",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert!(exists, "missing table {table}");
        }
    }
}
