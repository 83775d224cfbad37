//! Database connection management

use std::path::{Path, PathBuf};

use rusqlite::Connection;

use crate::error::{Error, Result};

use super::migrations;

/// Wrapper around the underlying `SQLite` connection
pub struct Database {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist.
    ///
    /// Runs migrations automatically. A corrupted database file is
    /// quarantined (moved to a timestamped `.corrupt-` backup alongside its
    /// WAL/SHM sidecars) and the open is retried once with a fresh file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match Self::open_at(&path) {
            Ok(db) => Ok(db),
            Err(error) if is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Detected corrupted database file at {}: {}. Quarantining and retrying once.",
                    path.display(),
                    error
                );
                quarantine_corrupted_db_files(&path)?;
                Self::open_at(&path)
            }
            Err(error) => Err(error),
        }
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::finish_open(conn, None)
    }

    fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::finish_open(conn, Some(path.to_path_buf()))
    }

    fn finish_open(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        let mut db = Self { conn, path };
        db.configure()?;
        db.migrate()?;
        Ok(db)
    }

    /// Configure `SQLite` for a single-writer mobile workload
    fn configure(&self) -> Result<()> {
        // WAL can fail on exotic filesystems; the store still works without it
        self.conn
            .pragma_update(None, "journal_mode", "WAL")
            .ok();
        self.conn
            .pragma_update(None, "synchronous", "NORMAL")
            .ok();
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.conn.pragma_update(None, "busy_timeout", 5000).ok();
        Ok(())
    }

    /// Run database migrations
    fn migrate(&mut self) -> Result<()> {
        migrations::run(&mut self.conn)
    }

    /// Measure the current database size from the page counters
    pub fn measured_size_bytes(&self) -> Result<u64> {
        let page_count: u64 = self
            .conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: u64 = self
            .conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))?;
        Ok(page_count * page_size)
    }

    /// Filesystem location, if file-backed
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Mutable access for transactional work
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

fn is_corrupted_db_error(error: &Error) -> bool {
    error
        .to_string()
        .to_ascii_lowercase()
        .contains("file is not a database")
}

/// Move a corrupted DB file aside and delete stale sidecar files so the
/// next open starts clean
fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
    if db_path.exists() {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let backup_name = format!(
            "{}.corrupt-{timestamp}",
            db_path
                .file_name()
                .map_or_else(|| "bounceback.db".into(), |n| n.to_string_lossy())
        );
        let backup_path = db_path.with_file_name(backup_name);

        std::fs::rename(db_path, &backup_path)?;
        tracing::warn!(
            "Moved corrupted local DB file from {} to {}",
            db_path.display(),
            backup_path.display()
        );
    }

    let Some(parent) = db_path.parent() else {
        return Ok(());
    };
    let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
        return Ok(());
    };
    let sidecar_prefix = format!("{base_name}-");

    for entry in std::fs::read_dir(parent)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if file_name.starts_with(&sidecar_prefix) {
            let path = entry.path();
            std::fs::remove_file(&path)?;
            tracing::warn!("Removed stale sidecar file {}", path.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_in_memory_migrates() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.measured_size_bytes().unwrap() > 0);
    }

    #[test]
    fn open_creates_parent_directories() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested/dir/bounceback.db");
        let db = Database::open(&path).unwrap();
        assert_eq!(db.path(), Some(path.as_path()));
        assert!(path.exists());
    }

    #[test]
    fn corrupted_file_is_quarantined_and_reopened() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("bounceback.db");
        std::fs::write(&path, b"this is not a sqlite file, not even close").unwrap();
        std::fs::write(tmp.path().join("bounceback.db-wal"), b"wal").unwrap();

        let db = Database::open(&path).unwrap();
        assert!(db.measured_size_bytes().unwrap() > 0);

        let quarantined = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().contains(".corrupt-"));
        assert!(quarantined);
        assert!(!tmp.path().join("bounceback.db-wal.corrupt").exists());
    }
}
