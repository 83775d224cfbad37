//! Storage quota enforcement and retention cleanup
//!
//! The guard keeps a running byte estimate so the hot write path never
//! touches the page counters; the authoritative size is re-measured on a
//! bounded interval and after every cleanup pass. Live size subtracts the
//! freelist, so deletions show up without waiting for a vacuum.

use std::collections::BTreeMap;

use rusqlite::params;

use crate::config::QuotaConfig;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::RecordKind;
use crate::schema;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Outcome of a capacity check for a size-increasing write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaVerdict {
    /// Below the soft limit; proceed silently
    Ok,
    /// At/above the soft limit; proceed but warn with the projected size
    Warn(u64),
}

/// What a retention cleanup pass removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Rows removed per kind
    pub removed: BTreeMap<RecordKind, usize>,
    pub size_before_bytes: u64,
    pub size_after_bytes: u64,
}

impl CleanupReport {
    pub fn total_removed(&self) -> usize {
        self.removed.values().sum()
    }
}

/// Tracks estimated store size against the configured limits
#[derive(Debug)]
pub struct QuotaGuard {
    config: QuotaConfig,
    estimated_bytes: u64,
    last_measured_at: i64,
}

impl QuotaGuard {
    /// Build a guard seeded with a fresh measurement
    pub fn new(config: QuotaConfig, db: &Database) -> Result<Self> {
        let now = chrono::Utc::now().timestamp_millis();
        Ok(Self {
            config,
            estimated_bytes: live_size_bytes(db)?,
            last_measured_at: now,
        })
    }

    pub const fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// Current size estimate (never staler than one measure interval)
    pub const fn estimated_bytes(&self) -> u64 {
        self.estimated_bytes
    }

    /// Check whether a write adding `incoming_bytes` may proceed
    pub fn ensure_capacity(&self, incoming_bytes: u64) -> Result<QuotaVerdict> {
        let projected = self.estimated_bytes.saturating_add(incoming_bytes);
        if projected >= self.config.hard_limit_bytes {
            return Err(Error::StorageLimitExceeded {
                size_bytes: self.estimated_bytes,
                limit_bytes: self.config.hard_limit_bytes,
            });
        }
        if projected >= self.config.soft_limit_bytes {
            return Ok(QuotaVerdict::Warn(projected));
        }
        Ok(QuotaVerdict::Ok)
    }

    /// Fold a committed write into the running estimate
    pub fn record_write(&mut self, bytes: u64) {
        self.estimated_bytes = self.estimated_bytes.saturating_add(bytes);
    }

    /// Re-measure if the last measurement is older than the interval.
    /// Returns the fresh size when a measurement happened.
    pub fn maybe_remeasure(&mut self, db: &Database) -> Result<Option<u64>> {
        let now = chrono::Utc::now().timestamp_millis();
        let interval_ms = i64::try_from(self.config.measure_interval.as_millis()).unwrap_or(0);
        if now - self.last_measured_at < interval_ms {
            return Ok(None);
        }
        self.remeasure(db).map(Some)
    }

    /// Unconditionally refresh the estimate from the page counters
    pub fn remeasure(&mut self, db: &Database) -> Result<u64> {
        self.estimated_bytes = live_size_bytes(db)?;
        self.last_measured_at = chrono::Utc::now().timestamp_millis();
        Ok(self.estimated_bytes)
    }

    /// Whether the current estimate is at/above the soft limit
    pub const fn above_soft_limit(&self) -> bool {
        self.estimated_bytes >= self.config.soft_limit_bytes
    }

    /// Prune synced records past their kind's retention window, in priority
    /// order, until the store drops below the soft limit or nothing else is
    /// eligible. Always re-measures afterwards.
    pub fn run_cleanup(&mut self, db: &Database) -> Result<CleanupReport> {
        let mut report = CleanupReport {
            size_before_bytes: self.remeasure(db)?,
            ..CleanupReport::default()
        };
        let now = chrono::Utc::now().timestamp_millis();

        for kind in schema::CLEANUP_PRIORITY {
            if !self.above_soft_limit() {
                break;
            }
            let removed = prune_kind(db, kind, now)?;
            if removed > 0 {
                tracing::info!("Retention cleanup removed {removed} {kind} record(s)");
                report.removed.insert(kind, removed);
            }
            self.remeasure(db)?;
        }

        report.size_after_bytes = self.estimated_bytes;
        Ok(report)
    }
}

/// Prune one kind regardless of the current size (used by tests and by the
/// periodic retention sweep)
pub fn prune_kind(db: &Database, kind: RecordKind, now: i64) -> Result<usize> {
    let spec = schema::spec(kind);
    let Some(retention) = spec.retention else {
        return Ok(0);
    };

    let cutoff = now - retention.days * DAY_MS;
    let eligibility = retention
        .eligibility
        .map_or(String::new(), |clause| format!(" AND {clause}"));

    let removed = db.connection().execute(
        &format!(
            "DELETE FROM {} WHERE sync_status = 'synced' AND created_at < ?1{eligibility}",
            spec.table
        ),
        params![cutoff],
    )?;
    Ok(removed)
}

/// Pages in use times page size; freelist pages don't count as live data
fn live_size_bytes(db: &Database) -> Result<u64> {
    let conn = db.connection();
    let page_count: u64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
    let freelist: u64 = conn.query_row("PRAGMA freelist_count", [], |row| row.get(0))?;
    let page_size: u64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
    Ok(page_count.saturating_sub(freelist) * page_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn guard_with_limits(soft: u64, hard: u64) -> (QuotaGuard, Database) {
        let db = Database::open_in_memory().unwrap();
        let config = QuotaConfig {
            soft_limit_bytes: soft,
            hard_limit_bytes: hard,
            measure_interval: Duration::from_secs(0),
        };
        let guard = QuotaGuard::new(config, &db).unwrap();
        (guard, db)
    }

    #[test]
    fn below_soft_limit_is_silent() {
        let (guard, _db) = guard_with_limits(u64::MAX / 2, u64::MAX);
        assert_eq!(guard.ensure_capacity(100).unwrap(), QuotaVerdict::Ok);
    }

    #[test]
    fn soft_limit_warns_with_projection() {
        let (guard, _db) = guard_with_limits(1, u64::MAX);
        match guard.ensure_capacity(10).unwrap() {
            QuotaVerdict::Warn(projected) => {
                assert!(projected >= guard.estimated_bytes());
            }
            QuotaVerdict::Ok => panic!("expected a warning"),
        }
    }

    #[test]
    fn hard_limit_rejects() {
        let (guard, _db) = guard_with_limits(1, 2);
        let err = guard.ensure_capacity(10).unwrap_err();
        assert!(matches!(err, Error::StorageLimitExceeded { .. }));
    }

    #[test]
    fn record_write_grows_estimate() {
        let (mut guard, _db) = guard_with_limits(u64::MAX / 2, u64::MAX);
        let before = guard.estimated_bytes();
        guard.record_write(4096);
        assert_eq!(guard.estimated_bytes(), before + 4096);
    }

    #[test]
    fn remeasure_resets_running_estimate() {
        let (mut guard, db) = guard_with_limits(u64::MAX / 2, u64::MAX);
        guard.record_write(1 << 30);
        let measured = guard.remeasure(&db).unwrap();
        assert!(measured < 1 << 30);
        assert_eq!(guard.estimated_bytes(), measured);
    }

    #[test]
    fn prune_skips_kinds_without_retention() {
        let db = Database::open_in_memory().unwrap();
        let now = chrono::Utc::now().timestamp_millis();
        assert_eq!(prune_kind(&db, RecordKind::Profile, now).unwrap(), 0);
    }
}
