//! Bounce plan task model
//!
//! Tasks are keyed by `(user_id, task_id)` where `task_id` names a step in
//! the canonical 30-day plan. Completion state is tri-state: pending when
//! neither timestamp is set, completed or skipped when exactly one is.

use serde::{Deserialize, Serialize};

use super::record::{Record, RecordId, RecordKind, SyncMeta};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BouncePlanTask {
    pub id: RecordId,
    pub user_id: String,
    /// Plan step identifier, e.g. `day3_network_map`
    pub task_id: String,
    /// Set when the user finished the task (Unix ms); exclusive with `skipped_at`
    pub completed_at: Option<i64>,
    /// Set when the user skipped the task (Unix ms); exclusive with `completed_at`
    pub skipped_at: Option<i64>,
    pub notes: Option<String>,
    #[serde(flatten)]
    pub meta: SyncMeta,
}

impl BouncePlanTask {
    #[must_use]
    pub fn new(user_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            id: RecordId::new(),
            user_id: user_id.into(),
            task_id: task_id.into(),
            completed_at: None,
            skipped_at: None,
            notes: None,
            meta: SyncMeta::new(),
        }
    }

    /// Mark the task completed, clearing any skip
    pub fn complete(&mut self, at: i64) {
        self.completed_at = Some(at);
        self.skipped_at = None;
    }

    /// Mark the task skipped, clearing any completion
    pub fn skip(&mut self, at: i64) {
        self.skipped_at = Some(at);
        self.completed_at = None;
    }

    /// Reset to the pending state
    pub fn reopen(&mut self) {
        self.completed_at = None;
        self.skipped_at = None;
    }

    /// True unless both exclusivity timestamps are set
    #[must_use]
    pub const fn state_is_consistent(&self) -> bool {
        !(self.completed_at.is_some() && self.skipped_at.is_some())
    }

    /// Whether the task is still open
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.completed_at.is_none() && self.skipped_at.is_none()
    }
}

impl Record for BouncePlanTask {
    const KIND: RecordKind = RecordKind::BouncePlanTask;

    fn id(&self) -> RecordId {
        self.id
    }

    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_is_pending() {
        let task = BouncePlanTask::new("user-1", "day1_breathe");
        assert!(task.is_pending());
        assert!(task.state_is_consistent());
    }

    #[test]
    fn complete_clears_skip() {
        let mut task = BouncePlanTask::new("user-1", "day2_routine");
        task.skip(1_000);
        task.complete(2_000);
        assert_eq!(task.completed_at, Some(2_000));
        assert!(task.skipped_at.is_none());
        assert!(task.state_is_consistent());
    }

    #[test]
    fn skip_clears_complete() {
        let mut task = BouncePlanTask::new("user-1", "day2_routine");
        task.complete(1_000);
        task.skip(2_000);
        assert_eq!(task.skipped_at, Some(2_000));
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn reopen_resets_both() {
        let mut task = BouncePlanTask::new("user-1", "day4_reach_out");
        task.complete(1_000);
        task.reopen();
        assert!(task.is_pending());
    }
}
