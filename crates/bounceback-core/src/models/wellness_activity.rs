//! Wellness activity model

use serde::{Deserialize, Serialize};

use super::record::{Record, RecordId, RecordKind, SyncMeta};

/// A logged wellness activity (walk, meditation, workout, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellnessActivity {
    pub id: RecordId,
    pub user_id: String,
    /// Free-form activity name, e.g. `walk` or `meditation`
    pub activity_kind: String,
    pub duration_minutes: i64,
    /// When the activity happened (Unix ms)
    pub occurred_at: i64,
    pub notes: Option<String>,
    #[serde(flatten)]
    pub meta: SyncMeta,
}

impl WellnessActivity {
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        activity_kind: impl Into<String>,
        duration_minutes: i64,
    ) -> Self {
        Self {
            id: RecordId::new(),
            user_id: user_id.into(),
            activity_kind: activity_kind.into(),
            duration_minutes,
            occurred_at: chrono::Utc::now().timestamp_millis(),
            notes: None,
            meta: SyncMeta::new(),
        }
    }
}

impl Record for WellnessActivity {
    const KIND: RecordKind = RecordKind::WellnessActivity;

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
