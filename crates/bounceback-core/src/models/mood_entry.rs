//! Daily mood log model

use serde::{Deserialize, Serialize};

use super::record::{Record, RecordId, RecordKind, SyncMeta};

/// Valid range for a mood score, inclusive
pub const MOOD_SCORE_RANGE: std::ops::RangeInclusive<i64> = 1..=5;

/// One mood check-in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodEntry {
    pub id: RecordId,
    pub user_id: String,
    /// Self-reported score, 1 (low) to 5 (high)
    pub score: i64,
    pub note: Option<String>,
    /// When the mood was logged (Unix ms)
    pub logged_at: i64,
    #[serde(flatten)]
    pub meta: SyncMeta,
}

impl MoodEntry {
    #[must_use]
    pub fn new(user_id: impl Into<String>, score: i64) -> Self {
        Self {
            id: RecordId::new(),
            user_id: user_id.into(),
            score,
            note: None,
            logged_at: chrono::Utc::now().timestamp_millis(),
            meta: SyncMeta::new(),
        }
    }

    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Whether the score is inside the accepted range
    #[must_use]
    pub fn score_in_range(&self) -> bool {
        MOOD_SCORE_RANGE.contains(&self.score)
    }
}

impl Record for MoodEntry {
    const KIND: RecordKind = RecordKind::MoodEntry;

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
