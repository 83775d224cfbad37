//! User profile model

use serde::{Deserialize, Serialize};

use super::record::{Record, RecordId, RecordKind, SyncMeta};

/// The single per-user profile record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: RecordId,
    pub user_id: String,
    pub display_name: String,
    /// Short self-description shown on the home screen
    pub headline: Option<String>,
    /// When the layoff happened (Unix ms); drives plan day numbering
    pub layoff_date: Option<i64>,
    #[serde(flatten)]
    pub meta: SyncMeta,
}

impl Profile {
    #[must_use]
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: RecordId::new(),
            user_id: user_id.into(),
            display_name: display_name.into(),
            headline: None,
            layoff_date: None,
            meta: SyncMeta::new(),
        }
    }

    #[must_use]
    pub fn with_layoff_date(mut self, at: i64) -> Self {
        self.layoff_date = Some(at);
        self
    }
}

impl Record for Profile {
    const KIND: RecordKind = RecordKind::Profile;

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
    use crate::models::record::SyncStatus;

    #[test]
    fn new_profile_is_pending() {
        let profile = Profile::new("user-1", "Alex");
        assert_eq!(profile.meta.sync_status, SyncStatus::Pending);
        assert!(profile.layoff_date.is_none());
    }

    #[test]
    fn serde_flattens_sync_meta() {
        let profile = Profile::new("user-1", "Alex");
        let value = serde_json::to_value(&profile).unwrap();
        assert_eq!(value["sync_status"], "pending");
        assert!(value["created_at"].is_i64());
    }
}
