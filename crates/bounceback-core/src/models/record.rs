//! Record identity and sync metadata shared by every record kind

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A unique identifier for a record, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Create a new unique record ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The typed record kinds the store persists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Profile,
    JobApplication,
    BudgetEntry,
    MoodEntry,
    BouncePlanTask,
    CoachConversation,
    WellnessActivity,
}

impl RecordKind {
    /// Every kind, in schema declaration order
    pub const ALL: [Self; 7] = [
        Self::Profile,
        Self::JobApplication,
        Self::BudgetEntry,
        Self::MoodEntry,
        Self::BouncePlanTask,
        Self::CoachConversation,
        Self::WellnessActivity,
    ];

    /// Stable lowercase name used in queue rows, cursors, and wire payloads
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::JobApplication => "job_application",
            Self::BudgetEntry => "budget_entry",
            Self::MoodEntry => "mood_entry",
            Self::BouncePlanTask => "bounce_plan_task",
            Self::CoachConversation => "coach_conversation",
            Self::WellnessActivity => "wellness_activity",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "profile" => Ok(Self::Profile),
            "job_application" => Ok(Self::JobApplication),
            "budget_entry" => Ok(Self::BudgetEntry),
            "mood_entry" => Ok(Self::MoodEntry),
            "bounce_plan_task" => Ok(Self::BouncePlanTask),
            "coach_conversation" => Ok(Self::CoachConversation),
            "wellness_activity" => Ok(Self::WellnessActivity),
            other => Err(format!("unknown record kind: {other}")),
        }
    }
}

/// Synchronization state of a single record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Local changes not yet confirmed by the server
    #[default]
    Pending,
    /// Matches the server-confirmed state
    Synced,
    /// Push abandoned after exhausting retries
    Failed,
    /// Local and remote diverged; awaiting manual resolution
    Conflicted,
}

impl SyncStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Failed => "failed",
            Self::Conflicted => "conflicted",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sync metadata carried by every persisted record, flattened into each model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMeta {
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last local mutation timestamp (Unix ms)
    pub updated_at: i64,
    /// Current sync state
    pub sync_status: SyncStatus,
    /// Timestamp of the last successful reconciliation, if any (Unix ms)
    pub last_synced_at: Option<i64>,
}

impl SyncMeta {
    /// Metadata for a freshly created local record
    #[must_use]
    pub fn new() -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::Pending,
            last_synced_at: None,
        }
    }

    /// Refresh `updated_at` and drop back to pending after a local mutation
    pub fn mark_modified(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp_millis();
        self.sync_status = SyncStatus::Pending;
    }

    /// Record a successful reconciliation with the server
    pub fn mark_synced(&mut self, at: i64) {
        self.sync_status = SyncStatus::Synced;
        self.last_synced_at = Some(at);
    }
}

impl Default for SyncMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// A typed record the store can persist.
///
/// Models flatten a [`SyncMeta`] so their serde column map lines up with the
/// table schema declared for their kind.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + 'static {
    /// The kind this model persists as
    const KIND: RecordKind;

    /// Immutable record identifier
    fn id(&self) -> RecordId;

    /// Sync metadata (read)
    fn meta(&self) -> &SyncMeta;

    /// Sync metadata (write; used by the store and sync engine)
    fn meta_mut(&mut self) -> &mut SyncMeta;
}
