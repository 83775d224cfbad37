//! Job application tracking model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::record::{Record, RecordId, RecordKind, SyncMeta};

/// Pipeline stage of a tracked application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Saved,
    Applied,
    Interviewing,
    Offer,
    Rejected,
    Withdrawn,
}

impl ApplicationStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Saved => "saved",
            Self::Applied => "applied",
            Self::Interviewing => "interviewing",
            Self::Offer => "offer",
            Self::Rejected => "rejected",
            Self::Withdrawn => "withdrawn",
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "saved" => Ok(Self::Saved),
            "applied" => Ok(Self::Applied),
            "interviewing" => Ok(Self::Interviewing),
            "offer" => Ok(Self::Offer),
            "rejected" => Ok(Self::Rejected),
            "withdrawn" => Ok(Self::Withdrawn),
            other => Err(format!("unknown application status: {other}")),
        }
    }
}

/// A job application the user is tracking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobApplication {
    pub id: RecordId,
    pub user_id: String,
    pub company: String,
    pub position: String,
    pub status: ApplicationStatus,
    /// When the application was submitted (Unix ms)
    pub applied_at: Option<i64>,
    pub notes: Option<String>,
    #[serde(flatten)]
    pub meta: SyncMeta,
}

impl JobApplication {
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        company: impl Into<String>,
        position: impl Into<String>,
    ) -> Self {
        Self {
            id: RecordId::new(),
            user_id: user_id.into(),
            company: company.into(),
            position: position.into(),
            status: ApplicationStatus::Saved,
            applied_at: None,
            notes: None,
            meta: SyncMeta::new(),
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: ApplicationStatus) -> Self {
        self.status = status;
        self
    }
}

impl Record for JobApplication {
    const KIND: RecordKind = RecordKind::JobApplication;

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
    fn status_name_roundtrip() {
        for status in [
            ApplicationStatus::Saved,
            ApplicationStatus::Applied,
            ApplicationStatus::Interviewing,
            ApplicationStatus::Offer,
            ApplicationStatus::Rejected,
            ApplicationStatus::Withdrawn,
        ] {
            let parsed: ApplicationStatus = status.as_str().parse().unwrap();
            assert_eq!(status, parsed);
        }
    }

    #[test]
    fn new_application_starts_saved() {
        let app = JobApplication::new("user-1", "Acme", "Backend Engineer");
        assert_eq!(app.status, ApplicationStatus::Saved);
        assert!(app.applied_at.is_none());
    }

    #[test]
    fn status_serializes_snake_case() {
        let app = JobApplication::new("user-1", "Acme", "Backend Engineer")
            .with_status(ApplicationStatus::Interviewing);
        let value = serde_json::to_value(&app).unwrap();
        assert_eq!(value["status"], "interviewing");
    }
}
