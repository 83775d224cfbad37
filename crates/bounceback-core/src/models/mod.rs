//! Data models for Bounceback

mod bounce_plan_task;
mod budget_entry;
mod coach_conversation;
mod job_application;
mod mood_entry;
mod profile;
mod record;
mod wellness_activity;

pub use bounce_plan_task::BouncePlanTask;
pub use budget_entry::{BudgetEntry, EntryKind};
pub use coach_conversation::{CoachConversation, TurnRole};
pub use job_application::{ApplicationStatus, JobApplication};
pub use mood_entry::{MoodEntry, MOOD_SCORE_RANGE};
pub use profile::Profile;
pub use record::{Record, RecordId, RecordKind, SyncMeta, SyncStatus};
pub use wellness_activity::WellnessActivity;
