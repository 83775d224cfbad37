//! Schema descriptions and per-kind capabilities
//!
//! Each record kind declares an explicit table description (column name,
//! type, nullability, indexed flag) plus a small set of capabilities:
//! a validation function over the JSON column map, the columns encrypted at
//! rest, and an optional retention window. The migration runner and the
//! store's read/write mapping both consume these descriptions, so there is
//! no annotation or reflection mechanism anywhere.

use serde_json::{Map, Value};

use crate::models::{RecordKind, MOOD_SCORE_RANGE};
use crate::queue::QueuePriority;

/// JSON column map a record serializes to and from
pub type ColumnMap = Map<String, Value>;

/// SQLite storage class for a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
}

impl ColumnType {
    const fn sql(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Integer => "INTEGER",
        }
    }
}

/// One column in a record table
#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
    pub indexed: bool,
}

impl Column {
    const fn required(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: false,
            indexed: false,
        }
    }

    const fn optional(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: true,
            indexed: false,
        }
    }

    const fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }
}

/// Sync metadata columns shared by every record table.
///
/// `id` is handled separately as the primary key.
pub const META_COLUMNS: [Column; 5] = [
    Column::required("user_id", ColumnType::Text).indexed(),
    Column::required("created_at", ColumnType::Integer),
    Column::required("updated_at", ColumnType::Integer),
    Column::required("sync_status", ColumnType::Text).indexed(),
    Column::optional("last_synced_at", ColumnType::Integer),
];

/// Retention window for synced historical records
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    /// Age past which a synced record may be pruned
    pub days: i64,
    /// Extra SQL predicate a row must satisfy to be prunable
    pub eligibility: Option<&'static str>,
}

/// Validation over the serialized column map; returns a human-readable
/// description of the first violation
pub type ValidateFn = fn(&ColumnMap) -> Result<(), String>;

/// Everything the store and migration runner need to know about one kind
pub struct KindSpec {
    pub kind: RecordKind,
    /// Stable table name
    pub table: &'static str,
    /// Kind-specific columns, excluding `id` and the shared metadata columns
    pub fields: &'static [Column],
    /// Compound uniqueness constraint, if any
    pub unique: Option<&'static [&'static str]>,
    /// Columns encrypted at rest (stored as base64 TEXT)
    pub encrypted: &'static [&'static str],
    pub retention: Option<RetentionPolicy>,
    /// Queue tier for this kind's server-bound intents
    pub priority: QueuePriority,
    pub validate: ValidateFn,
}

impl KindSpec {
    /// All columns after `id`, metadata first
    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        META_COLUMNS.iter().chain(self.fields.iter())
    }

    /// Whether the named column is encrypted at rest
    pub fn is_encrypted(&self, column: &str) -> bool {
        self.encrypted.contains(&column)
    }

    /// `CREATE TABLE` statement for this kind
    pub fn create_table_sql(&self) -> String {
        let mut cols = vec!["id TEXT PRIMARY KEY".to_string()];
        for col in self.columns() {
            // Encrypted columns hold base64 ciphertext regardless of the
            // declared value type.
            let ty = if self.is_encrypted(col.name) {
                ColumnType::Text
            } else {
                col.ty
            };
            let not_null = if col.nullable { "" } else { " NOT NULL" };
            cols.push(format!("{} {}{}", col.name, ty.sql(), not_null));
        }
        if let Some(unique) = self.unique {
            cols.push(format!("UNIQUE ({})", unique.join(", ")));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            self.table,
            cols.join(",\n    ")
        )
    }

    /// `CREATE INDEX` statements for every indexed column
    pub fn create_index_sql(&self) -> Vec<String> {
        self.columns()
            .filter(|col| col.indexed)
            .map(|col| {
                format!(
                    "CREATE INDEX IF NOT EXISTS idx_{table}_{col} ON {table}({col})",
                    table = self.table,
                    col = col.name
                )
            })
            .collect()
    }
}

fn require_string<'a>(map: &'a ColumnMap, key: &str) -> Result<&'a str, String> {
    map.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("{key} must be a string"))
}

fn validate_profile(_map: &ColumnMap) -> Result<(), String> {
    Ok(())
}

fn validate_job_application(map: &ColumnMap) -> Result<(), String> {
    let status = require_string(map, "status")?;
    status
        .parse::<crate::models::ApplicationStatus>()
        .map(|_| ())
}

fn validate_budget_entry(map: &ColumnMap) -> Result<(), String> {
    let kind = require_string(map, "entry_kind")?;
    kind.parse::<crate::models::EntryKind>()?;
    if map.get("amount_cents").and_then(Value::as_i64).is_none() {
        return Err("amount_cents must be an integer".to_string());
    }
    Ok(())
}

fn validate_mood_entry(map: &ColumnMap) -> Result<(), String> {
    let score = map
        .get("score")
        .and_then(Value::as_i64)
        .ok_or_else(|| "score must be an integer".to_string())?;
    if !MOOD_SCORE_RANGE.contains(&score) {
        return Err(format!(
            "score {score} outside range {}..={}",
            MOOD_SCORE_RANGE.start(),
            MOOD_SCORE_RANGE.end()
        ));
    }
    Ok(())
}

fn validate_bounce_plan_task(map: &ColumnMap) -> Result<(), String> {
    let completed = map.get("completed_at").is_some_and(|v| !v.is_null());
    let skipped = map.get("skipped_at").is_some_and(|v| !v.is_null());
    if completed && skipped {
        return Err("completed_at and skipped_at are mutually exclusive".to_string());
    }
    Ok(())
}

fn validate_coach_conversation(map: &ColumnMap) -> Result<(), String> {
    let role = require_string(map, "role")?;
    role.parse::<crate::models::TurnRole>().map(|_| ())
}

fn validate_wellness_activity(map: &ColumnMap) -> Result<(), String> {
    let minutes = map
        .get("duration_minutes")
        .and_then(Value::as_i64)
        .ok_or_else(|| "duration_minutes must be an integer".to_string())?;
    if minutes < 0 {
        return Err("duration_minutes cannot be negative".to_string());
    }
    Ok(())
}

static PROFILE: KindSpec = KindSpec {
    kind: RecordKind::Profile,
    table: "profiles",
    fields: &[
        Column::required("display_name", ColumnType::Text),
        Column::optional("headline", ColumnType::Text),
        Column::optional("layoff_date", ColumnType::Integer),
    ],
    unique: None,
    encrypted: &[],
    retention: None,
    priority: QueuePriority::High,
    validate: validate_profile,
};

static JOB_APPLICATION: KindSpec = KindSpec {
    kind: RecordKind::JobApplication,
    table: "job_applications",
    fields: &[
        Column::required("company", ColumnType::Text),
        Column::required("position", ColumnType::Text),
        Column::required("status", ColumnType::Text).indexed(),
        Column::optional("applied_at", ColumnType::Integer),
        Column::optional("notes", ColumnType::Text),
    ],
    unique: None,
    encrypted: &[],
    retention: None,
    priority: QueuePriority::Normal,
    validate: validate_job_application,
};

static BUDGET_ENTRY: KindSpec = KindSpec {
    kind: RecordKind::BudgetEntry,
    table: "budget_entries",
    fields: &[
        Column::required("category", ColumnType::Text),
        Column::required("amount_cents", ColumnType::Integer),
        Column::required("entry_kind", ColumnType::Text),
        Column::required("occurred_at", ColumnType::Integer),
    ],
    unique: None,
    encrypted: &["amount_cents"],
    retention: None,
    priority: QueuePriority::High,
    validate: validate_budget_entry,
};

static MOOD_ENTRY: KindSpec = KindSpec {
    kind: RecordKind::MoodEntry,
    table: "mood_entries",
    fields: &[
        Column::required("score", ColumnType::Integer),
        Column::optional("note", ColumnType::Text),
        Column::required("logged_at", ColumnType::Integer),
    ],
    unique: None,
    encrypted: &[],
    retention: Some(RetentionPolicy {
        days: 365,
        eligibility: None,
    }),
    priority: QueuePriority::Normal,
    validate: validate_mood_entry,
};

static BOUNCE_PLAN_TASK: KindSpec = KindSpec {
    kind: RecordKind::BouncePlanTask,
    table: "bounce_plan_tasks",
    fields: &[
        Column::required("task_id", ColumnType::Text).indexed(),
        Column::optional("completed_at", ColumnType::Integer),
        Column::optional("skipped_at", ColumnType::Integer),
        Column::optional("notes", ColumnType::Text),
    ],
    unique: Some(&["user_id", "task_id"]),
    encrypted: &[],
    retention: Some(RetentionPolicy {
        days: 60,
        eligibility: Some("(completed_at IS NOT NULL OR skipped_at IS NOT NULL)"),
    }),
    priority: QueuePriority::Normal,
    validate: validate_bounce_plan_task,
};

static COACH_CONVERSATION: KindSpec = KindSpec {
    kind: RecordKind::CoachConversation,
    table: "coach_conversations",
    fields: &[
        Column::required("role", ColumnType::Text),
        Column::required("content", ColumnType::Text),
        Column::optional("tone", ColumnType::Text),
    ],
    unique: None,
    encrypted: &[],
    retention: Some(RetentionPolicy {
        days: 90,
        eligibility: None,
    }),
    priority: QueuePriority::Low,
    validate: validate_coach_conversation,
};

static WELLNESS_ACTIVITY: KindSpec = KindSpec {
    kind: RecordKind::WellnessActivity,
    table: "wellness_activities",
    fields: &[
        Column::required("activity_kind", ColumnType::Text),
        Column::required("duration_minutes", ColumnType::Integer),
        Column::required("occurred_at", ColumnType::Integer),
        Column::optional("notes", ColumnType::Text),
    ],
    unique: None,
    encrypted: &[],
    retention: Some(RetentionPolicy {
        days: 365,
        eligibility: None,
    }),
    priority: QueuePriority::Low,
    validate: validate_wellness_activity,
};

/// Capability lookup for a record kind
pub fn spec(kind: RecordKind) -> &'static KindSpec {
    match kind {
        RecordKind::Profile => &PROFILE,
        RecordKind::JobApplication => &JOB_APPLICATION,
        RecordKind::BudgetEntry => &BUDGET_ENTRY,
        RecordKind::MoodEntry => &MOOD_ENTRY,
        RecordKind::BouncePlanTask => &BOUNCE_PLAN_TASK,
        RecordKind::CoachConversation => &COACH_CONVERSATION,
        RecordKind::WellnessActivity => &WELLNESS_ACTIVITY,
    }
}

/// Kinds eligible for retention pruning, highest priority first
pub const CLEANUP_PRIORITY: [RecordKind; 4] = [
    RecordKind::CoachConversation,
    RecordKind::BouncePlanTask,
    RecordKind::MoodEntry,
    RecordKind::WellnessActivity,
];

/// Structural check of a column map against the schema: required columns
/// present, value types matching. `partial` relaxes presence checks for
/// patch updates.
pub fn check_columns(spec: &KindSpec, map: &ColumnMap, partial: bool) -> Result<(), String> {
    for col in spec.columns() {
        match map.get(col.name) {
            None => {
                if !col.nullable && !partial {
                    return Err(format!("missing required column {}", col.name));
                }
            }
            Some(Value::Null) => {
                if !col.nullable {
                    return Err(format!("column {} cannot be null", col.name));
                }
            }
            Some(value) => {
                let ok = match col.ty {
                    ColumnType::Text => value.is_string(),
                    ColumnType::Integer => value.is_i64() || value.is_u64() || value.is_boolean(),
                };
                if !ok {
                    return Err(format!("column {} has the wrong type", col.name));
                }
            }
        }
    }
    Ok(())
}
