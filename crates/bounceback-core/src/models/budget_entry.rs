//! Budget entry model
//!
//! `amount_cents` is plaintext in memory; the store encrypts that column at
//! rest (see the schema's encrypted-column capability).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::record::{Record, RecordId, RecordKind, SyncMeta};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Income,
    Expense,
}

impl EntryKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "income" => Ok(Self::Income),
            "expense" => Ok(Self::Expense),
            other => Err(format!("unknown entry kind: {other}")),
        }
    }
}

/// A single income or expense line in the runway budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetEntry {
    pub id: RecordId,
    pub user_id: String,
    pub category: String,
    /// Amount in cents; encrypted at rest
    pub amount_cents: i64,
    pub entry_kind: EntryKind,
    /// When the income/expense occurred (Unix ms)
    pub occurred_at: i64,
    #[serde(flatten)]
    pub meta: SyncMeta,
}

impl BudgetEntry {
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        category: impl Into<String>,
        amount_cents: i64,
        entry_kind: EntryKind,
    ) -> Self {
        Self {
            id: RecordId::new(),
            user_id: user_id.into(),
            category: category.into(),
            amount_cents,
            entry_kind,
            occurred_at: chrono::Utc::now().timestamp_millis(),
            meta: SyncMeta::new(),
        }
    }
}

impl Record for BudgetEntry {
    const KIND: RecordKind = RecordKind::BudgetEntry;

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
    fn entry_kind_roundtrip() {
        assert_eq!("income".parse::<EntryKind>().unwrap(), EntryKind::Income);
        assert_eq!("expense".parse::<EntryKind>().unwrap(), EntryKind::Expense);
        assert!("transfer".parse::<EntryKind>().is_err());
    }

    #[test]
    fn amount_survives_serde() {
        let entry = BudgetEntry::new("user-1", "groceries", 12_550, EntryKind::Expense);
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["amount_cents"], 12_550);
        let back: BudgetEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back.amount_cents, 12_550);
    }
}
