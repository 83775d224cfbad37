//! Coach conversation turn model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::record::{Record, RecordId, RecordKind, SyncMeta};

/// Who produced a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TurnRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(format!("unknown turn role: {other}")),
        }
    }
}

/// One turn in the coaching conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoachConversation {
    pub id: RecordId,
    pub user_id: String,
    pub role: TurnRole,
    pub content: String,
    /// Optional tone tag the coach responded with, e.g. `hype` or `pragmatist`
    pub tone: Option<String>,
    #[serde(flatten)]
    pub meta: SyncMeta,
}

impl CoachConversation {
    #[must_use]
    pub fn new(user_id: impl Into<String>, role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            id: RecordId::new(),
            user_id: user_id.into(),
            role,
            content: content.into(),
            tone: None,
            meta: SyncMeta::new(),
        }
    }

    #[must_use]
    pub fn with_tone(mut self, tone: impl Into<String>) -> Self {
        self.tone = Some(tone.into());
        self
    }
}

impl Record for CoachConversation {
    const KIND: RecordKind = RecordKind::CoachConversation;

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
    fn role_roundtrip() {
        assert_eq!("user".parse::<TurnRole>().unwrap(), TurnRole::User);
        assert_eq!(
            "assistant".parse::<TurnRole>().unwrap(),
            TurnRole::Assistant
        );
        assert!("system".parse::<TurnRole>().is_err());
    }

    #[test]
    fn tone_is_optional() {
        let turn = CoachConversation::new("user-1", TurnRole::Assistant, "You've got this.")
            .with_tone("hype");
        assert_eq!(turn.tone.as_deref(), Some("hype"));
    }
}
