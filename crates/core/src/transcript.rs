//! Append-only transcript of a tutoring session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Tutor,
    Student,
    System,
}

impl Role {
    /// Prefix used when the transcript is rendered for evaluation.
    pub fn tag(self) -> &'static str {
        match self {
            Role::Tutor => "AI",
            Role::Student => "STUDENT",
            Role::System => "SYSTEM",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Ordered turns of one session. Once frozen, appends are refused.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptLog {
    turns: Vec<Turn>,
    frozen: bool,
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a turn. Blank text is skipped; returns whether a turn was added.
    pub fn append(&mut self, role: Role, text: &str, timestamp: DateTime<Utc>) -> bool {
        let text = text.trim();
        if self.frozen || text.is_empty() {
            return false;
        }
        self.turns.push(Turn {
            role,
            text: text.to_string(),
            timestamp,
        });
        true
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// One `ROLE: text` line per turn, in append order.
    pub fn render(&self) -> String {
        self.turns
            .iter()
            .map(|t| format!("{}: {}", t.role.tag(), t.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
