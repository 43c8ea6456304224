//! Proficiency levels and the pacing/vocabulary profile each one implies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    #[default]
    Beginner,
    Medium,
    Advanced,
}

/// How the tutor should pace and word its speech for a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelProfile {
    pub label: &'static str,
    pub speed: &'static str,
    pub vocabulary: &'static str,
}

impl Level {
    pub fn profile(self) -> LevelProfile {
        match self {
            Level::Beginner => LevelProfile {
                label: "Beginner",
                speed: "slow",
                vocabulary: "very simple everyday words and short sentences",
            },
            Level::Medium => LevelProfile {
                label: "Medium",
                speed: "slow-medium",
                vocabulary: "common words, short follow-up questions, balanced answers",
            },
            Level::Advanced => LevelProfile {
                label: "Advanced",
                speed: "normal",
                vocabulary: "natural vocabulary, encourage long answers and opinions",
            },
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.profile().label)
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "beginner" => Ok(Level::Beginner),
            "medium" => Ok(Level::Medium),
            "advanced" => Ok(Level::Advanced),
            other => Err(format!("unknown level '{}'", other)),
        }
    }
}
