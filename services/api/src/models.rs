//! API and Database Models
//!
//! Request/response bodies for the HTTP surface, with `utoipa` schemas for
//! the OpenAPI document. Score reports reuse the core type and are
//! described here by a mirror schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tutor_core::evaluation::EvaluationRequest;
use utoipa::ToSchema;

/// Length of a roster PIN.
pub const PIN_LENGTH: usize = 4;

#[derive(Serialize, Deserialize, ToSchema, FromRow, Debug, Clone, PartialEq)]
pub struct Student {
    pub name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize, ToSchema, Debug, Clone)]
pub struct StudentPayload {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub pin: Option<String>,
}

/// A roster entry that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    pub name: String,
    pub pin: String,
}

impl StudentPayload {
    /// Normalises the name (trimmed, lowercase) and requires a 4-digit PIN.
    pub fn validate(&self) -> Result<Credentials, String> {
        let name = self
            .name
            .as_deref()
            .map(|n| n.trim().to_lowercase())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| "Missing name".to_string())?;
        let pin = self
            .pin
            .as_deref()
            .map(str::trim)
            .ok_or_else(|| "Missing pin".to_string())?;
        if pin.len() != PIN_LENGTH || !pin.chars().all(|c| c.is_ascii_digit()) {
            return Err("PIN must be 4 digits.".to_string());
        }
        Ok(Credentials {
            name,
            pin: pin.to_string(),
        })
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct StudentList {
    pub data: Vec<Student>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct TokenResponse {
    /// Ephemeral client secret for one realtime session.
    pub value: String,
    pub expires_at: Option<i64>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct AliveResponse {
    pub ok: bool,
    pub message: String,
}

#[derive(Deserialize, ToSchema, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ScorePayload {
    #[serde(default)]
    pub student_name: Option<String>,
    #[serde(default)]
    pub lesson: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub transcript: Option<String>,
}

impl From<ScorePayload> for EvaluationRequest {
    fn from(payload: ScorePayload) -> Self {
        let or = |v: Option<String>, default: &str| {
            v.filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        EvaluationRequest {
            student_name: or(payload.student_name, "Student"),
            level: or(payload.level, "Unknown"),
            lesson: or(payload.lesson, "Unknown"),
            transcript: payload.transcript.unwrap_or_default(),
        }
    }
}

/// OpenAPI mirror of `tutor_core::report::ScoreReport`.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct ScoreReportSchema {
    pub student: String,
    pub level: String,
    pub lesson: String,
    pub scores: ScoresSchema,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub corrected_sentences: Vec<CorrectedPairSchema>,
    pub homework: String,
}

#[derive(ToSchema)]
#[allow(dead_code)]
pub struct ScoresSchema {
    #[schema(minimum = 1, maximum = 5)]
    pub pronunciation: u8,
    #[schema(minimum = 1, maximum = 5)]
    pub grammar: u8,
    #[schema(minimum = 1, maximum = 5)]
    pub fluency: u8,
    #[schema(minimum = 1, maximum = 5)]
    pub confidence: u8,
}

#[derive(ToSchema)]
#[allow(dead_code)]
pub struct CorrectedPairSchema {
    pub student_said: String,
    pub better: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct ErrorResponse {
    pub message: String,
}
