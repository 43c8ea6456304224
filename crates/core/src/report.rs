//! The structured speaking-score report and its bounds.

use crate::error::SessionError;
use serde::{Deserialize, Serialize};

pub const SCORE_MIN: u8 = 1;
pub const SCORE_MAX: u8 = 5;
pub const STRENGTHS_RANGE: (usize, usize) = (2, 4);
pub const IMPROVEMENTS_RANGE: (usize, usize) = (2, 5);
pub const MAX_CORRECTIONS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scores {
    pub pronunciation: u8,
    pub grammar: u8,
    pub fluency: u8,
    pub confidence: u8,
}

impl Scores {
    pub fn values(&self) -> [u8; 4] {
        [
            self.pronunciation,
            self.grammar,
            self.fluency,
            self.confidence,
        ]
    }

    pub fn average(&self) -> f64 {
        self.values().iter().map(|&v| f64::from(v)).sum::<f64>() / 4.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectedPair {
    pub student_said: String,
    pub better: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    #[serde(default)]
    pub student: String,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub lesson: String,
    pub scores: Scores,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    #[serde(default, rename = "corrected_sentences")]
    pub corrected_pairs: Vec<CorrectedPair>,
    pub homework: String,
}

impl ScoreReport {
    /// Checks every bound of the report schema.
    pub fn validate(&self) -> Result<(), SessionError> {
        for (name, value) in [
            ("pronunciation", self.scores.pronunciation),
            ("grammar", self.scores.grammar),
            ("fluency", self.scores.fluency),
            ("confidence", self.scores.confidence),
        ] {
            if !(SCORE_MIN..=SCORE_MAX).contains(&value) {
                return Err(SessionError::Validation(format!(
                    "score '{}' out of range: {}",
                    name, value
                )));
            }
        }
        check_len("strengths", self.strengths.len(), STRENGTHS_RANGE)?;
        check_len("improvements", self.improvements.len(), IMPROVEMENTS_RANGE)?;
        check_len(
            "corrected_sentences",
            self.corrected_pairs.len(),
            (0, MAX_CORRECTIONS),
        )?;
        Ok(())
    }

    /// Fills identity fields the evaluator left blank.
    pub fn fill_defaults(&mut self, student: &str, level: &str, lesson: &str) {
        if self.student.trim().is_empty() {
            self.student = if student.trim().is_empty() {
                "Student".to_string()
            } else {
                student.to_string()
            };
        }
        if self.level.trim().is_empty() {
            self.level = level.to_string();
        }
        if self.lesson.trim().is_empty() {
            self.lesson = lesson.to_string();
        }
    }

    /// Parses and validates a report from raw evaluator output.
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        let report: ScoreReport = serde_json::from_str(raw.trim())
            .map_err(|e| SessionError::Validation(format!("malformed score report: {}", e)))?;
        report.validate()?;
        Ok(report)
    }
}

fn check_len(field: &str, len: usize, (min, max): (usize, usize)) -> Result<(), SessionError> {
    if len < min || len > max {
        return Err(SessionError::Validation(format!(
            "'{}' must have {}..={} items, got {}",
            field, min, max, len
        )));
    }
    Ok(())
}
