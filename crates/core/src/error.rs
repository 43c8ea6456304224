//! Error taxonomy shared by every layer of the tutor.
//!
//! Policy rejections (`AlreadyActive`, `DailyLimit`) and user-correctable
//! conditions (`TranscriptTooShort`) live alongside real failures so callers
//! can match on a single enum, but only the failure variants are logged at
//! `error` level by the runtimes.

use chrono::NaiveDate;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A required secret or setting is missing. Never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// A remote service (credential issuer, negotiation, evaluation) answered
    /// with a non-success status or could not be reached.
    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    /// A payload failed validation and was not applied.
    #[error("validation error: {0}")]
    Validation(String),

    /// Microphone unavailable or refused.
    #[error("permission error: {0}")]
    Permission(String),

    #[error("a session is already active")]
    AlreadyActive,

    #[error("today's session for '{student}' was already used ({date})")]
    DailyLimit { student: String, date: NaiveDate },

    #[error("transcript too short ({len} < {min} characters)")]
    TranscriptTooShort { len: usize, min: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionError {
    /// Policy rejections are expected outcomes, not failures.
    pub fn is_policy_rejection(&self) -> bool {
        matches!(
            self,
            SessionError::AlreadyActive
                | SessionError::DailyLimit { .. }
                | SessionError::TranscriptTooShort { .. }
        )
    }
}

/// Failures of a [`crate::progress::ProgressStore`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("progress store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("progress document is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("progress store lock poisoned")]
    Poisoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SessionError::Upstream {
            status: 401,
            message: "bad key".to_string(),
        };
        assert_eq!(err.to_string(), "upstream error (401): bad key");

        let err = SessionError::TranscriptTooShort { len: 5, min: 20 };
        assert_eq!(err.to_string(), "transcript too short (5 < 20 characters)");
    }

    #[test]
    fn test_policy_rejections() {
        assert!(SessionError::AlreadyActive.is_policy_rejection());
        assert!(
            SessionError::DailyLimit {
                student: "ali".into(),
                date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            }
            .is_policy_rejection()
        );
        assert!(!SessionError::Config("missing".into()).is_policy_rejection());
    }
}
