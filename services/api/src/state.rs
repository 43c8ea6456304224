//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the server-side
//! services every handler needs.

use crate::{config::Config, db::RosterStore};
use async_trait::async_trait;
use openai_realtime::CredentialProvider;
use std::sync::Arc;
use tutor_core::{
    SessionError,
    evaluation::{EvaluationRequest, Evaluator},
    report::ScoreReport,
};

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub credentials: Arc<dyn CredentialProvider>,
    pub evaluator: Arc<dyn Evaluator>,
    pub roster: Arc<dyn RosterStore>,
    pub config: Arc<Config>,
}

/// Stands in for the evaluator when no server secret is configured.
pub struct UnconfiguredEvaluator;

#[async_trait]
impl Evaluator for UnconfiguredEvaluator {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<ScoreReport, SessionError> {
        request.check_length()?;
        Err(SessionError::Config("OPENAI_API_KEY is not set".to_string()))
    }
}
