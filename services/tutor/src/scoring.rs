//! Post-session scoring: submit the transcript for evaluation and record
//! the validated report in the student's progress.

use crate::runtime::SessionSummary;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use tutor_core::{
    SessionError,
    clock::Clock,
    evaluation::{EvaluationRequest, Evaluator},
    progress::{ProgressStore, ScoreRecord, StudentId},
};

/// Builds the evaluation request for a finished session.
pub fn request_for(summary: &SessionSummary) -> EvaluationRequest {
    EvaluationRequest {
        student_name: summary.session.student_name.clone(),
        level: summary.session.level.to_string(),
        lesson: summary.session.lesson.to_string(),
        transcript: summary.transcript.render(),
    }
}

pub struct ScoringRequestor {
    evaluator: Arc<dyn Evaluator>,
    store: Arc<dyn ProgressStore>,
    clock: Arc<dyn Clock>,
}

impl ScoringRequestor {
    pub fn new(
        evaluator: Arc<dyn Evaluator>,
        store: Arc<dyn ProgressStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            evaluator,
            store,
            clock,
        }
    }

    /// Evaluates `request` and, only if the report is valid, appends it to
    /// the student's history and updates streak and best average.
    ///
    /// Short transcripts are rejected before any network call.
    #[instrument(skip_all, fields(student = %student))]
    pub async fn submit(
        &self,
        student: &StudentId,
        request: EvaluationRequest,
    ) -> Result<ScoreRecord, SessionError> {
        request.check_length()?;

        let mut report = self.evaluator.evaluate(&request).await.inspect_err(|e| {
            warn!(error = %e, "Evaluation failed");
        })?;
        report.fill_defaults(&request.student_name, &request.level, &request.lesson);
        report.validate()?;

        let now = self.clock.now();
        let record = self
            .store
            .update(student, |progress| {
                Ok::<_, SessionError>(progress.record_report(report, now).clone())
            })?;
        info!(average = record.report.scores.average(), "Score recorded");
        Ok(record)
    }
}
