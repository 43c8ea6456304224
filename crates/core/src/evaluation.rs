//! Speaking evaluation service.
//!
//! The evaluator turns a finished transcript into a [`ScoreReport`]. The
//! production implementation asks an OpenAI-compatible chat model for a
//! strict JSON-schema response; the scoring requestor on the client talks
//! to it through the HTTP API instead.

use crate::{error::SessionError, report::ScoreReport};
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, ResponseFormat, ResponseFormatJsonSchema,
    },
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, instrument};

/// Transcripts shorter than this (after trimming) are not evaluated.
pub const MIN_TRANSCRIPT_CHARS: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRequest {
    pub student_name: String,
    pub level: String,
    pub lesson: String,
    pub transcript: String,
}

impl EvaluationRequest {
    /// Rejects transcripts below [`MIN_TRANSCRIPT_CHARS`].
    pub fn check_length(&self) -> Result<(), SessionError> {
        let len = self.transcript.trim().chars().count();
        if len < MIN_TRANSCRIPT_CHARS {
            return Err(SessionError::TranscriptTooShort {
                len,
                min: MIN_TRANSCRIPT_CHARS,
            });
        }
        Ok(())
    }
}

/// Defines the contract for any service that can score a transcript.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<ScoreReport, SessionError>;
}

/// An implementation of `Evaluator` for any OpenAI-compatible API.
pub struct OpenAIEvaluator {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAIEvaluator {
    /// # Arguments
    ///
    /// * `config` - API key and base URL.
    /// * `model` - Chat model identifier (e.g., "gpt-4o-mini").
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl Evaluator for OpenAIEvaluator {
    #[instrument(skip_all, fields(student = %request.student_name, model = %self.model))]
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<ScoreReport, SessionError> {
        request.check_length()?;

        let chat = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content("You are an English speaking examiner for school students.")
                    .build()
                    .map_err(openai_error)?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(examiner_prompt(request))
                    .build()
                    .map_err(openai_error)?
                    .into(),
            ])
            .response_format(ResponseFormat::JsonSchema {
                json_schema: ResponseFormatJsonSchema {
                    description: None,
                    name: "speaking_score".to_string(),
                    schema: Some(report_schema()),
                    strict: Some(true),
                },
            })
            .build()
            .map_err(openai_error)?;

        let response = self.client.chat().create(chat).await.map_err(openai_error)?;
        let text = response
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| SessionError::Validation("evaluator returned no content".into()))?;

        let mut report = ScoreReport::parse(text)?;
        report.fill_defaults(&request.student_name, &request.level, &request.lesson);
        info!(average = report.scores.average(), "Transcript evaluated");
        Ok(report)
    }
}

fn openai_error(err: OpenAIError) -> SessionError {
    match err {
        OpenAIError::ApiError(api) => SessionError::Upstream {
            status: 502,
            message: api.message,
        },
        OpenAIError::InvalidArgument(msg) => SessionError::Validation(msg),
        other => SessionError::Upstream {
            status: 502,
            message: other.to_string(),
        },
    }
}

pub fn examiner_prompt(request: &EvaluationRequest) -> String {
    let or_unknown = |s: &str| {
        if s.trim().is_empty() {
            "Unknown".to_string()
        } else {
            s.to_string()
        }
    };
    format!(
        "Student: {}\nLevel: {}\nLesson: {}\n\nEvaluate based ONLY on this transcript:\n---\n{}\n---\n\nReturn ONLY valid JSON in the required schema.",
        if request.student_name.trim().is_empty() {
            "Student".to_string()
        } else {
            request.student_name.clone()
        },
        or_unknown(&request.level),
        or_unknown(&request.lesson),
        request.transcript.trim(),
    )
}

/// JSON schema the evaluator must answer with.
pub fn report_schema() -> Value {
    let score = json!({ "type": "integer", "minimum": 1, "maximum": 5 });
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "student": { "type": "string" },
            "level": { "type": "string" },
            "lesson": { "type": "string" },
            "scores": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "pronunciation": score,
                    "grammar": score,
                    "fluency": score,
                    "confidence": score
                },
                "required": ["pronunciation", "grammar", "fluency", "confidence"]
            },
            "strengths": { "type": "array", "items": { "type": "string" }, "minItems": 2, "maxItems": 4 },
            "improvements": { "type": "array", "items": { "type": "string" }, "minItems": 2, "maxItems": 5 },
            "corrected_sentences": {
                "type": "array",
                "minItems": 0,
                "maxItems": 3,
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {
                        "student_said": { "type": "string" },
                        "better": { "type": "string" }
                    },
                    "required": ["student_said", "better"]
                }
            },
            "homework": { "type": "string" }
        },
        "required": ["student", "level", "lesson", "scores", "strengths", "improvements", "corrected_sentences", "homework"]
    })
}

/// A deterministic `Evaluator` for development and tests.
pub struct MockEvaluator;

#[async_trait]
impl Evaluator for MockEvaluator {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<ScoreReport, SessionError> {
        request.check_length()?;
        let raw = json!({
            "student": request.student_name,
            "level": request.level,
            "lesson": request.lesson,
            "scores": { "pronunciation": 3, "grammar": 3, "fluency": 3, "confidence": 4 },
            "strengths": ["Tried every question", "Clear greeting"],
            "improvements": ["Use full sentences", "Practice past tense"],
            "corrected_sentences": [],
            "homework": format!("Speak for one minute about '{}'.", request.lesson)
        });
        ScoreReport::parse(&raw.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(transcript: &str) -> EvaluationRequest {
        EvaluationRequest {
            student_name: "ali".into(),
            level: "Beginner".into(),
            lesson: "Lesson 1: Introducing myself".into(),
            transcript: transcript.into(),
        }
    }

    #[test]
    fn test_check_length_threshold() {
        assert!(matches!(
            request("   too short   ").check_length(),
            Err(SessionError::TranscriptTooShort { len: 9, min: 20 })
        ));
        assert!(request("STUDENT: My name is Ali and I am ten.").check_length().is_ok());
    }

    #[test]
    fn test_request_wire_names() {
        let value = serde_json::to_value(request("x")).unwrap();
        assert_eq!(value["studentName"], "ali");
        assert_eq!(value["transcript"], "x");
    }

    #[test]
    fn test_examiner_prompt_defaults() {
        let mut req = request("STUDENT: hello");
        req.level = String::new();
        let prompt = examiner_prompt(&req);
        assert!(prompt.contains("Level: Unknown"));
        assert!(prompt.contains("---\nSTUDENT: hello\n---"));
    }

    #[test]
    fn test_schema_requires_all_fields() {
        let schema = report_schema();
        assert_eq!(schema["required"].as_array().unwrap().len(), 8);
        assert_eq!(schema["properties"]["scores"]["properties"]["grammar"]["maximum"], 5);
    }

    #[tokio::test]
    async fn test_mock_evaluator_scores_within_bounds() {
        let report = MockEvaluator
            .evaluate(&request("STUDENT: I like cricket and my school."))
            .await
            .unwrap();
        assert!(report.scores.values().iter().all(|v| (1..=5).contains(v)));
        assert_eq!(report.student, "ali");
    }

    #[tokio::test]
    async fn test_mock_evaluator_rejects_short_transcript() {
        assert!(MockEvaluator.evaluate(&request("hi")).await.is_err());
    }
}
