//! HTTP clients for the tutor API: the token endpoint as a
//! [`CredentialProvider`] and the scoring endpoint as an [`Evaluator`].

use async_trait::async_trait;
use openai_realtime::{CredentialProvider, EphemeralCredential};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};
use tutor_core::{
    SessionError,
    evaluation::{EvaluationRequest, Evaluator},
    report::ScoreReport,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const SCORING_TIMEOUT: Duration = Duration::from_secs(60);

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

fn transport_error(what: &str, err: reqwest::Error) -> SessionError {
    SessionError::Upstream {
        status: err.status().map(|s| s.as_u16()).unwrap_or(0),
        message: format!("{} failed: {}", what, err),
    }
}

/// Pulls `message` (or `error.message`) out of an error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v["message"]
                .as_str()
                .or_else(|| v["error"]["message"].as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_string())
}

pub struct HttpCredentialProvider {
    http: reqwest::Client,
    api_url: String,
}

impl HttpCredentialProvider {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            http: http_client(),
            api_url: api_url.into(),
        }
    }
}

#[derive(Deserialize)]
struct TokenBody {
    value: Option<String>,
    expires_at: Option<i64>,
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    #[instrument(skip(self), fields(api = %self.api_url))]
    async fn request_ephemeral_credential(&self) -> Result<EphemeralCredential, SessionError> {
        let response = self
            .http
            .post(format!("{}/realtime/token", self.api_url))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| transport_error("token request", e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error("token request", e))?;
        if !status.is_success() {
            return Err(SessionError::Upstream {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        let token: TokenBody = serde_json::from_str(&body).map_err(|_| SessionError::Upstream {
            status: status.as_u16(),
            message: format!("Token missing from /realtime/token. Body: {}", body),
        })?;
        let value = token
            .value
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SessionError::Upstream {
                status: status.as_u16(),
                message: format!("Token missing from /realtime/token. Body: {}", body),
            })?;
        debug!("Token received");
        Ok(EphemeralCredential::new(value, token.expires_at))
    }
}

pub struct HttpEvaluator {
    http: reqwest::Client,
    api_url: String,
}

impl HttpEvaluator {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            http: http_client(),
            api_url: api_url.into(),
        }
    }
}

#[async_trait]
impl Evaluator for HttpEvaluator {
    #[instrument(skip_all, fields(api = %self.api_url, student = %request.student_name))]
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<ScoreReport, SessionError> {
        let response = self
            .http
            .post(format!("{}/score", self.api_url))
            .timeout(SCORING_TIMEOUT)
            .json(request)
            .send()
            .await
            .map_err(|e| transport_error("score request", e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error("score request", e))?;
        if !status.is_success() {
            return Err(SessionError::Upstream {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        ScoreReport::parse(&body)
    }
}
