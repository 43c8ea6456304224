//! Axum Handlers for the REST API
//!
//! Token issuance, transcript scoring and the student roster. Handlers use
//! `utoipa` annotations to generate the OpenAPI document.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::{error, info, warn};
use tutor_core::{SessionError, evaluation::EvaluationRequest, report::ScoreReport};

use crate::{
    db::RosterError,
    models::{
        AliveResponse, ErrorResponse, ScorePayload, ScoreReportSchema, Student, StudentList,
        StudentPayload, TokenResponse,
    },
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Conflict(String),
    Upstream(StatusCode, String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Unauthorized(message) => {
                (StatusCode::UNAUTHORIZED, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Conflict(message) => {
                (StatusCode::CONFLICT, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Upstream(status, message) => {
                warn!(%status, %message, "Upstream failure");
                (status, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

impl ApiError {
    /// Maps the domain taxonomy onto HTTP statuses.
    pub fn session(err: SessionError) -> Self {
        match err {
            SessionError::TranscriptTooShort { .. } => ApiError::BadRequest(
                "Transcript is missing or too short. Let the student speak for 30-60 seconds first."
                    .to_string(),
            ),
            SessionError::Validation(message) => ApiError::Upstream(StatusCode::BAD_GATEWAY, message),
            SessionError::Upstream { status, message } => {
                let status = StatusCode::from_u16(status)
                    .ok()
                    .filter(|s| s.is_client_error() || s.is_server_error())
                    .unwrap_or(StatusCode::BAD_GATEWAY);
                ApiError::Upstream(status, message)
            }
            SessionError::Config(message) => {
                ApiError::Upstream(StatusCode::INTERNAL_SERVER_ERROR, message)
            }
            other => ApiError::InternalServerError(other.into()),
        }
    }

    fn roster(err: RosterError) -> Self {
        match err {
            RosterError::Duplicate(name) => {
                ApiError::Conflict(format!("Student '{}' already exists", name))
            }
            RosterError::Backend(e) => ApiError::InternalServerError(e),
        }
    }
}

/// Liveness probe for the realtime token route.
#[utoipa::path(
    get,
    path = "/realtime",
    responses((status = 200, description = "Service is alive", body = AliveResponse))
)]
pub async fn realtime_alive(State(state): State<Arc<AppState>>) -> Json<AliveResponse> {
    Json(AliveResponse {
        ok: true,
        message: format!(
            "realtime ({}) is alive. Use POST /realtime/token to get an ephemeral key.",
            state.config.realtime_model
        ),
    })
}

/// Issue a short-lived client secret for one realtime session.
#[utoipa::path(
    post,
    path = "/realtime/token",
    responses(
        (status = 200, description = "Ephemeral credential issued", body = TokenResponse),
        (status = 500, description = "Server secret missing", body = ErrorResponse),
        (status = 502, description = "Credential issuer failed", body = ErrorResponse)
    )
)]
pub async fn issue_token(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TokenResponse>, ApiError> {
    let credential = state
        .credentials
        .request_ephemeral_credential()
        .await
        .map_err(ApiError::session)?;
    Ok(Json(TokenResponse {
        value: credential.value.expose_secret().to_string(),
        expires_at: credential.expires_at,
    }))
}

/// Evaluate a finished transcript.
#[utoipa::path(
    post,
    path = "/score",
    request_body = ScorePayload,
    responses(
        (status = 200, description = "Structured score report", body = ScoreReportSchema),
        (status = 400, description = "Transcript missing or too short", body = ErrorResponse),
        (status = 502, description = "Evaluation model failed", body = ErrorResponse)
    )
)]
pub async fn score_transcript(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ScorePayload>,
) -> Result<Json<ScoreReport>, ApiError> {
    let request = EvaluationRequest::from(payload);
    request.check_length().map_err(ApiError::session)?;
    let report = state
        .evaluator
        .evaluate(&request)
        .await
        .map_err(ApiError::session)?;
    report.validate().map_err(ApiError::session)?;
    info!(student = %request.student_name, average = report.scores.average(), "Transcript scored");
    Ok(Json(report))
}

/// Add a student to the roster.
#[utoipa::path(
    post,
    path = "/students",
    request_body = StudentPayload,
    responses(
        (status = 201, description = "Student added", body = Student),
        (status = 400, description = "Missing name or invalid PIN", body = ErrorResponse),
        (status = 409, description = "Student already exists", body = ErrorResponse)
    )
)]
pub async fn add_student(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<StudentPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let credentials = payload.validate().map_err(ApiError::BadRequest)?;
    let student = state
        .roster
        .add(&credentials)
        .await
        .map_err(ApiError::roster)?;
    info!(student = %student.name, "Student added to roster");
    Ok((StatusCode::CREATED, Json(student)))
}

/// Check a student's name and PIN.
#[utoipa::path(
    post,
    path = "/students/login",
    request_body = StudentPayload,
    responses(
        (status = 200, description = "Credentials accepted", body = Student),
        (status = 400, description = "Missing name or invalid PIN", body = ErrorResponse),
        (status = 401, description = "Unknown student or wrong PIN", body = ErrorResponse)
    )
)]
pub async fn login_student(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<StudentPayload>,
) -> Result<Json<Student>, ApiError> {
    let credentials = payload.validate().map_err(ApiError::BadRequest)?;
    state
        .roster
        .verify(&credentials)
        .await
        .map_err(ApiError::roster)?
        .map(Json)
        .ok_or_else(|| ApiError::Unauthorized("Wrong name or PIN. Try again.".to_string()))
}

/// List the roster.
#[utoipa::path(
    get,
    path = "/students",
    responses(
        (status = 200, description = "All students", body = StudentList),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn list_students(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StudentList>, ApiError> {
    let data = state.roster.list().await.map_err(ApiError::roster)?;
    Ok(Json(StudentList { data }))
}
