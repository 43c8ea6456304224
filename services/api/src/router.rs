//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        AliveResponse, CorrectedPairSchema, ErrorResponse, ScorePayload, ScoreReportSchema,
        ScoresSchema, Student, StudentList, StudentPayload, TokenResponse,
    },
    state::AppState,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::realtime_alive,
        handlers::issue_token,
        handlers::score_transcript,
        handlers::add_student,
        handlers::login_student,
        handlers::list_students,
    ),
    components(
        schemas(
            AliveResponse, TokenResponse, ScorePayload, ScoreReportSchema, ScoresSchema,
            CorrectedPairSchema, Student, StudentList, StudentPayload, ErrorResponse
        )
    ),
    tags(
        (name = "Tutor API", description = "Credential, scoring and roster endpoints for the speaking tutor")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/realtime", get(handlers::realtime_alive))
        .route("/realtime/token", post(handlers::issue_token))
        .route("/score", post(handlers::score_transcript))
        .route(
            "/students",
            get(handlers::list_students).post(handlers::add_student),
        )
        .route("/students/login", post(handlers::login_student))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
