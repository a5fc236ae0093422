use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::limit::RequestBodyLimitLayer;

use crate::app_state::AppState;
use crate::jobs::error::{CancelError, StatusError, SubmissionError};
use crate::models::api::ErrorResponse;

pub mod health;
pub mod jobs;
pub mod metrics;

/// Room for multipart boundaries and headers on top of the document itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Job and health routes, with request bodies capped just above
/// `max_document_size`.
pub fn router(state: AppState, max_document_size: usize) -> Router {
    let body_limit = max_document_size + MULTIPART_OVERHEAD;

    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/jobs", post(jobs::submit_job))
        .route("/api/v1/jobs/{job_id}", get(jobs::get_job_status))
        .route("/api/v1/jobs/{job_id}/cancel", post(jobs::cancel_job))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(RequestBodyLimitLayer::new(body_limit))
}

/// Error returned by route handlers, rendered as a JSON body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<SubmissionError> for ApiError {
    fn from(e: SubmissionError) -> Self {
        let status = match &e {
            SubmissionError::EmptyDocument => StatusCode::BAD_REQUEST,
            SubmissionError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            SubmissionError::DocumentStore(_) | SubmissionError::JobStore(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        Self::new(status, e.to_string())
    }
}

impl From<StatusError> for ApiError {
    fn from(e: StatusError) -> Self {
        let status = match &e {
            StatusError::NotFound(_) => StatusCode::NOT_FOUND,
            StatusError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::new(status, e.to_string())
    }
}

impl From<CancelError> for ApiError {
    fn from(e: CancelError) -> Self {
        let status = match &e {
            CancelError::NotFound(_) => StatusCode::NOT_FOUND,
            CancelError::AlreadyTerminal { .. } => StatusCode::CONFLICT,
            CancelError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::new(status, e.to_string())
    }
}
