use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{JobStatusResponse, SubmitResponse};
use crate::routes::ApiError;

const FILE_FIELD: &str = "file";

/// POST /api/v1/jobs: Upload a document for classification.
pub async fn submit_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let mut document = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.body_text()))?
    {
        if field.name() == Some(FILE_FIELD) {
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::new(e.status(), e.body_text()))?;
            document = Some(data);
        }
    }

    let document = document.ok_or_else(|| {
        ApiError::new(StatusCode::BAD_REQUEST, "missing multipart field \"file\"")
    })?;

    let job = state.controller.submit(&document).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id: job.id,
            state: job.state,
            message: "Document accepted for classification".to_string(),
        }),
    ))
}

/// GET /api/v1/jobs/{job_id}: Poll a job's state and result.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state.controller.get_status(job_id).await?;
    Ok(Json(job.into()))
}

/// POST /api/v1/jobs/{job_id}/cancel: Stop a job that has not finished.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state.controller.cancel(job_id).await?;
    Ok(Json(job.into()))
}
