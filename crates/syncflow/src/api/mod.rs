use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tracing::error;

use crate::api::models::{ErrorResponse, NotFoundResponse, SubmitRequest};
use crate::error::SyncError;
use crate::jobs::model::JobStatus;
use crate::queue::Credential;
use crate::service::SyncService;

pub mod models;

#[derive(Clone)]
pub struct ApiState {
    pub service: SyncService,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/jobs/:job_type", post(submit_job))
        .route("/jobs/:job_type/:job_id", get(job_status))
        .route("/health", get(health))
        .with_state(state)
}

fn error_response(e: SyncError) -> Response {
    let status = match &e {
        SyncError::BadRequest(_) => StatusCode::BAD_REQUEST,
        SyncError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(error = %e, "request failed");
    }
    (
        status,
        Json(ErrorResponse {
            code: e.code(),
            message: e.to_string(),
        }),
    )
        .into_response()
}

pub async fn submit_job(
    State(state): State<ApiState>,
    Path(job_type): Path<String>,
    Json(body): Json<SubmitRequest>,
) -> Response {
    let SubmitRequest {
        parameters,
        access_token,
    } = body;

    match state
        .service
        .submit(&job_type, parameters, Credential::new(access_token), Utc::now())
        .await
    {
        Ok(submission) => (StatusCode::ACCEPTED, Json(submission)).into_response(),
        Err(e) => error_response(e),
    }
}

/// 200 while PENDING or SUCCEEDED, 500 once FAILED, 404 for unknown or expired jobs.
pub async fn job_status(
    State(state): State<ApiState>,
    Path((job_type, job_id)): Path<(String, String)>,
) -> Response {
    match state.service.status(&job_type, &job_id, Utc::now()).await {
        Ok(Some(view)) => {
            let code = match view.status {
                JobStatus::Failed => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::OK,
            };
            (code, Json(view)).into_response()
        }
        Ok(None) => (StatusCode::NOT_FOUND, Json(NotFoundResponse::new(job_id))).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
