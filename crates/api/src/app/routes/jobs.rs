use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use tasksvc_core::{DomainError, JobId};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(submit_job).get(list_jobs))
        .route("/:id", get(get_job))
}

pub async fn submit_job(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::SubmitJobRequest>, JsonRejection>,
) -> axum::response::Response {
    services.metrics.record_request();

    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                rejection.body_text(),
            );
        }
    };

    match services.engine.submit(body.into_submission()).await {
        Ok(submission) => (
            StatusCode::OK,
            Json(dto::SubmitJobResponse {
                job_id: submission.job_id().to_string(),
            }),
        )
            .into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    // Malformed ids can't name an existing job.
    let Ok(id) = id.parse::<JobId>() else {
        return errors::domain_error_to_response(DomainError::not_found());
    };

    match services.engine.get(id).await {
        Ok(job) => Json(dto::JobView::from(&job)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn list_jobs(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.engine.list().await {
        Ok(jobs) => Json(jobs.iter().map(dto::JobView::from).collect::<Vec<_>>()).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}
