use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use tasksvc_core::DomainError;
use tasksvc_infra::jobs::EngineError;

pub fn engine_error_to_response(err: EngineError) -> axum::response::Response {
    match err {
        EngineError::Domain(e) => domain_error_to_response(e),
        EngineError::Store(e) => {
            error!(error = %e, "job store error");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
        EngineError::Queue(e) => {
            error!(error = %e, "work queue error");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "queue_unavailable", e.to_string())
        }
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        DomainError::Validation(_) => json_error(StatusCode::BAD_REQUEST, "validation_error", message),
        DomainError::UnsupportedJobType(_) => {
            json_error(StatusCode::BAD_REQUEST, "unsupported_job_type", message)
        }
        DomainError::InvalidPayload(_) => json_error(StatusCode::BAD_REQUEST, "invalid_payload", message),
        DomainError::NotFound | DomainError::InvalidId(_) => json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            DomainError::not_found().to_string(),
        ),
        DomainError::InvalidTransition { .. } => {
            json_error(StatusCode::CONFLICT, "invalid_transition", message)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
