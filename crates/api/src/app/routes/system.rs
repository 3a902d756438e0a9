use std::sync::Arc;

use axum::{
    Json,
    extract::Extension,
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde_json::json;
use tracing::error;

use crate::app::errors;
use crate::app::services::AppServices;

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn metrics(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to render metrics");
            errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "metrics_error", e.to_string())
        }
    }
}
