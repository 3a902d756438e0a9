//! HTTP middleware.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};

use crate::app::AppServices;

/// Count every routed request and time it, labelled by route template.
pub async fn track_http_metrics(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().to_string();
    let handler = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let services = req.extensions().get::<Arc<AppServices>>().cloned();

    let response = next.run(req).await;

    if let Some(services) = services {
        services.metrics.record_http(
            &method,
            &handler,
            response.status().as_u16(),
            started.elapsed(),
        );
    }
    response
}
