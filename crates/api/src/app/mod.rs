//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: adapter selection (store, queue), engine and metrics
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, middleware, routing::get};
use tower::ServiceBuilder;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .route("/metrics", get(routes::system::metrics))
        .nest("/v1", routes::router())
        .route_layer(middleware::from_fn(crate::middleware::track_http_metrics))
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
