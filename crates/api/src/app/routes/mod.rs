use axum::Router;

pub mod jobs;
pub mod system;

/// Router for the versioned API surface.
pub fn router() -> Router {
    Router::new().nest("/jobs", jobs::router())
}
