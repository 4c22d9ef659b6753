//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store selection and the optional embedded worker
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Uploads travel base64-encoded inside job payloads.
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<services::AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/jobs", routes::jobs::router())
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(middleware::request_log))
                .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
                .layer(Extension(services)),
        )
}
