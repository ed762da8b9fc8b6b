//! Routes served by the worker process.
//!
//! - `GET /healthz`: liveness
//! - `GET /readyz`: readiness (database + storage)
//! - `GET /objects/{*key}`: presigned download
//! - `POST /upload`: presigned form upload

use crate::handlers::AppState;
use crate::handlers::health_handlers::{healthz, readyz};
use crate::handlers::object_handlers::{download_object, upload_object};
use axum::{
    Router,
    routing::{get, post},
};

/// Build the router.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/objects/{*key}", get(download_object))
        .route("/upload", post(upload_object))
}
