//! HTTP API surface.

mod events;
mod handlers;
mod middleware;
mod projects;
mod routes;
mod storage_dev;

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use ortelius_core::error::OrchestrationError;

pub use routes::create_router;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Maps orchestration errors onto HTTP status codes.
pub(crate) fn error_response(err: OrchestrationError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &err {
        OrchestrationError::Validation(_) | OrchestrationError::Precondition(_) => {
            StatusCode::BAD_REQUEST
        }
        OrchestrationError::NotFound(_) => StatusCode::NOT_FOUND,
        OrchestrationError::Conflict(_) => StatusCode::CONFLICT,
        // An exhausted tier table is a deployment problem, not a client one.
        OrchestrationError::CapacityExceeded { .. } | OrchestrationError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        OrchestrationError::Infrastructure(_) => StatusCode::BAD_GATEWAY,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}
