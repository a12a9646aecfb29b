use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use tracing::debug;

use super::{error_response, ErrorResponse};
use crate::state::AppState;
use ortelius_core::error::OrchestrationError;
use ortelius_core::storage::Bucket;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Accepts object PUTs for the in-memory storage backend, so signed
/// upload URLs work end to end in dev mode. Signatures are not
/// verified here; this route never exists with a real backend.
pub async fn put_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, path)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let bucket: Bucket = bucket
        .parse()
        .map_err(|e: String| error_response(OrchestrationError::Validation(e)))?;
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    debug!(
        "Dev storage PUT {}/{} ({} bytes)",
        bucket.as_str(),
        path,
        body.len()
    );
    state
        .object_store()
        .put(bucket, &path, body.to_vec(), &content_type)
        .await
        .map_err(|e| error_response(e.into()))?;
    Ok(StatusCode::OK)
}
