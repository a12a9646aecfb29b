use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{error_response, ErrorResponse};
use crate::state::AppState;
use ortelius_core::error::OrchestrationError;
use ortelius_core::project::OutputArtifact;
use ortelius_core::reconciler::{Observation, ReconcileOutcome};

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Push notification from a worker about its batch job.
#[derive(Debug, Deserialize)]
pub struct JobEventBody {
    pub event_type: String,
    pub job_id: String,
    #[serde(default)]
    pub data: JobEventData,
}

#[derive(Debug, Deserialize, Default)]
pub struct JobEventData {
    pub progress: Option<u8>,
    pub error: Option<String>,
    #[serde(default)]
    pub outputs: Vec<OutputArtifact>,
}

#[derive(Debug, Serialize)]
pub struct JobEventResponse {
    pub outcome: &'static str,
}

/// Accepts `job.progress`, `job.succeeded`, and `job.failed` events and
/// feeds them through the reconciler. Events for unknown or already
/// resolved jobs are acknowledged as ignored so senders do not retry.
pub async fn receive_event(
    State(state): State<Arc<AppState>>,
    Json(body): Json<JobEventBody>,
) -> Result<Json<JobEventResponse>, ApiError> {
    let observation = match body.event_type.as_str() {
        "job.progress" => {
            let progress = body.data.progress.ok_or_else(|| {
                error_response(OrchestrationError::Validation(
                    "job.progress events require data.progress".to_string(),
                ))
            })?;
            Observation::Progress(progress)
        }
        "job.succeeded" => Observation::Succeeded {
            outputs: body.data.outputs,
        },
        "job.failed" => Observation::Failed {
            reason: body
                .data
                .error
                .unwrap_or_else(|| "Job failed".to_string()),
        },
        other => {
            return Err(error_response(OrchestrationError::Validation(format!(
                "Unknown event type: {}",
                other
            ))));
        }
    };

    debug!("Received {} event for job {}", body.event_type, body.job_id);
    let outcome = state
        .reconciler()
        .reconcile(&body.job_id, observation)
        .map_err(|e| error_response(e.into()))?;

    let outcome = match outcome {
        ReconcileOutcome::Updated(_) => "updated",
        ReconcileOutcome::Ignored => "ignored",
    };
    Ok(Json(JobEventResponse { outcome }))
}
