//! Shared error taxonomy for orchestration operations.

use thiserror::Error;

use crate::batch::BatchError;
use crate::planner::PlannerError;
use crate::project::ProjectError;
use crate::storage::StorageError;

/// Errors surfaced by the orchestration components (uploads, submission,
/// reconciliation, result publishing).
///
/// Validation and precondition failures happen before any state change.
/// Infrastructure errors during submission are rolled back before they
/// reach the caller.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Bad input (file type, file size, malformed identifier).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Project does not exist.
    #[error("Project not found: {0}")]
    NotFound(String),

    /// The project is not in a state that allows the operation.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// A concurrent request won the race; the caller must not retry blindly.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// No machine tier can accommodate the workload (configuration error).
    #[error("No machine tier can fit {image_count} images")]
    CapacityExceeded { image_count: u32 },

    /// Storage or batch service failure; safe to retry after the rollback.
    #[error("Infrastructure error: {0}")]
    Infrastructure(String),

    /// Project store failure.
    #[error("Store error: {0}")]
    Store(String),
}

impl From<ProjectError> for OrchestrationError {
    fn from(err: ProjectError) -> Self {
        match err {
            ProjectError::NotFound(id) => OrchestrationError::NotFound(id),
            ProjectError::VersionConflict { .. } => OrchestrationError::Conflict(err.to_string()),
            ProjectError::InvalidState { .. } => OrchestrationError::Precondition(err.to_string()),
            ProjectError::Database(msg) => OrchestrationError::Store(msg),
        }
    }
}

impl From<StorageError> for OrchestrationError {
    fn from(err: StorageError) -> Self {
        OrchestrationError::Infrastructure(err.to_string())
    }
}

impl From<BatchError> for OrchestrationError {
    fn from(err: BatchError) -> Self {
        OrchestrationError::Infrastructure(err.to_string())
    }
}

impl From<PlannerError> for OrchestrationError {
    fn from(err: PlannerError) -> Self {
        match err {
            PlannerError::CapacityExceeded(image_count) => {
                OrchestrationError::CapacityExceeded { image_count }
            }
        }
    }
}
