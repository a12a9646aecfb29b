//! Reconciliation of externally-observed job state onto projects.

mod runner;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::metrics;
use crate::project::{
    OutputArtifact, Project, ProjectChanges, ProjectError, ProjectStatus, ProjectStore,
};

pub use runner::{ReconcilerConfig, ReconcilerRunner};

const RECONCILE_RETRIES: u32 = 3;

/// A fact about a batch job, reported by polling or by a push event.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Progress(u8),
    Succeeded { outputs: Vec<OutputArtifact> },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Updated(Project),
    /// Stale job id, non-advancing progress, or a lost write race.
    Ignored,
}

/// Applies observations to the owning project.
///
/// Lookup goes through `active_job_id`, so observations for a job that
/// was already resolved (or never existed) fall through to `Ignored`;
/// replaying a terminal observation is therefore harmless.
pub struct StatusReconciler {
    store: Arc<dyn ProjectStore>,
}

impl StatusReconciler {
    pub fn new(store: Arc<dyn ProjectStore>) -> Self {
        Self { store }
    }

    pub fn reconcile(
        &self,
        job_id: &str,
        observation: Observation,
    ) -> Result<ReconcileOutcome, ProjectError> {
        for attempt in 0..RECONCILE_RETRIES {
            let Some(project) = self.store.find_by_job(job_id)? else {
                debug!("Ignoring observation for unknown or resolved job {}", job_id);
                metrics::RECONCILE_OUTCOMES.with_label_values(&["ignored"]).inc();
                return Ok(ReconcileOutcome::Ignored);
            };
            if project.status != ProjectStatus::Processing {
                debug!(
                    "Ignoring observation for job {}: project {} is {}",
                    job_id, project.id, project.status
                );
                metrics::RECONCILE_OUTCOMES.with_label_values(&["ignored"]).inc();
                return Ok(ReconcileOutcome::Ignored);
            }

            let (changes, label) = match &observation {
                Observation::Progress(reported) => {
                    let progress = (*reported).min(100);
                    if progress <= project.progress {
                        metrics::RECONCILE_OUTCOMES.with_label_values(&["ignored"]).inc();
                        return Ok(ReconcileOutcome::Ignored);
                    }
                    (ProjectChanges::new().progress(progress), "progress")
                }
                Observation::Succeeded { outputs } => (
                    ProjectChanges::new()
                        .status(ProjectStatus::Completed)
                        .progress(100)
                        .outputs(outputs.clone())
                        .clear_active_job(),
                    "completed",
                ),
                Observation::Failed { reason } => (
                    ProjectChanges::new()
                        .status(ProjectStatus::Failed)
                        .error_message(reason.clone())
                        .clear_active_job(),
                    "failed",
                ),
            };

            match self.store.update_if_version(&project.id, project.version, changes) {
                Ok(updated) => {
                    match label {
                        "completed" => info!("Project {} completed (job {})", project.id, job_id),
                        "failed" => warn!(
                            "Project {} failed (job {}): {}",
                            project.id,
                            job_id,
                            updated.error_message.as_deref().unwrap_or("unknown")
                        ),
                        _ => debug!(
                            "Project {} progress {} (job {})",
                            project.id, updated.progress, job_id
                        ),
                    }
                    metrics::RECONCILE_OUTCOMES.with_label_values(&[label]).inc();
                    return Ok(ReconcileOutcome::Updated(updated));
                }
                Err(ProjectError::VersionConflict { .. }) if attempt + 1 < RECONCILE_RETRIES => {
                    continue;
                }
                Err(ProjectError::VersionConflict { .. }) => {
                    metrics::RECONCILE_OUTCOMES.with_label_values(&["ignored"]).inc();
                    return Ok(ReconcileOutcome::Ignored);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(ReconcileOutcome::Ignored)
    }
}
