use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use super::client::BatchClient;
use super::types::{BatchJobSpec, LogDestination, ProvisioningModel};
use crate::error::OrchestrationError;
use crate::metrics;
use crate::planner::{plan_job, JobPlan, PlannerConfig};
use crate::project::{
    is_canonical_project_id, ProcessingOptions, Project, ProjectChanges, ProjectError,
    ProjectStatus, ProjectStore,
};

/// Minimum images required for a meaningful reconstruction.
pub const MIN_FILES_FOR_PROCESSING: u32 = 3;

const LABEL_PROJECT_ID_MAX_LEN: usize = 60;
const LABEL_FILE_COUNT_CAP: u32 = 9999;

/// Static portion of every job spec, taken from configuration.
#[derive(Debug, Clone)]
pub struct JobTemplate {
    pub allowed_zones: Vec<String>,
    pub max_run_duration_secs: u64,
    pub max_retry_count: u32,
    pub provisioning_model: ProvisioningModel,
    pub log_destination: LogDestination,
    pub worker_image: String,
    pub worker_command: Vec<String>,
    pub service_account: Option<String>,
    pub uploads_bucket: String,
    pub outputs_bucket: String,
}

/// Claims a project for processing and submits its compute job.
pub struct JobSubmitter {
    store: Arc<dyn ProjectStore>,
    batch: Arc<dyn BatchClient>,
    planner: PlannerConfig,
    template: JobTemplate,
}

impl JobSubmitter {
    pub fn new(
        store: Arc<dyn ProjectStore>,
        batch: Arc<dyn BatchClient>,
        planner: PlannerConfig,
        template: JobTemplate,
    ) -> Self {
        Self {
            store,
            batch,
            planner,
            template,
        }
    }

    /// Moves a pending project to `processing` and submits the batch job.
    ///
    /// The compare-and-swap claim happens before the submission call, so
    /// exactly one of two concurrent requests can win; the loser gets a
    /// [`OrchestrationError::Conflict`]. If the batch service then refuses
    /// the job, the claim is rolled back to `pending`.
    pub async fn submit(
        &self,
        project_id: &str,
        options: ProcessingOptions,
    ) -> Result<Project, OrchestrationError> {
        if !is_canonical_project_id(project_id) {
            return Err(OrchestrationError::Validation(format!(
                "Invalid project id: {}",
                project_id
            )));
        }

        let project = self
            .store
            .get(project_id)?
            .ok_or_else(|| OrchestrationError::NotFound(project_id.to_string()))?;

        match project.status {
            ProjectStatus::Processing => {
                return Err(OrchestrationError::Conflict(format!(
                    "Project {} is already being processed",
                    project_id
                )));
            }
            ProjectStatus::Completed | ProjectStatus::Failed => {
                return Err(OrchestrationError::Precondition(format!(
                    "Project {} has already finished (status: {})",
                    project_id, project.status
                )));
            }
            ProjectStatus::Created => {
                return Err(OrchestrationError::Precondition(format!(
                    "Uploads for project {} must be finalized before processing",
                    project_id
                )));
            }
            ProjectStatus::Pending => {}
        }

        if project.files_count < MIN_FILES_FOR_PROCESSING {
            return Err(OrchestrationError::Precondition(format!(
                "At least {} images are required, found {}",
                MIN_FILES_FOR_PROCESSING, project.files_count
            )));
        }

        let plan = plan_job(project.files_count, &self.planner)?;
        let job_id = new_job_id(&project.id);

        let claim = ProjectChanges::new()
            .status(ProjectStatus::Processing)
            .progress(0)
            .clear_error()
            .options(Some(options.clone()))
            .active_job_id(job_id.clone());
        let claimed = match self.store.update_if_version(&project.id, project.version, claim) {
            Ok(claimed) => claimed,
            Err(ProjectError::VersionConflict { .. }) => {
                metrics::JOB_SUBMISSIONS.with_label_values(&["conflict"]).inc();
                return Err(OrchestrationError::Conflict(format!(
                    "Project {} was modified concurrently",
                    project_id
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let spec = self.build_spec(&claimed, &plan, &options, &job_id);
        match self.batch.submit(&spec).await {
            Ok(submitted) => {
                info!(
                    "Project {} processing started: job {} on {} ({} MB disk, {} files)",
                    project_id,
                    submitted.job_id,
                    plan.tier.machine_type,
                    plan.disk_size_mb,
                    claimed.files_count
                );
                metrics::JOB_SUBMISSIONS.with_label_values(&["submitted"]).inc();
                metrics::PLANNER_TIER_SELECTED
                    .with_label_values(&[&plan.tier.name])
                    .inc();
                Ok(claimed)
            }
            Err(e) => {
                warn!("Batch submission failed for project {}: {}", project_id, e);
                metrics::JOB_SUBMISSIONS.with_label_values(&["failed"]).inc();
                let rollback = ProjectChanges::new()
                    .status(ProjectStatus::Pending)
                    .progress(0)
                    .options(None)
                    .clear_active_job();
                if let Err(rollback_err) =
                    self.store
                        .update_if_version(&claimed.id, claimed.version, rollback)
                {
                    error!(
                        "Failed to roll back project {} after submission error: {}",
                        claimed.id, rollback_err
                    );
                }
                Err(OrchestrationError::Infrastructure(format!(
                    "Job submission failed: {}",
                    e
                )))
            }
        }
    }

    fn build_spec(
        &self,
        project: &Project,
        plan: &JobPlan,
        options: &ProcessingOptions,
        job_id: &str,
    ) -> BatchJobSpec {
        let mut environment = BTreeMap::new();
        environment.insert("PROJECT_ID".to_string(), project.id.clone());
        environment.insert(
            "UPLOADS_BUCKET".to_string(),
            self.template.uploads_bucket.clone(),
        );
        environment.insert(
            "OUTPUTS_BUCKET".to_string(),
            self.template.outputs_bucket.clone(),
        );
        environment.insert(
            "UPLOADS_PREFIX".to_string(),
            format!("gs://{}/{}", self.template.uploads_bucket, project.id),
        );
        environment.insert(
            "OUTPUTS_PREFIX".to_string(),
            format!("gs://{}/{}", self.template.outputs_bucket, project.id),
        );
        environment.insert(
            "ORTHO_QUALITY".to_string(),
            options.ortho_quality.as_str().to_string(),
        );
        environment.insert(
            "GENERATE_DTM".to_string(),
            options.generate_dtm.to_string(),
        );
        environment.insert(
            "MULTISPECTRAL".to_string(),
            options.multispectral.to_string(),
        );

        // Label values must satisfy the service's charset and length rules.
        let mut labels = BTreeMap::new();
        let id_label: String = project.id.chars().take(LABEL_PROJECT_ID_MAX_LEN).collect();
        labels.insert("project-id".to_string(), id_label);
        labels.insert("type".to_string(), "photogrammetry".to_string());
        labels.insert(
            "file-count".to_string(),
            project.files_count.min(LABEL_FILE_COUNT_CAP).to_string(),
        );
        labels.insert(
            "machine-type".to_string(),
            plan.tier.machine_type.replace('-', "_"),
        );

        BatchJobSpec {
            job_id: job_id.to_string(),
            machine_type: plan.tier.machine_type.clone(),
            cpu_milli: plan.tier.cpu_milli,
            memory_mib: plan.tier.memory_mib,
            boot_disk_mib: plan.disk_size_mb,
            allowed_zones: self.template.allowed_zones.clone(),
            max_run_duration_secs: self.template.max_run_duration_secs,
            max_retry_count: self.template.max_retry_count,
            provisioning_model: self.template.provisioning_model,
            log_destination: self.template.log_destination,
            worker_image: self.template.worker_image.clone(),
            worker_command: self.template.worker_command.clone(),
            service_account: self.template.service_account.clone(),
            environment,
            labels,
        }
    }
}

/// Job ids embed the project's first UUID segment and a timestamp so a
/// resubmission after rollback never collides with the previous job.
fn new_job_id(project_id: &str) -> String {
    format!(
        "ortho-{}-{}",
        &project_id[..8],
        Utc::now().format("%Y%m%d%H%M%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{CreateProjectRequest, SqliteProjectStore};
    use crate::testing::MockBatchClient;

    fn template() -> JobTemplate {
        JobTemplate {
            allowed_zones: vec!["europe-west1-b".to_string()],
            max_run_duration_secs: 14400,
            max_retry_count: 1,
            provisioning_model: ProvisioningModel::Standard,
            log_destination: LogDestination::CloudLogging,
            worker_image: "ghcr.io/example/worker:latest".to_string(),
            worker_command: vec!["/app/run.sh".to_string()],
            service_account: None,
            uploads_bucket: "test-uploads".to_string(),
            outputs_bucket: "test-outputs".to_string(),
        }
    }

    fn setup(batch: Arc<MockBatchClient>) -> (Arc<SqliteProjectStore>, JobSubmitter) {
        let store = Arc::new(SqliteProjectStore::in_memory().unwrap());
        let submitter = JobSubmitter::new(
            store.clone(),
            batch,
            PlannerConfig::default(),
            template(),
        );
        (store, submitter)
    }

    fn pending_project(store: &SqliteProjectStore, files_count: u32) -> Project {
        let project = store.create(CreateProjectRequest::default()).unwrap();
        store
            .update_if_version(
                &project.id,
                0,
                ProjectChanges::new()
                    .status(ProjectStatus::Pending)
                    .files_count(files_count),
            )
            .unwrap()
    }

    #[tokio::test]
    async fn test_submit_claims_project_and_builds_spec() {
        let batch = Arc::new(MockBatchClient::new());
        let (store, submitter) = setup(batch.clone());
        let project = pending_project(&store, 250);

        let claimed = submitter
            .submit(&project.id, ProcessingOptions::default())
            .await
            .unwrap();
        assert_eq!(claimed.status, ProjectStatus::Processing);
        assert_eq!(claimed.progress, 0);
        let job_id = claimed.active_job_id.clone().unwrap();
        assert!(job_id.starts_with(&format!("ortho-{}-", &project.id[..8])));

        let specs = batch.submitted_specs();
        assert_eq!(specs.len(), 1);
        let spec = &specs[0];
        assert_eq!(spec.job_id, job_id);
        // 250 images land on the second tier.
        assert_eq!(spec.machine_type, "e2-standard-8");
        assert_eq!(spec.boot_disk_mib, 51200);
        assert_eq!(spec.environment["PROJECT_ID"], project.id);
        assert_eq!(
            spec.environment["UPLOADS_PREFIX"],
            format!("gs://test-uploads/{}", project.id)
        );
        assert_eq!(spec.environment["ORTHO_QUALITY"], "medium");
        assert_eq!(spec.environment["GENERATE_DTM"], "false");
        assert_eq!(spec.labels["file-count"], "250");
        assert_eq!(spec.labels["machine-type"], "e2_standard_8");
    }

    #[tokio::test]
    async fn test_submit_requires_minimum_files() {
        let batch = Arc::new(MockBatchClient::new());
        let (store, submitter) = setup(batch.clone());
        let project = pending_project(&store, 2);

        let err = submitter
            .submit(&project.id, ProcessingOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::Precondition(_)));
        assert!(batch.submitted_specs().is_empty());

        // Exactly the minimum is accepted.
        let project = pending_project(&store, 3);
        submitter
            .submit(&project.id, ProcessingOptions::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_submit_rejects_wrong_states() {
        let batch = Arc::new(MockBatchClient::new());
        let (store, submitter) = setup(batch);

        let created = store.create(CreateProjectRequest::default()).unwrap();
        let err = submitter
            .submit(&created.id, ProcessingOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::Precondition(_)));

        let project = pending_project(&store, 10);
        submitter
            .submit(&project.id, ProcessingOptions::default())
            .await
            .unwrap();
        // Second request finds it processing.
        let err = submitter
            .submit(&project.id, ProcessingOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_submit_unknown_and_invalid_ids() {
        let batch = Arc::new(MockBatchClient::new());
        let (_, submitter) = setup(batch);

        let err = submitter
            .submit("not-a-uuid", ProcessingOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::Validation(_)));

        let err = submitter
            .submit(&uuid::Uuid::new_v4().to_string(), ProcessingOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_submit_rolls_back_on_batch_failure() {
        let batch = Arc::new(MockBatchClient::new().failing_submissions());
        let (store, submitter) = setup(batch);
        let project = pending_project(&store, 10);

        let err = submitter
            .submit(&project.id, ProcessingOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::Infrastructure(_)));

        let after = store.get(&project.id).unwrap().unwrap();
        assert_eq!(after.status, ProjectStatus::Pending);
        assert!(after.active_job_id.is_none());
        assert!(after.options.is_none());
        assert_eq!(after.files_count, 10);
    }

    #[tokio::test]
    async fn test_concurrent_submissions_have_one_winner() {
        let batch = Arc::new(MockBatchClient::new());
        let (store, submitter) = setup(batch.clone());
        let submitter = Arc::new(submitter);
        let project = pending_project(&store, 10);

        let a = {
            let submitter = submitter.clone();
            let id = project.id.clone();
            tokio::spawn(async move { submitter.submit(&id, ProcessingOptions::default()).await })
        };
        let b = {
            let submitter = submitter.clone();
            let id = project.id.clone();
            tokio::spawn(async move { submitter.submit(&id, ProcessingOptions::default()).await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        let loser = results.iter().find(|r| r.is_err()).unwrap();
        assert!(matches!(
            loser.as_ref().unwrap_err(),
            OrchestrationError::Conflict(_)
        ));
        assert_eq!(batch.submitted_specs().len(), 1);
    }

    #[tokio::test]
    async fn test_capacity_exceeded_with_bounded_tiers() {
        let batch = Arc::new(MockBatchClient::new());
        let store = Arc::new(SqliteProjectStore::in_memory().unwrap());
        let mut planner = PlannerConfig::default();
        planner.tiers.truncate(1); // only "small", max 200 images
        let submitter = JobSubmitter::new(store.clone(), batch, planner, template());
        let project = pending_project(&store, 500);

        let err = submitter
            .submit(&project.id, ProcessingOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::CapacityExceeded { image_count: 500 }
        ));
        // The project was not claimed.
        let after = store.get(&project.id).unwrap().unwrap();
        assert_eq!(after.status, ProjectStatus::Pending);
    }
}
