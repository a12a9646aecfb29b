use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{Observation, StatusReconciler};
use crate::batch::{BatchClient, BatchError, JobState};
use crate::project::{ProjectError, ProjectFilter, ProjectStatus, ProjectStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Max processing projects examined per poll cycle.
    #[serde(default = "default_poll_batch_size")]
    pub poll_batch_size: u32,
    /// How long a missing batch job is tolerated before the project is
    /// failed. A project is claimed before the submission round-trip
    /// finishes, so the job is invisible to polling for up to the batch
    /// client's HTTP timeout. Must exceed that timeout.
    #[serde(default = "default_not_found_grace_secs")]
    pub not_found_grace_secs: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_batch_size: default_poll_batch_size(),
            not_found_grace_secs: default_not_found_grace_secs(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_poll_batch_size() -> u32 {
    50
}

fn default_not_found_grace_secs() -> u64 {
    60
}

/// Background loop that polls batch job status for every processing
/// project and feeds the results through the [`StatusReconciler`].
pub struct ReconcilerRunner {
    config: ReconcilerConfig,
    store: Arc<dyn ProjectStore>,
    batch: Arc<dyn BatchClient>,
    reconciler: Arc<StatusReconciler>,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ReconcilerRunner {
    pub fn new(
        config: ReconcilerConfig,
        store: Arc<dyn ProjectStore>,
        batch: Arc<dyn BatchClient>,
        reconciler: Arc<StatusReconciler>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            store,
            batch,
            reconciler,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Reconciler runner already started");
            return;
        }
        info!(
            "Starting reconciler (poll interval: {}ms)",
            self.config.poll_interval_ms
        );
        self.spawn_poll_loop();
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping reconciler");
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn spawn_poll_loop(&self) {
        let store = self.store.clone();
        let batch = self.batch.clone();
        let reconciler = self.reconciler.clone();
        let running = self.running.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let batch_size = self.config.poll_batch_size;
        let not_found_grace = Duration::from_secs(self.config.not_found_grace_secs);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Reconciler poll loop shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(poll_interval) => {
                        if !running.load(Ordering::SeqCst) {
                            break;
                        }
                        if let Err(e) = Self::poll_once(&store, &batch, &reconciler, batch_size, not_found_grace).await {
                            warn!("Reconciler poll cycle failed: {}", e);
                        }
                    }
                }
            }
        });
    }

    async fn poll_once(
        store: &Arc<dyn ProjectStore>,
        batch: &Arc<dyn BatchClient>,
        reconciler: &Arc<StatusReconciler>,
        batch_size: u32,
        not_found_grace: Duration,
    ) -> Result<(), ProjectError> {
        let filter = ProjectFilter::new()
            .with_status(ProjectStatus::Processing)
            .with_limit(batch_size);
        let projects = store.list(&filter)?;
        if projects.is_empty() {
            return Ok(());
        }
        debug!("Polling {} processing projects", projects.len());

        for project in projects {
            let Some(job_id) = project.active_job_id else {
                warn!("Processing project {} has no active job id", project.id);
                continue;
            };

            let observation = match batch.job_status(&job_id).await {
                Ok(status) => match status.state {
                    JobState::Succeeded => Some(Observation::Succeeded { outputs: vec![] }),
                    JobState::Failed => Some(Observation::Failed {
                        reason: status
                            .message
                            .unwrap_or_else(|| "Batch job failed".to_string()),
                    }),
                    _ => None,
                },
                // The job is gone from the service; the run can never
                // complete, so resolve the project as failed. A claim
                // younger than the grace period may still be inside the
                // submission round-trip, in which case the job simply
                // is not visible yet.
                Err(BatchError::JobNotFound(_)) => {
                    let claim_age = chrono::Utc::now().signed_duration_since(project.updated_at);
                    // A negative age means clock skew; treat it as young.
                    let within_grace = claim_age
                        .to_std()
                        .map(|age| age < not_found_grace)
                        .unwrap_or(true);
                    if within_grace {
                        debug!(
                            "Batch job {} for project {} not visible yet, deferring",
                            job_id, project.id
                        );
                        continue;
                    }
                    warn!(
                        "Batch job {} for project {} no longer exists",
                        job_id, project.id
                    );
                    Some(Observation::Failed {
                        reason: "Batch job no longer exists".to_string(),
                    })
                }
                Err(e) => {
                    warn!("Failed to poll job {}: {}", job_id, e);
                    None
                }
            };

            if let Some(observation) = observation {
                if let Err(e) = reconciler.reconcile(&job_id, observation) {
                    warn!("Failed to reconcile job {}: {}", job_id, e);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::batch::{
        BatchJobSpec, JobStatus, JobSubmitter, JobTemplate, LogDestination, ProvisioningModel,
        SubmittedJob,
    };
    use crate::planner::PlannerConfig;
    use crate::project::{
        CreateProjectRequest, ProcessingOptions, ProjectChanges, SqliteProjectStore,
    };
    use crate::testing::MockBatchClient;

    /// Blocks submissions until released and never knows any job, the
    /// way the real service looks mid-submission.
    struct StallingBatchClient {
        gate: Arc<Notify>,
        submitted: Mutex<Vec<BatchJobSpec>>,
    }

    #[async_trait]
    impl BatchClient for StallingBatchClient {
        async fn submit(&self, spec: &BatchJobSpec) -> Result<SubmittedJob, BatchError> {
            self.gate.notified().await;
            self.submitted.lock().unwrap().push(spec.clone());
            Ok(SubmittedJob {
                job_id: spec.job_id.clone(),
                resource_name: format!("stalled/jobs/{}", spec.job_id),
            })
        }

        async fn job_status(&self, job_id: &str) -> Result<JobStatus, BatchError> {
            Err(BatchError::JobNotFound(job_id.to_string()))
        }
    }

    fn test_template() -> JobTemplate {
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

    fn processing_project(store: &SqliteProjectStore, job_id: &str) -> String {
        let project = store.create(CreateProjectRequest::default()).unwrap();
        store
            .update_if_version(
                &project.id,
                0,
                ProjectChanges::new()
                    .status(ProjectStatus::Processing)
                    .files_count(5)
                    .active_job_id(job_id),
            )
            .unwrap();
        project.id
    }

    #[tokio::test]
    async fn test_poll_once_resolves_terminal_jobs() {
        let store: Arc<SqliteProjectStore> = Arc::new(SqliteProjectStore::in_memory().unwrap());
        let batch = Arc::new(MockBatchClient::new());
        let reconciler = Arc::new(StatusReconciler::new(store.clone()));

        let done = processing_project(&store, "job-done");
        let failed = processing_project(&store, "job-failed");
        let running = processing_project(&store, "job-running");
        batch.set_job_state("job-done", JobState::Succeeded, None);
        batch.set_job_state("job-failed", JobState::Failed, Some("Out of memory"));
        batch.set_job_state("job-running", JobState::Running, None);

        let store_dyn: Arc<dyn ProjectStore> = store.clone();
        let batch_dyn: Arc<dyn BatchClient> = batch.clone();
        ReconcilerRunner::poll_once(&store_dyn, &batch_dyn, &reconciler, 50, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(
            store.get(&done).unwrap().unwrap().status,
            ProjectStatus::Completed
        );
        let failed = store.get(&failed).unwrap().unwrap();
        assert_eq!(failed.status, ProjectStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("Out of memory"));
        assert_eq!(
            store.get(&running).unwrap().unwrap().status,
            ProjectStatus::Processing
        );
    }

    #[tokio::test]
    async fn test_poll_once_fails_projects_with_missing_jobs() {
        let store: Arc<SqliteProjectStore> = Arc::new(SqliteProjectStore::in_memory().unwrap());
        let batch = Arc::new(MockBatchClient::new());
        let reconciler = Arc::new(StatusReconciler::new(store.clone()));

        // No state registered for this job id: the mock reports not-found.
        let orphaned = processing_project(&store, "job-vanished");

        let store_dyn: Arc<dyn ProjectStore> = store.clone();
        let batch_dyn: Arc<dyn BatchClient> = batch.clone();
        ReconcilerRunner::poll_once(&store_dyn, &batch_dyn, &reconciler, 50, Duration::ZERO)
            .await
            .unwrap();

        let project = store.get(&orphaned).unwrap().unwrap();
        assert_eq!(project.status, ProjectStatus::Failed);
        assert!(project.error_message.unwrap().contains("no longer exists"));
    }

    #[tokio::test]
    async fn test_poll_once_defers_missing_jobs_within_grace() {
        let store: Arc<SqliteProjectStore> = Arc::new(SqliteProjectStore::in_memory().unwrap());
        let batch = Arc::new(MockBatchClient::new());
        let reconciler = Arc::new(StatusReconciler::new(store.clone()));

        // The claim was just written, so the job may still be inside
        // the submission round-trip.
        let claimed = processing_project(&store, "job-in-flight");

        let store_dyn: Arc<dyn ProjectStore> = store.clone();
        let batch_dyn: Arc<dyn BatchClient> = batch.clone();
        ReconcilerRunner::poll_once(
            &store_dyn,
            &batch_dyn,
            &reconciler,
            50,
            Duration::from_secs(60),
        )
        .await
        .unwrap();

        let project = store.get(&claimed).unwrap().unwrap();
        assert_eq!(project.status, ProjectStatus::Processing);
        assert_eq!(project.active_job_id.as_deref(), Some("job-in-flight"));
    }

    #[tokio::test]
    async fn test_poll_during_inflight_submit_leaves_project_processing() {
        let store: Arc<SqliteProjectStore> = Arc::new(SqliteProjectStore::in_memory().unwrap());
        let gate = Arc::new(Notify::new());
        let batch = Arc::new(StallingBatchClient {
            gate: gate.clone(),
            submitted: Mutex::new(Vec::new()),
        });
        let reconciler = Arc::new(StatusReconciler::new(store.clone()));

        let project = store.create(CreateProjectRequest::default()).unwrap();
        store
            .update_if_version(
                &project.id,
                0,
                ProjectChanges::new()
                    .status(ProjectStatus::Pending)
                    .files_count(10),
            )
            .unwrap();

        let submitter = Arc::new(JobSubmitter::new(
            store.clone(),
            batch.clone(),
            PlannerConfig::default(),
            test_template(),
        ));

        let submit_task = {
            let submitter = submitter.clone();
            let project_id = project.id.clone();
            tokio::spawn(async move {
                submitter.submit(&project_id, ProcessingOptions::default()).await
            })
        };

        // Wait for the claim to land while the submission call is still
        // blocked on the batch service.
        let mut claimed = false;
        for _ in 0..100 {
            if store.get(&project.id).unwrap().unwrap().status == ProjectStatus::Processing {
                claimed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(claimed, "submit never claimed the project");

        // A poll cycle inside the submission window sees a job the
        // service does not know about yet; it must not fail the project.
        let store_dyn: Arc<dyn ProjectStore> = store.clone();
        let batch_dyn: Arc<dyn BatchClient> = batch.clone();
        ReconcilerRunner::poll_once(
            &store_dyn,
            &batch_dyn,
            &reconciler,
            50,
            Duration::from_secs(60),
        )
        .await
        .unwrap();

        let mid_flight = store.get(&project.id).unwrap().unwrap();
        assert_eq!(mid_flight.status, ProjectStatus::Processing);
        assert!(mid_flight.error_message.is_none());

        gate.notify_one();
        let submitted = submit_task.await.unwrap().unwrap();
        assert_eq!(submitted.status, ProjectStatus::Processing);
        assert!(submitted.active_job_id.is_some());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let store: Arc<dyn ProjectStore> = Arc::new(SqliteProjectStore::in_memory().unwrap());
        let batch: Arc<dyn BatchClient> = Arc::new(MockBatchClient::new());
        let reconciler = Arc::new(StatusReconciler::new(store.clone()));
        let runner = ReconcilerRunner::new(
            ReconcilerConfig {
                enabled: true,
                poll_interval_ms: 10,
                poll_batch_size: 10,
                not_found_grace_secs: 60,
            },
            store,
            batch,
            reconciler,
        );

        assert!(!runner.is_running());
        runner.start();
        assert!(runner.is_running());
        runner.stop();
        assert!(!runner.is_running());
    }
}
