use std::sync::Arc;
use std::time::Duration;

use ortelius_core::batch::{BatchClient, JobSubmitter, JobTemplate};
use ortelius_core::config::{Config, SanitizedConfig, StorageBackend};
use ortelius_core::error::OrchestrationError;
use ortelius_core::project::ProjectStore;
use ortelius_core::reconciler::{ReconcilerRunner, StatusReconciler};
use ortelius_core::results::ResultPublisher;
use ortelius_core::storage::ObjectStore;
use ortelius_core::uploads::UploadCoordinator;

/// Shared application state handed to every handler.
pub struct AppState {
    config: Config,
    project_store: Arc<dyn ProjectStore>,
    object_store: Arc<dyn ObjectStore>,
    uploads: UploadCoordinator,
    submitter: JobSubmitter,
    reconciler: Arc<StatusReconciler>,
    results: ResultPublisher,
    runner: Option<Arc<ReconcilerRunner>>,
}

impl AppState {
    /// Wires the orchestration components around the injected stores.
    /// The reconciler runner is created here (when enabled) but only
    /// started by `main`.
    pub fn new(
        config: Config,
        project_store: Arc<dyn ProjectStore>,
        object_store: Arc<dyn ObjectStore>,
        batch_client: Arc<dyn BatchClient>,
    ) -> Result<Self, OrchestrationError> {
        let uploads = UploadCoordinator::new(
            project_store.clone(),
            object_store.clone(),
            config.storage.max_upload_size_bytes,
            Duration::from_secs(config.storage.signed_url_expiry_secs),
        );

        let template = JobTemplate {
            allowed_zones: config.batch.allowed_zones.clone(),
            max_run_duration_secs: config.batch.max_run_duration_secs,
            max_retry_count: config.batch.max_retry_count,
            provisioning_model: config.batch.provisioning_model,
            log_destination: config.batch.log_destination,
            worker_image: config.batch.worker_image.clone(),
            worker_command: config.batch.worker_command.clone(),
            service_account: config.batch.service_account.clone(),
            uploads_bucket: config.storage.uploads_bucket.clone(),
            outputs_bucket: config.storage.outputs_bucket.clone(),
        };
        let submitter = JobSubmitter::new(
            project_store.clone(),
            batch_client.clone(),
            config.planner.clone(),
            template,
        );

        let reconciler = Arc::new(StatusReconciler::new(project_store.clone()));
        let results = ResultPublisher::new(
            project_store.clone(),
            object_store.clone(),
            &config.results,
        )?;

        let runner = config.reconciler.enabled.then(|| {
            Arc::new(ReconcilerRunner::new(
                config.reconciler.clone(),
                project_store.clone(),
                batch_client.clone(),
                reconciler.clone(),
            ))
        });

        Ok(Self {
            config,
            project_store,
            object_store,
            uploads,
            submitter,
            reconciler,
            results,
            runner,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn project_store(&self) -> &Arc<dyn ProjectStore> {
        &self.project_store
    }

    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.object_store
    }

    pub fn uploads(&self) -> &UploadCoordinator {
        &self.uploads
    }

    pub fn submitter(&self) -> &JobSubmitter {
        &self.submitter
    }

    pub fn reconciler(&self) -> &StatusReconciler {
        &self.reconciler
    }

    pub fn results(&self) -> &ResultPublisher {
        &self.results
    }

    pub fn runner(&self) -> Option<&Arc<ReconcilerRunner>> {
        self.runner.as_ref()
    }

    /// The dev storage PUT route is only mounted for the memory backend.
    pub fn dev_storage_enabled(&self) -> bool {
        self.config.storage.backend == StorageBackend::Memory
    }
}
