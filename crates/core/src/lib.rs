//! Core orchestration library for the Ortelius photogrammetry service.
//!
//! Covers the full project lifecycle: project persistence, signed-URL
//! uploads, capacity planning, batch job submission, status
//! reconciliation, and result publishing. The HTTP surface lives in the
//! server crate.

pub mod batch;
pub mod config;
pub mod error;
pub mod metrics;
pub mod planner;
pub mod project;
pub mod reconciler;
pub mod results;
pub mod storage;
pub mod testing;
pub mod uploads;

pub use batch::{
    BatchClient, BatchError, BatchJobSpec, CloudBatchConfig, HttpBatchClient, JobState, JobStatus,
    JobSubmitter, JobTemplate, LogDestination, ProvisioningModel, SimulatedBatchClient,
    SimulatedBatchConfig, SubmittedJob, MIN_FILES_FOR_PROCESSING,
};
pub use config::{
    load_config, load_config_from_str, validate_config, BatchBackend, Config, ConfigError,
    SanitizedConfig, StorageBackend,
};
pub use error::OrchestrationError;
pub use planner::{plan_job, select_tier, JobPlan, MachineTier, PlannerConfig, PlannerError};
pub use project::{
    is_canonical_project_id, CreateProjectRequest, OrthoQuality, OutputArtifact,
    ProcessingOptions, Project, ProjectChanges, ProjectError, ProjectFilter, ProjectStatus,
    ProjectStore, SqliteProjectStore,
};
pub use reconciler::{
    Observation, ReconcileOutcome, ReconcilerConfig, ReconcilerRunner, StatusReconciler,
};
pub use results::{DownloadReference, ResultPublisher, ResultsConfig};
pub use storage::{
    Bucket, GcsConfig, GcsObjectStore, MemoryObjectStore, ObjectStore, StorageError, StoredObject,
};
pub use uploads::{sanitize_filename, UploadAuthorization, UploadCoordinator};
