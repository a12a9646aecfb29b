use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::batch::{CloudBatchConfig, LogDestination, ProvisioningModel, SimulatedBatchConfig};
use crate::planner::PlannerConfig;
use crate::reconciler::ReconcilerConfig;
use crate::results::ResultsConfig;
use crate::storage::GcsConfig;

/// Root configuration for the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub results: ResultsConfig,
    #[serde(default)]
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("ortelius.db")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    Gcs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_uploads_bucket")]
    pub uploads_bucket: String,
    #[serde(default = "default_outputs_bucket")]
    pub outputs_bucket: String,
    #[serde(default = "default_signed_url_expiry_secs")]
    pub signed_url_expiry_secs: u64,
    #[serde(default = "default_max_upload_size_bytes")]
    pub max_upload_size_bytes: u64,
    pub gcs: Option<GcsConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            uploads_bucket: default_uploads_bucket(),
            outputs_bucket: default_outputs_bucket(),
            signed_url_expiry_secs: default_signed_url_expiry_secs(),
            max_upload_size_bytes: default_max_upload_size_bytes(),
            gcs: None,
        }
    }
}

fn default_uploads_bucket() -> String {
    "ortelius-uploads".to_string()
}

fn default_outputs_bucket() -> String {
    "ortelius-outputs".to_string()
}

fn default_signed_url_expiry_secs() -> u64 {
    3600
}

fn default_max_upload_size_bytes() -> u64 {
    100 * 1024 * 1024
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchBackend {
    #[default]
    Simulated,
    Cloud,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default)]
    pub backend: BatchBackend,
    #[serde(default)]
    pub allowed_zones: Vec<String>,
    #[serde(default = "default_max_run_duration_secs")]
    pub max_run_duration_secs: u64,
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,
    #[serde(default)]
    pub provisioning_model: ProvisioningModel,
    #[serde(default)]
    pub log_destination: LogDestination,
    #[serde(default = "default_worker_image")]
    pub worker_image: String,
    #[serde(default = "default_worker_command")]
    pub worker_command: Vec<String>,
    pub service_account: Option<String>,
    pub cloud: Option<CloudBatchConfig>,
    #[serde(default)]
    pub simulated: SimulatedBatchConfig,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            backend: BatchBackend::default(),
            allowed_zones: Vec::new(),
            max_run_duration_secs: default_max_run_duration_secs(),
            max_retry_count: default_max_retry_count(),
            provisioning_model: ProvisioningModel::default(),
            log_destination: LogDestination::default(),
            worker_image: default_worker_image(),
            worker_command: default_worker_command(),
            service_account: None,
            cloud: None,
            simulated: SimulatedBatchConfig::default(),
        }
    }
}

fn default_max_run_duration_secs() -> u64 {
    14400
}

fn default_max_retry_count() -> u32 {
    1
}

fn default_worker_image() -> String {
    "ghcr.io/ortelius-maps/ortelius-worker:latest".to_string()
}

fn default_worker_command() -> Vec<String> {
    vec!["/app/run_odm.sh".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Either a list of explicit origins or a single "*".
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
        }
    }
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

/// Config view safe to expose over the API: credentials are reduced to
/// presence flags.
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: SanitizedStorageConfig,
    pub batch: SanitizedBatchConfig,
    pub planner: PlannerConfig,
    pub reconciler: ReconcilerConfig,
    pub results: ResultsConfig,
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedStorageConfig {
    pub backend: StorageBackend,
    pub uploads_bucket: String,
    pub outputs_bucket: String,
    pub signed_url_expiry_secs: u64,
    pub max_upload_size_bytes: u64,
    pub gcs_configured: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedBatchConfig {
    pub backend: BatchBackend,
    pub allowed_zones: Vec<String>,
    pub max_run_duration_secs: u64,
    pub max_retry_count: u32,
    pub provisioning_model: ProvisioningModel,
    pub worker_image: String,
    pub cloud_configured: bool,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            storage: SanitizedStorageConfig {
                backend: config.storage.backend,
                uploads_bucket: config.storage.uploads_bucket.clone(),
                outputs_bucket: config.storage.outputs_bucket.clone(),
                signed_url_expiry_secs: config.storage.signed_url_expiry_secs,
                max_upload_size_bytes: config.storage.max_upload_size_bytes,
                gcs_configured: config.storage.gcs.is_some(),
            },
            batch: SanitizedBatchConfig {
                backend: config.batch.backend,
                allowed_zones: config.batch.allowed_zones.clone(),
                max_run_duration_secs: config.batch.max_run_duration_secs,
                max_retry_count: config.batch.max_retry_count,
                provisioning_model: config.batch.provisioning_model,
                worker_image: config.batch.worker_image.clone(),
                cloud_configured: config.batch.cloud.is_some(),
            },
            planner: config.planner.clone(),
            reconciler: config.reconciler.clone(),
            results: config.results.clone(),
            cors: config.cors.clone(),
        }
    }
}
