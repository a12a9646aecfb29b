use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningModel {
    #[default]
    Standard,
    Spot,
}

impl ProvisioningModel {
    pub fn as_api_str(&self) -> &'static str {
        match self {
            ProvisioningModel::Standard => "STANDARD",
            ProvisioningModel::Spot => "SPOT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogDestination {
    #[default]
    CloudLogging,
    Path,
}

impl LogDestination {
    pub fn as_api_str(&self) -> &'static str {
        match self {
            LogDestination::CloudLogging => "CLOUD_LOGGING",
            LogDestination::Path => "PATH",
        }
    }
}

/// Lifecycle state of a batch job as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Scheduled,
    Running,
    Succeeded,
    Failed,
    Unspecified,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    /// Parses the service's SCREAMING_CASE state names; unknown values
    /// map to `Unspecified` so new states do not break polling.
    pub fn from_api(state: &str) -> Self {
        match state {
            "QUEUED" => JobState::Queued,
            "SCHEDULED" => JobState::Scheduled,
            "RUNNING" => JobState::Running,
            "SUCCEEDED" => JobState::Succeeded,
            "FAILED" => JobState::Failed,
            _ => JobState::Unspecified,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    pub job_id: String,
    pub state: JobState,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedJob {
    pub job_id: String,
    /// Fully qualified resource name assigned by the service.
    pub resource_name: String,
}

/// Full description of a compute job to submit.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchJobSpec {
    pub job_id: String,
    pub machine_type: String,
    pub cpu_milli: u32,
    pub memory_mib: u32,
    pub boot_disk_mib: u64,
    pub allowed_zones: Vec<String>,
    pub max_run_duration_secs: u64,
    pub max_retry_count: u32,
    pub provisioning_model: ProvisioningModel,
    pub log_destination: LogDestination,
    pub worker_image: String,
    pub worker_command: Vec<String>,
    pub service_account: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Error)]
pub enum BatchError {
    /// The service refused the job definition; retrying the same spec
    /// will not help.
    #[error("Batch service rejected the job: {0}")]
    Rejected(String),

    #[error("Batch job not found: {0}")]
    JobNotFound(String),

    #[error("Batch service error: {0}")]
    Api(String),

    #[error("Batch request timed out")]
    Timeout,
}
