use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::client::BatchClient;
use super::types::{BatchError, BatchJobSpec, JobState, JobStatus, SubmittedJob};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedBatchConfig {
    /// Number of status polls before a job reaches its terminal state.
    #[serde(default = "default_polls_to_complete")]
    pub polls_to_complete: u32,
    /// When true, jobs end in `FAILED` instead of `SUCCEEDED`.
    #[serde(default)]
    pub fail_jobs: bool,
}

impl Default for SimulatedBatchConfig {
    fn default() -> Self {
        Self {
            polls_to_complete: default_polls_to_complete(),
            fail_jobs: false,
        }
    }
}

fn default_polls_to_complete() -> u32 {
    3
}

/// In-process [`BatchClient`] for local development and tests.
///
/// Jobs advance one state per status poll and never run anything.
pub struct SimulatedBatchClient {
    config: SimulatedBatchConfig,
    polls: Mutex<HashMap<String, u32>>,
}

impl SimulatedBatchClient {
    pub fn new(config: SimulatedBatchConfig) -> Self {
        Self {
            config,
            polls: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl BatchClient for SimulatedBatchClient {
    async fn submit(&self, spec: &BatchJobSpec) -> Result<SubmittedJob, BatchError> {
        let mut polls = self.polls.lock().unwrap();
        polls.insert(spec.job_id.clone(), 0);
        info!("Simulated batch job {} accepted", spec.job_id);
        Ok(SubmittedJob {
            job_id: spec.job_id.clone(),
            resource_name: format!("simulated/jobs/{}", spec.job_id),
        })
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatus, BatchError> {
        let mut polls = self.polls.lock().unwrap();
        let count = polls
            .get_mut(job_id)
            .ok_or_else(|| BatchError::JobNotFound(job_id.to_string()))?;
        *count += 1;

        let (state, message) = if *count >= self.config.polls_to_complete {
            if self.config.fail_jobs {
                (JobState::Failed, Some("Simulated job failure".to_string()))
            } else {
                (JobState::Succeeded, None)
            }
        } else if *count == 1 {
            (JobState::Scheduled, None)
        } else {
            (JobState::Running, None)
        };

        Ok(JobStatus {
            job_id: job_id.to_string(),
            state,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::types::{LogDestination, ProvisioningModel};
    use std::collections::BTreeMap;

    fn spec(job_id: &str) -> BatchJobSpec {
        BatchJobSpec {
            job_id: job_id.to_string(),
            machine_type: "e2-standard-4".to_string(),
            cpu_milli: 4000,
            memory_mib: 16384,
            boot_disk_mib: 51200,
            allowed_zones: vec![],
            max_run_duration_secs: 3600,
            max_retry_count: 0,
            provisioning_model: ProvisioningModel::Standard,
            log_destination: LogDestination::CloudLogging,
            worker_image: "worker".to_string(),
            worker_command: vec![],
            service_account: None,
            environment: BTreeMap::new(),
            labels: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_job_advances_to_success() {
        let client = SimulatedBatchClient::new(SimulatedBatchConfig {
            polls_to_complete: 3,
            fail_jobs: false,
        });
        client.submit(&spec("job-1")).await.unwrap();

        assert_eq!(
            client.job_status("job-1").await.unwrap().state,
            JobState::Scheduled
        );
        assert_eq!(
            client.job_status("job-1").await.unwrap().state,
            JobState::Running
        );
        assert_eq!(
            client.job_status("job-1").await.unwrap().state,
            JobState::Succeeded
        );
        // Terminal state is sticky.
        assert_eq!(
            client.job_status("job-1").await.unwrap().state,
            JobState::Succeeded
        );
    }

    #[tokio::test]
    async fn test_failing_client_reports_failure_with_message() {
        let client = SimulatedBatchClient::new(SimulatedBatchConfig {
            polls_to_complete: 1,
            fail_jobs: true,
        });
        client.submit(&spec("job-2")).await.unwrap();

        let status = client.job_status("job-2").await.unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert!(status.message.unwrap().contains("Simulated"));
    }

    #[tokio::test]
    async fn test_unknown_job_not_found() {
        let client = SimulatedBatchClient::new(SimulatedBatchConfig::default());
        let err = client.job_status("missing").await.unwrap_err();
        assert!(matches!(err, BatchError::JobNotFound(_)));
    }
}
