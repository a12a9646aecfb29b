use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::types::{BatchError, BatchJobSpec, JobState, JobStatus, SubmittedJob};
use crate::metrics;

/// Submission and polling interface to the batch compute service.
#[async_trait]
pub trait BatchClient: Send + Sync {
    async fn submit(&self, spec: &BatchJobSpec) -> Result<SubmittedJob, BatchError>;

    async fn job_status(&self, job_id: &str) -> Result<JobStatus, BatchError>;
}

/// Connection settings for the cloud batch backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudBatchConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Cloud project hosting the batch jobs.
    pub project: String,
    pub region: String,
    /// OAuth bearer token issued by the deployment environment.
    pub access_token: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://batch.googleapis.com".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// [`BatchClient`] speaking the batch v1 REST API.
pub struct HttpBatchClient {
    client: reqwest::Client,
    config: CloudBatchConfig,
}

#[derive(Debug, Deserialize)]
struct JobResource {
    name: Option<String>,
    status: Option<JobResourceStatus>,
}

#[derive(Debug, Deserialize)]
struct JobResourceStatus {
    state: Option<String>,
    #[serde(rename = "statusEvents", default)]
    status_events: Vec<StatusEvent>,
}

#[derive(Debug, Deserialize)]
struct StatusEvent {
    description: Option<String>,
}

impl HttpBatchClient {
    pub fn new(config: CloudBatchConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");
        Self { client, config }
    }

    fn jobs_base(&self) -> String {
        format!(
            "{}/v1/projects/{}/locations/{}/jobs",
            self.config.api_base.trim_end_matches('/'),
            self.config.project,
            self.config.region
        )
    }

    fn map_error(err: reqwest::Error) -> BatchError {
        if err.is_timeout() {
            BatchError::Timeout
        } else if err.is_connect() {
            BatchError::Api(format!("Connection failed: {}", err))
        } else {
            BatchError::Api(err.to_string())
        }
    }

    fn job_body(spec: &BatchJobSpec) -> serde_json::Value {
        let zones: Vec<String> = spec
            .allowed_zones
            .iter()
            .map(|z| {
                if z.starts_with("zones/") {
                    z.clone()
                } else {
                    format!("zones/{}", z)
                }
            })
            .collect();

        let mut allocation_policy = json!({
            "instances": [{
                "policy": {
                    "machineType": spec.machine_type,
                    "provisioningModel": spec.provisioning_model.as_api_str(),
                }
            }],
            "location": { "allowedLocations": zones },
        });
        if let Some(account) = &spec.service_account {
            allocation_policy["serviceAccount"] = json!({ "email": account });
        }

        json!({
            "taskGroups": [{
                "taskCount": 1,
                "taskSpec": {
                    "runnables": [{
                        "container": {
                            "imageUri": spec.worker_image,
                            "commands": spec.worker_command,
                        }
                    }],
                    "computeResource": {
                        "cpuMilli": spec.cpu_milli,
                        "memoryMib": spec.memory_mib,
                        "bootDiskMib": spec.boot_disk_mib,
                    },
                    "maxRetryCount": spec.max_retry_count,
                    "maxRunDuration": format!("{}s", spec.max_run_duration_secs),
                    "environment": { "variables": spec.environment },
                }
            }],
            "allocationPolicy": allocation_policy,
            "labels": spec.labels,
            "logsPolicy": { "destination": spec.log_destination.as_api_str() },
        })
    }
}

#[async_trait]
impl BatchClient for HttpBatchClient {
    async fn submit(&self, spec: &BatchJobSpec) -> Result<SubmittedJob, BatchError> {
        let url = format!(
            "{}?jobId={}",
            self.jobs_base(),
            urlencoding::encode(&spec.job_id)
        );
        let body = Self::job_body(spec);
        debug!("Submitting batch job {} to {}", spec.job_id, url);

        let timer = metrics::BATCH_REQUEST_DURATION
            .with_label_values(&["submit"])
            .start_timer();
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.access_token)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_error)?;
        timer.observe_duration();

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(BatchError::Rejected(format!("{}: {}", status, body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BatchError::Api(format!("{}: {}", status, body)));
        }

        let resource: JobResource = response.json().await.map_err(Self::map_error)?;
        let resource_name = resource
            .name
            .unwrap_or_else(|| format!("{}/{}", self.jobs_base(), spec.job_id));
        info!("Submitted batch job {} as {}", spec.job_id, resource_name);
        Ok(SubmittedJob {
            job_id: spec.job_id.clone(),
            resource_name,
        })
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatus, BatchError> {
        let url = format!("{}/{}", self.jobs_base(), urlencoding::encode(job_id));

        let timer = metrics::BATCH_REQUEST_DURATION
            .with_label_values(&["job_status"])
            .start_timer();
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(Self::map_error)?;
        timer.observe_duration();

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(BatchError::JobNotFound(job_id.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BatchError::Api(format!("{}: {}", status, body)));
        }

        let resource: JobResource = response.json().await.map_err(Self::map_error)?;
        let (state, message) = match resource.status {
            Some(job_status) => {
                let state = job_status
                    .state
                    .as_deref()
                    .map(JobState::from_api)
                    .unwrap_or(JobState::Unspecified);
                let message = job_status
                    .status_events
                    .into_iter()
                    .rev()
                    .find_map(|event| event.description);
                (state, message)
            }
            None => (JobState::Unspecified, None),
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

    fn spec() -> BatchJobSpec {
        let mut environment = BTreeMap::new();
        environment.insert("PROJECT_ID".to_string(), "abc".to_string());
        let mut labels = BTreeMap::new();
        labels.insert("type".to_string(), "photogrammetry".to_string());

        BatchJobSpec {
            job_id: "ortho-12345678-20260831120000".to_string(),
            machine_type: "e2-standard-8".to_string(),
            cpu_milli: 8000,
            memory_mib: 32768,
            boot_disk_mib: 51200,
            allowed_zones: vec!["europe-west1-b".to_string(), "zones/europe-west1-c".to_string()],
            max_run_duration_secs: 14400,
            max_retry_count: 1,
            provisioning_model: ProvisioningModel::Spot,
            log_destination: LogDestination::CloudLogging,
            worker_image: "ghcr.io/example/worker:latest".to_string(),
            worker_command: vec!["/app/run.sh".to_string()],
            service_account: Some("worker@example.iam".to_string()),
            environment,
            labels,
        }
    }

    #[test]
    fn test_job_body_shape() {
        let body = HttpBatchClient::job_body(&spec());

        assert_eq!(body["taskGroups"][0]["taskCount"], 1);
        let task_spec = &body["taskGroups"][0]["taskSpec"];
        assert_eq!(task_spec["computeResource"]["cpuMilli"], 8000);
        assert_eq!(task_spec["computeResource"]["bootDiskMib"], 51200);
        assert_eq!(task_spec["maxRunDuration"], "14400s");
        assert_eq!(task_spec["environment"]["variables"]["PROJECT_ID"], "abc");
        assert_eq!(
            task_spec["runnables"][0]["container"]["imageUri"],
            "ghcr.io/example/worker:latest"
        );

        let allocation = &body["allocationPolicy"];
        assert_eq!(
            allocation["instances"][0]["policy"]["provisioningModel"],
            "SPOT"
        );
        assert_eq!(
            allocation["location"]["allowedLocations"],
            serde_json::json!(["zones/europe-west1-b", "zones/europe-west1-c"])
        );
        assert_eq!(allocation["serviceAccount"]["email"], "worker@example.iam");

        assert_eq!(body["labels"]["type"], "photogrammetry");
        assert_eq!(body["logsPolicy"]["destination"], "CLOUD_LOGGING");
    }

    #[test]
    fn test_job_body_without_service_account() {
        let mut spec = spec();
        spec.service_account = None;
        let body = HttpBatchClient::job_body(&spec);
        assert!(body["allocationPolicy"]["serviceAccount"].is_null());
    }
}
