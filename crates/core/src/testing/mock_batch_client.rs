use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::batch::{BatchClient, BatchError, BatchJobSpec, JobState, JobStatus, SubmittedJob};

/// Mock [`BatchClient`] that records submissions and serves canned
/// job states.
///
/// Status for unregistered jobs is reported as not-found, which also
/// covers the vanished-job path.
pub struct MockBatchClient {
    submitted: Mutex<Vec<BatchJobSpec>>,
    fail_submissions: AtomicBool,
    states: Mutex<HashMap<String, JobStatus>>,
}

impl MockBatchClient {
    pub fn new() -> Self {
        Self {
            submitted: Mutex::new(Vec::new()),
            fail_submissions: AtomicBool::new(false),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// All submissions fail with an API error.
    pub fn failing_submissions(self) -> Self {
        self.fail_submissions.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_fail_submissions(&self, fail: bool) {
        self.fail_submissions.store(fail, Ordering::SeqCst);
    }

    pub fn set_job_state(&self, job_id: &str, state: JobState, message: Option<&str>) {
        self.states.lock().unwrap().insert(
            job_id.to_string(),
            JobStatus {
                job_id: job_id.to_string(),
                state,
                message: message.map(|m| m.to_string()),
            },
        );
    }

    pub fn submitted_specs(&self) -> Vec<BatchJobSpec> {
        self.submitted.lock().unwrap().clone()
    }
}

impl Default for MockBatchClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BatchClient for MockBatchClient {
    async fn submit(&self, spec: &BatchJobSpec) -> Result<SubmittedJob, BatchError> {
        if self.fail_submissions.load(Ordering::SeqCst) {
            return Err(BatchError::Api("Mock batch outage".to_string()));
        }
        self.submitted.lock().unwrap().push(spec.clone());
        Ok(SubmittedJob {
            job_id: spec.job_id.clone(),
            resource_name: format!("mock/jobs/{}", spec.job_id),
        })
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatus, BatchError> {
        self.states
            .lock()
            .unwrap()
            .get(job_id)
            .cloned()
            .ok_or_else(|| BatchError::JobNotFound(job_id.to_string()))
    }
}
