//! Batch compute job submission and status polling.

mod client;
mod simulated;
mod submitter;
mod types;

pub use client::{BatchClient, CloudBatchConfig, HttpBatchClient};
pub use simulated::{SimulatedBatchClient, SimulatedBatchConfig};
pub use submitter::{JobSubmitter, JobTemplate, MIN_FILES_FOR_PROCESSING};
pub use types::{
    BatchError, BatchJobSpec, JobState, JobStatus, LogDestination, ProvisioningModel, SubmittedJob,
};
