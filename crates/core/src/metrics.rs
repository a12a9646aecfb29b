//! Core orchestration metrics.
//!
//! Collectors are defined here and registered by the server's metrics
//! registry at startup.

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts};

/// Job submission attempts by result (submitted, conflict, failed).
pub static JOB_SUBMISSIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ortelius_job_submissions_total",
            "Batch job submission attempts by result",
        ),
        &["result"],
    )
    .expect("Failed to create job submissions counter")
});

/// Machine tier chosen per submitted job.
pub static PLANNER_TIER_SELECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ortelius_planner_tier_selected_total",
            "Machine tier selections by tier name",
        ),
        &["tier"],
    )
    .expect("Failed to create planner tier counter")
});

/// Upload URL requests by result (issued, rejected).
pub static UPLOAD_AUTHORIZATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ortelius_upload_authorizations_total",
            "Signed upload URL requests by result",
        ),
        &["result"],
    )
    .expect("Failed to create upload authorizations counter")
});

/// Reconciliation outcomes (progress, completed, failed, ignored).
pub static RECONCILE_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ortelius_reconcile_outcomes_total",
            "Job observation reconciliation outcomes",
        ),
        &["outcome"],
    )
    .expect("Failed to create reconcile outcomes counter")
});

/// Latency of batch service calls by operation.
pub static BATCH_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "ortelius_batch_request_duration_seconds",
            "Batch service request duration in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["operation"],
    )
    .expect("Failed to create batch request histogram")
});

/// All core collectors, for registration in the server's registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(JOB_SUBMISSIONS.clone()),
        Box::new(PLANNER_TIER_SELECTED.clone()),
        Box::new(UPLOAD_AUTHORIZATIONS.clone()),
        Box::new(RECONCILE_OUTCOMES.clone()),
        Box::new(BATCH_REQUEST_DURATION.clone()),
    ]
}
