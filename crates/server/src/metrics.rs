//! HTTP metrics registry and Prometheus text exposition.

use once_cell::sync::Lazy;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use regex_lite::Regex;
use tracing::warn;

use crate::state::AppState;
use ortelius_core::project::{ProjectFilter, ProjectStatus};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static HTTP_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ortelius_http_requests_total", "HTTP requests processed"),
        &["method", "path", "status"],
    )
    .expect("Failed to create HTTP requests counter")
});

pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "ortelius_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        &["method", "path"],
    )
    .expect("Failed to create HTTP duration histogram")
});

pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "ortelius_http_requests_in_flight",
        "HTTP requests currently being served",
    )
    .expect("Failed to create in-flight gauge")
});

pub static PROJECTS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("ortelius_projects", "Projects by lifecycle status"),
        &["status"],
    )
    .expect("Failed to create projects gauge")
});

pub static RECONCILER_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "ortelius_reconciler_running",
        "Whether the reconciler poll loop is running",
    )
    .expect("Failed to create reconciler gauge")
});

/// Registers server and core collectors. Safe to call more than once.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(HTTP_REQUESTS.clone()),
        Box::new(HTTP_REQUEST_DURATION.clone()),
        Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()),
        Box::new(PROJECTS_BY_STATUS.clone()),
        Box::new(RECONCILER_RUNNING.clone()),
    ];
    for collector in collectors.into_iter().chain(ortelius_core::metrics::all_metrics()) {
        let _ = REGISTRY.register(collector);
    }
}

/// Refreshes gauges derived from current state before scraping.
pub fn collect_dynamic_metrics(state: &AppState) {
    for status in [
        ProjectStatus::Created,
        ProjectStatus::Pending,
        ProjectStatus::Processing,
        ProjectStatus::Completed,
        ProjectStatus::Failed,
    ] {
        match state
            .project_store()
            .count(&ProjectFilter::new().with_status(status))
        {
            Ok(count) => PROJECTS_BY_STATUS
                .with_label_values(&[status.as_str()])
                .set(count),
            Err(e) => warn!("Failed to count {} projects: {}", status, e),
        }
    }

    let running = state.runner().map(|r| r.is_running()).unwrap_or(false);
    RECONCILER_RUNNING.set(if running { 1 } else { 0 });
}

pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    encoder.encode_to_string(&REGISTRY.gather())
}

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("Invalid UUID regex")
});

/// Collapses volatile path segments so metric label cardinality stays
/// bounded.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if UUID_RE.is_match(segment) {
                "{id}"
            } else if !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()) {
                "{n}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
