//! Signed download links for completed projects.

use std::sync::Arc;
use std::time::Duration;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::OrchestrationError;
use crate::project::{is_canonical_project_id, ProjectStatus, ProjectStore};
use crate::storage::{Bucket, ObjectStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsConfig {
    /// Download links must match this pattern or they are withheld.
    #[serde(default = "default_approved_url_pattern")]
    pub approved_url_pattern: String,
    #[serde(default = "default_download_url_expiry_secs")]
    pub download_url_expiry_secs: u64,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            approved_url_pattern: default_approved_url_pattern(),
            download_url_expiry_secs: default_download_url_expiry_secs(),
        }
    }
}

fn default_approved_url_pattern() -> String {
    r"^https://storage\.googleapis\.com/".to_string()
}

fn default_download_url_expiry_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadReference {
    pub filename: String,
    pub size_mb: f64,
    pub url: String,
}

/// Lists result artifacts for completed projects as signed download URLs.
pub struct ResultPublisher {
    store: Arc<dyn ProjectStore>,
    objects: Arc<dyn ObjectStore>,
    approved_url: Regex,
    url_expiry: Duration,
}

impl ResultPublisher {
    pub fn new(
        store: Arc<dyn ProjectStore>,
        objects: Arc<dyn ObjectStore>,
        config: &ResultsConfig,
    ) -> Result<Self, OrchestrationError> {
        let approved_url = Regex::new(&config.approved_url_pattern).map_err(|e| {
            OrchestrationError::Validation(format!("Invalid approved URL pattern: {}", e))
        })?;
        Ok(Self {
            store,
            objects,
            approved_url,
            url_expiry: Duration::from_secs(config.download_url_expiry_secs),
        })
    }

    pub async fn list_results(
        &self,
        project_id: &str,
    ) -> Result<Vec<DownloadReference>, OrchestrationError> {
        if !is_canonical_project_id(project_id) {
            return Err(OrchestrationError::Validation(format!(
                "Invalid project id: {}",
                project_id
            )));
        }
        let project = self
            .store
            .get(project_id)?
            .ok_or_else(|| OrchestrationError::NotFound(project_id.to_string()))?;
        if project.status != ProjectStatus::Completed {
            return Err(OrchestrationError::Precondition(format!(
                "Results are only available for completed projects (status: {})",
                project.status
            )));
        }

        let prefix = format!("{}/", project_id);
        let objects = self.objects.list(Bucket::Outputs, &prefix).await?;

        let mut references = Vec::with_capacity(objects.len());
        for object in objects {
            let url = self
                .objects
                .signed_download_url(Bucket::Outputs, &object.name, self.url_expiry)
                .await?;
            if !self.approved_url.is_match(&url) {
                warn!(
                    "Withholding result URL outside the approved storage domain for project {}",
                    project_id
                );
                continue;
            }
            let filename = object
                .name
                .rsplit('/')
                .next()
                .unwrap_or(&object.name)
                .to_string();
            let size_mb = (object.size as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0;
            references.push(DownloadReference {
                filename,
                size_mb,
                url,
            });
        }
        Ok(references)
    }
}
