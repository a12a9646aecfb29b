//! Signed-URL upload authorization and upload finalization.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::OrchestrationError;
use crate::metrics;
use crate::project::{
    is_canonical_project_id, Project, ProjectChanges, ProjectError, ProjectStatus, ProjectStore,
};
use crate::storage::{Bucket, ObjectStore};

/// Image formats accepted for upload.
pub const ALLOWED_CONTENT_TYPES: [&str; 5] = [
    "image/jpeg",
    "image/png",
    "image/tiff",
    "image/gif",
    "image/webp",
];

const MAX_FILENAME_LEN: usize = 255;
const FINALIZE_RETRIES: u32 = 3;

#[derive(Debug, Clone, Serialize)]
pub struct UploadAuthorization {
    pub upload_url: String,
    /// Object filename after sanitization; the client needs it to
    /// correlate the upload with its local file.
    pub file_id: String,
    pub expires_in_secs: u64,
}

/// Issues signed upload URLs and finalizes upload sessions.
pub struct UploadCoordinator {
    store: Arc<dyn ProjectStore>,
    objects: Arc<dyn ObjectStore>,
    max_file_size_bytes: u64,
    url_expiry: Duration,
}

impl UploadCoordinator {
    pub fn new(
        store: Arc<dyn ProjectStore>,
        objects: Arc<dyn ObjectStore>,
        max_file_size_bytes: u64,
        url_expiry: Duration,
    ) -> Self {
        Self {
            store,
            objects,
            max_file_size_bytes,
            url_expiry,
        }
    }

    /// Validates the request and returns a signed PUT URL for the object.
    ///
    /// No project state changes here; the object count is only authoritative
    /// at finalization, when storage is listed.
    pub async fn authorize_upload(
        &self,
        project_id: &str,
        filename: &str,
        content_type: &str,
        file_size: u64,
    ) -> Result<UploadAuthorization, OrchestrationError> {
        let result = self
            .authorize_inner(project_id, filename, content_type, file_size)
            .await;
        let label = if result.is_ok() { "issued" } else { "rejected" };
        metrics::UPLOAD_AUTHORIZATIONS.with_label_values(&[label]).inc();
        result
    }

    async fn authorize_inner(
        &self,
        project_id: &str,
        filename: &str,
        content_type: &str,
        file_size: u64,
    ) -> Result<UploadAuthorization, OrchestrationError> {
        if !is_canonical_project_id(project_id) {
            return Err(OrchestrationError::Validation(format!(
                "Invalid project id: {}",
                project_id
            )));
        }
        if !ALLOWED_CONTENT_TYPES.contains(&content_type) {
            return Err(OrchestrationError::Validation(format!(
                "Unsupported content type: {}",
                content_type
            )));
        }
        if file_size == 0 {
            return Err(OrchestrationError::Validation(
                "File size must be greater than zero".to_string(),
            ));
        }
        if file_size > self.max_file_size_bytes {
            return Err(OrchestrationError::Validation(format!(
                "File size {} exceeds the limit of {} bytes",
                file_size, self.max_file_size_bytes
            )));
        }

        let project = self
            .store
            .get(project_id)?
            .ok_or_else(|| OrchestrationError::NotFound(project_id.to_string()))?;
        if !project.status.accepts_uploads() {
            return Err(OrchestrationError::Precondition(format!(
                "Project {} no longer accepts uploads (status: {})",
                project_id, project.status
            )));
        }

        let file_id = sanitize_filename(filename);
        let object_path = format!("{}/{}", project_id, file_id);
        let upload_url = self
            .objects
            .signed_upload_url(Bucket::Uploads, &object_path, content_type, self.url_expiry)
            .await?;

        debug!(
            "Issued upload URL for project {} object {}",
            project_id, object_path
        );
        Ok(UploadAuthorization {
            upload_url,
            file_id,
            expires_in_secs: self.url_expiry.as_secs(),
        })
    }

    /// Counts the objects actually present in storage and moves the
    /// project to `pending`. Storage is the source of truth here: the
    /// count never relies on how many URLs were issued.
    pub async fn finalize(&self, project_id: &str) -> Result<Project, OrchestrationError> {
        if !is_canonical_project_id(project_id) {
            return Err(OrchestrationError::Validation(format!(
                "Invalid project id: {}",
                project_id
            )));
        }

        let mut attempt = 0;
        loop {
            let project = self
                .store
                .get(project_id)?
                .ok_or_else(|| OrchestrationError::NotFound(project_id.to_string()))?;
            if !project.status.accepts_uploads() {
                return Err(OrchestrationError::Precondition(format!(
                    "Cannot finalize project {} in status {}",
                    project_id, project.status
                )));
            }

            let prefix = format!("{}/", project_id);
            let objects = self.objects.list(Bucket::Uploads, &prefix).await?;
            let files_count = objects.len() as u32;

            let changes = ProjectChanges::new()
                .status(ProjectStatus::Pending)
                .files_count(files_count);
            match self.store.update_if_version(project_id, project.version, changes) {
                Ok(updated) => {
                    info!(
                        "Finalized uploads for project {}: {} files",
                        project_id, files_count
                    );
                    return Ok(updated);
                }
                Err(ProjectError::VersionConflict { .. }) if attempt + 1 < FINALIZE_RETRIES => {
                    attempt += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Reduces an arbitrary client-supplied filename to a safe object name.
///
/// Directory components and null bytes are stripped, characters outside
/// a conservative allowlist become underscores, parent-directory runs
/// collapse, and the result is capped at 255 characters with the
/// extension preserved.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");

    let mut cleaned: String = base
        .chars()
        .filter(|c| *c != '\0')
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();

    while cleaned.contains("..") {
        cleaned = cleaned.replace("..", ".");
    }
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == ' ');

    if cleaned.is_empty() {
        return "unnamed_file".to_string();
    }
    if cleaned.len() <= MAX_FILENAME_LEN {
        return cleaned.to_string();
    }

    // All non-ASCII was replaced above, so byte slicing is safe.
    match cleaned.rfind('.') {
        Some(idx) if idx > 0 && cleaned.len() - idx < MAX_FILENAME_LEN => {
            let ext = &cleaned[idx..];
            format!("{}{}", &cleaned[..MAX_FILENAME_LEN - ext.len()], ext)
        }
        _ => cleaned[..MAX_FILENAME_LEN].to_string(),
    }
}
