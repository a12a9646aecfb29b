use thiserror::Error;

use super::types::{OutputArtifact, ProcessingOptions, Project, ProjectStatus};

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("Project not found: {0}")]
    NotFound(String),

    #[error("Version conflict on project {project_id}: expected {expected}, found {actual}")]
    VersionConflict {
        project_id: String,
        expected: i64,
        actual: i64,
    },

    #[error("Cannot {operation} project {project_id} in status {current_status}")]
    InvalidState {
        project_id: String,
        current_status: String,
        operation: String,
    },

    #[error("Database error: {0}")]
    Database(String),
}

#[derive(Debug, Clone, Default)]
pub struct CreateProjectRequest {
    /// Display name; a timestamp-derived name is assigned when empty.
    pub name: String,
}

/// Field updates applied by [`ProjectStore::update_if_version`].
///
/// Unset fields are left untouched. Nullable columns distinguish
/// "leave alone" from "set to NULL" via the nested `Option`.
#[derive(Debug, Clone, Default)]
pub struct ProjectChanges {
    pub(crate) status: Option<ProjectStatus>,
    pub(crate) files_count: Option<u32>,
    pub(crate) progress: Option<u8>,
    pub(crate) options: Option<Option<ProcessingOptions>>,
    pub(crate) error_message: Option<Option<String>>,
    pub(crate) outputs: Option<Vec<OutputArtifact>>,
    pub(crate) active_job_id: Option<Option<String>>,
}

impl ProjectChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: ProjectStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn files_count(mut self, count: u32) -> Self {
        self.files_count = Some(count);
        self
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn options(mut self, options: Option<ProcessingOptions>) -> Self {
        self.options = Some(options);
        self
    }

    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(Some(message.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error_message = Some(None);
        self
    }

    pub fn outputs(mut self, outputs: Vec<OutputArtifact>) -> Self {
        self.outputs = Some(outputs);
        self
    }

    pub fn active_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.active_job_id = Some(Some(job_id.into()));
        self
    }

    pub fn clear_active_job(mut self) -> Self {
        self.active_job_id = Some(None);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.files_count.is_none()
            && self.progress.is_none()
            && self.options.is_none()
            && self.error_message.is_none()
            && self.outputs.is_none()
            && self.active_job_id.is_none()
    }
}

/// Query filter for listing projects.
#[derive(Debug, Clone, Default)]
pub struct ProjectFilter {
    pub status: Option<ProjectStatus>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ProjectFilter {
    pub const DEFAULT_LIMIT: u32 = 100;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: ProjectStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Persistence interface for projects.
pub trait ProjectStore: Send + Sync {
    fn create(&self, request: CreateProjectRequest) -> Result<Project, ProjectError>;

    fn get(&self, id: &str) -> Result<Option<Project>, ProjectError>;

    /// Lists projects ordered by creation time, newest first.
    fn list(&self, filter: &ProjectFilter) -> Result<Vec<Project>, ProjectError>;

    fn count(&self, filter: &ProjectFilter) -> Result<i64, ProjectError>;

    /// Looks up the project currently owning the given batch job, if any.
    fn find_by_job(&self, job_id: &str) -> Result<Option<Project>, ProjectError>;

    /// Applies `changes` only if the stored version equals
    /// `expected_version`, bumping the version on success. Returns
    /// [`ProjectError::VersionConflict`] when another writer got there
    /// first.
    fn update_if_version(
        &self,
        id: &str,
        expected_version: i64,
        changes: ProjectChanges,
    ) -> Result<Project, ProjectError>;
}
