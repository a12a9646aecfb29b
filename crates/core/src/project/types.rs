use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a project.
///
/// Transitions: created -> pending (finalize), pending -> processing
/// (job submission), processing -> completed | failed (reconciliation),
/// processing -> pending (rollback after a failed submission).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Created,
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Created => "created",
            ProjectStatus::Pending => "pending",
            ProjectStatus::Processing => "processing",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProjectStatus::Completed | ProjectStatus::Failed)
    }

    /// Uploads are only accepted before a compute job has been claimed.
    pub fn accepts_uploads(&self) -> bool {
        matches!(self, ProjectStatus::Created | ProjectStatus::Pending)
    }
}

impl std::str::FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(ProjectStatus::Created),
            "pending" => Ok(ProjectStatus::Pending),
            "processing" => Ok(ProjectStatus::Processing),
            "completed" => Ok(ProjectStatus::Completed),
            "failed" => Ok(ProjectStatus::Failed),
            other => Err(format!("Unknown project status: {}", other)),
        }
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orthophoto output resolution requested for a processing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrthoQuality {
    Low,
    #[default]
    Medium,
    High,
}

impl OrthoQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrthoQuality::Low => "low",
            OrthoQuality::Medium => "medium",
            OrthoQuality::High => "high",
        }
    }
}

/// Worker options captured at submission time and handed to the compute job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingOptions {
    #[serde(default)]
    pub ortho_quality: OrthoQuality,
    #[serde(default)]
    pub generate_dtm: bool,
    #[serde(default)]
    pub multispectral: bool,
}

/// A result artifact produced by a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputArtifact {
    #[serde(rename = "type")]
    pub kind: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_mb: Option<f64>,
}

/// A photogrammetry project and its processing state.
///
/// `version` is bumped on every write and checked by compare-and-swap
/// updates; it is the single serialization point for concurrent
/// transitions. `active_job_id` is set exactly while `status` is
/// `processing`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub status: ProjectStatus,
    pub files_count: u32,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ProcessingOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub outputs: Vec<OutputArtifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_job_id: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Returns true if `id` is a canonical (lowercase, hyphenated) UUIDv4.
///
/// Project ids are embedded in storage object paths and batch job names,
/// so non-canonical spellings of the same UUID are rejected rather than
/// normalized.
pub fn is_canonical_project_id(id: &str) -> bool {
    match Uuid::parse_str(id) {
        Ok(uuid) => uuid.get_version_num() == 4 && uuid.to_string() == id,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&ProjectStatus::Processing).unwrap(),
            "\"processing\""
        );
        let status: ProjectStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(status, ProjectStatus::Failed);
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!(
            "pending".parse::<ProjectStatus>().unwrap(),
            ProjectStatus::Pending
        );
        assert!("unknown".parse::<ProjectStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ProjectStatus::Completed.is_terminal());
        assert!(ProjectStatus::Failed.is_terminal());
        assert!(!ProjectStatus::Processing.is_terminal());
        assert!(!ProjectStatus::Created.is_terminal());
    }

    #[test]
    fn test_accepts_uploads() {
        assert!(ProjectStatus::Created.accepts_uploads());
        assert!(ProjectStatus::Pending.accepts_uploads());
        assert!(!ProjectStatus::Processing.accepts_uploads());
        assert!(!ProjectStatus::Completed.accepts_uploads());
    }

    #[test]
    fn test_canonical_project_id() {
        let id = Uuid::new_v4().to_string();
        assert!(is_canonical_project_id(&id));
        // Uppercase spelling of the same UUID is not canonical.
        assert!(!is_canonical_project_id(&id.to_uppercase()));
        // Braced and un-hyphenated forms parse as UUIDs but are rejected.
        assert!(!is_canonical_project_id(&format!("{{{}}}", id)));
        assert!(!is_canonical_project_id(&id.replace('-', "")));
        assert!(!is_canonical_project_id("not-a-uuid"));
        assert!(!is_canonical_project_id(""));
        // UUIDv1 is not accepted even when canonical.
        assert!(!is_canonical_project_id(
            "c232ab00-9414-11ec-b3c8-9f6bdeced846"
        ));
    }

    #[test]
    fn test_processing_options_defaults() {
        let options: ProcessingOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options.ortho_quality, OrthoQuality::Medium);
        assert!(!options.generate_dtm);
        assert!(!options.multispectral);
    }
}
