//! Project domain model and persistence.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteProjectStore;
pub use store::{
    CreateProjectRequest, ProjectChanges, ProjectError, ProjectFilter, ProjectStore,
};
pub use types::{
    is_canonical_project_id, OrthoQuality, OutputArtifact, ProcessingOptions, Project,
    ProjectStatus,
};
