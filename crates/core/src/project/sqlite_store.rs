use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};
use uuid::Uuid;

use super::store::{CreateProjectRequest, ProjectChanges, ProjectError, ProjectFilter, ProjectStore};
use super::types::{Project, ProjectStatus};

/// SQLite-backed [`ProjectStore`].
///
/// A single connection behind a mutex; the write volume here is one row
/// per project transition, far below anything that needs a pool.
pub struct SqliteProjectStore {
    conn: Mutex<Connection>,
}

impl SqliteProjectStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, ProjectError> {
        let conn = Connection::open(db_path).map_err(|e| ProjectError::Database(e.to_string()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, ProjectError> {
        let conn =
            Connection::open_in_memory().map_err(|e| ProjectError::Database(e.to_string()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<(), ProjectError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                files_count INTEGER NOT NULL DEFAULT 0,
                progress INTEGER NOT NULL DEFAULT 0,
                options TEXT,
                error_message TEXT,
                outputs TEXT NOT NULL DEFAULT '[]',
                active_job_id TEXT,
                version INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_projects_status ON projects(status);
            CREATE INDEX IF NOT EXISTS idx_projects_created_at ON projects(created_at);
            CREATE INDEX IF NOT EXISTS idx_projects_active_job_id ON projects(active_job_id);
            "#,
        )
        .map_err(|e| ProjectError::Database(e.to_string()))?;
        Ok(())
    }

    fn row_to_project(row: &Row) -> rusqlite::Result<Project> {
        let status_str: String = row.get("status")?;
        let options_json: Option<String> = row.get("options")?;
        let outputs_json: String = row.get("outputs")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;

        Ok(Project {
            id: row.get("id")?,
            name: row.get("name")?,
            status: status_str.parse().unwrap_or(ProjectStatus::Created),
            files_count: row.get("files_count")?,
            progress: row.get("progress")?,
            options: options_json.and_then(|json| serde_json::from_str(&json).ok()),
            error_message: row.get("error_message")?,
            outputs: serde_json::from_str(&outputs_json).unwrap_or_default(),
            active_job_id: row.get("active_job_id")?,
            version: row.get("version")?,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            updated_at: DateTime::parse_from_rfc3339(&updated_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    fn build_where_clause(filter: &ProjectFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut clause = String::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            clause.push_str(" WHERE status = ?");
            params.push(Box::new(status.as_str().to_string()));
        }

        (clause, params)
    }

    fn get_locked(conn: &Connection, id: &str) -> Result<Option<Project>, ProjectError> {
        let result = conn.query_row(
            "SELECT * FROM projects WHERE id = ?1",
            [id],
            Self::row_to_project,
        );
        match result {
            Ok(project) => Ok(Some(project)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(ProjectError::Database(e.to_string())),
        }
    }
}

impl ProjectStore for SqliteProjectStore {
    fn create(&self, request: CreateProjectRequest) -> Result<Project, ProjectError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let name = if request.name.trim().is_empty() {
            format!("Project {}", now.format("%Y-%m-%d %H:%M"))
        } else {
            request.name.trim().to_string()
        };
        let project = Project {
            id: Uuid::new_v4().to_string(),
            name,
            status: ProjectStatus::Created,
            files_count: 0,
            progress: 0,
            options: None,
            error_message: None,
            outputs: Vec::new(),
            active_job_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        conn.execute(
            "INSERT INTO projects (id, name, status, files_count, progress, outputs, version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                project.id,
                project.name,
                project.status.as_str(),
                project.files_count,
                project.progress,
                "[]",
                project.version,
                project.created_at.to_rfc3339(),
                project.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| ProjectError::Database(e.to_string()))?;

        Ok(project)
    }

    fn get(&self, id: &str) -> Result<Option<Project>, ProjectError> {
        let conn = self.conn.lock().unwrap();
        Self::get_locked(&conn, id)
    }

    fn list(&self, filter: &ProjectFilter) -> Result<Vec<Project>, ProjectError> {
        let conn = self.conn.lock().unwrap();
        let (where_clause, mut params) = Self::build_where_clause(filter);

        let mut sql = format!(
            "SELECT * FROM projects{} ORDER BY created_at DESC, id LIMIT ?",
            where_clause
        );
        params.push(Box::new(filter.limit.unwrap_or(ProjectFilter::DEFAULT_LIMIT)));
        if let Some(offset) = filter.offset {
            sql.push_str(" OFFSET ?");
            params.push(Box::new(offset));
        }

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| ProjectError::Database(e.to_string()))?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(&param_refs[..], Self::row_to_project)
            .map_err(|e| ProjectError::Database(e.to_string()))?;

        let mut projects = Vec::new();
        for row in rows {
            projects.push(row.map_err(|e| ProjectError::Database(e.to_string()))?);
        }
        Ok(projects)
    }

    fn count(&self, filter: &ProjectFilter) -> Result<i64, ProjectError> {
        let conn = self.conn.lock().unwrap();
        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM projects{}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        conn.query_row(&sql, &param_refs[..], |row| row.get(0))
            .map_err(|e| ProjectError::Database(e.to_string()))
    }

    fn find_by_job(&self, job_id: &str) -> Result<Option<Project>, ProjectError> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT * FROM projects WHERE active_job_id = ?1",
            [job_id],
            Self::row_to_project,
        );
        match result {
            Ok(project) => Ok(Some(project)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(ProjectError::Database(e.to_string())),
        }
    }

    fn update_if_version(
        &self,
        id: &str,
        expected_version: i64,
        changes: ProjectChanges,
    ) -> Result<Project, ProjectError> {
        let conn = self.conn.lock().unwrap();

        // Nothing to write; still verify the caller's version.
        if changes.is_empty() {
            let project =
                Self::get_locked(&conn, id)?.ok_or_else(|| ProjectError::NotFound(id.to_string()))?;
            if project.version != expected_version {
                return Err(ProjectError::VersionConflict {
                    project_id: id.to_string(),
                    expected: expected_version,
                    actual: project.version,
                });
            }
            return Ok(project);
        }

        let now = Utc::now();

        let mut sets: Vec<&str> = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = changes.status {
            sets.push("status = ?");
            params.push(Box::new(status.as_str().to_string()));
        }
        if let Some(files_count) = changes.files_count {
            sets.push("files_count = ?");
            params.push(Box::new(files_count));
        }
        if let Some(progress) = changes.progress {
            sets.push("progress = ?");
            params.push(Box::new(progress));
        }
        if let Some(options) = changes.options {
            let json = options
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| ProjectError::Database(e.to_string()))?;
            sets.push("options = ?");
            params.push(Box::new(json));
        }
        if let Some(error_message) = changes.error_message {
            sets.push("error_message = ?");
            params.push(Box::new(error_message));
        }
        if let Some(outputs) = changes.outputs {
            let json =
                serde_json::to_string(&outputs).map_err(|e| ProjectError::Database(e.to_string()))?;
            sets.push("outputs = ?");
            params.push(Box::new(json));
        }
        if let Some(active_job_id) = changes.active_job_id {
            sets.push("active_job_id = ?");
            params.push(Box::new(active_job_id));
        }

        sets.push("version = version + 1");
        sets.push("updated_at = ?");
        params.push(Box::new(now.to_rfc3339()));

        let sql = format!(
            "UPDATE projects SET {} WHERE id = ? AND version = ?",
            sets.join(", ")
        );
        params.push(Box::new(id.to_string()));
        params.push(Box::new(expected_version));

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let affected = conn
            .execute(&sql, &param_refs[..])
            .map_err(|e| ProjectError::Database(e.to_string()))?;

        if affected == 0 {
            // Row missing or another writer bumped the version first.
            return match Self::get_locked(&conn, id)? {
                Some(current) => Err(ProjectError::VersionConflict {
                    project_id: id.to_string(),
                    expected: expected_version,
                    actual: current.version,
                }),
                None => Err(ProjectError::NotFound(id.to_string())),
            };
        }

        Self::get_locked(&conn, id)?.ok_or_else(|| ProjectError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::types::{OutputArtifact, ProcessingOptions};

    fn store() -> SqliteProjectStore {
        SqliteProjectStore::in_memory().unwrap()
    }

    fn create(store: &SqliteProjectStore, name: &str) -> Project {
        store
            .create(CreateProjectRequest {
                name: name.to_string(),
            })
            .unwrap()
    }

    #[test]
    fn test_create_and_get() {
        let store = store();
        let project = create(&store, "field-survey");

        assert_eq!(project.status, ProjectStatus::Created);
        assert_eq!(project.files_count, 0);
        assert_eq!(project.version, 0);
        assert!(is_canonical(&project.id));

        let fetched = store.get(&project.id).unwrap().unwrap();
        assert_eq!(fetched, project);
    }

    fn is_canonical(id: &str) -> bool {
        crate::project::types::is_canonical_project_id(id)
    }

    #[test]
    fn test_create_with_empty_name_assigns_default() {
        let store = store();
        let project = create(&store, "  ");
        assert!(project.name.starts_with("Project "));
    }

    #[test]
    fn test_get_missing_returns_none() {
        let store = store();
        assert!(store.get("does-not-exist").unwrap().is_none());
    }

    #[test]
    fn test_list_with_status_filter() {
        let store = store();
        let a = create(&store, "a");
        let _b = create(&store, "b");

        store
            .update_if_version(&a.id, 0, ProjectChanges::new().status(ProjectStatus::Pending))
            .unwrap();

        let pending = store
            .list(&ProjectFilter::new().with_status(ProjectStatus::Pending))
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, a.id);

        let all = store.list(&ProjectFilter::new()).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_list_respects_limit_and_offset() {
        let store = store();
        for i in 0..5 {
            create(&store, &format!("p{}", i));
        }

        let page = store
            .list(&ProjectFilter::new().with_limit(2).with_offset(1))
            .unwrap();
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn test_count() {
        let store = store();
        create(&store, "a");
        create(&store, "b");
        assert_eq!(store.count(&ProjectFilter::new()).unwrap(), 2);
        assert_eq!(
            store
                .count(&ProjectFilter::new().with_status(ProjectStatus::Failed))
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_update_if_version_applies_changes() {
        let store = store();
        let project = create(&store, "survey");

        let updated = store
            .update_if_version(
                &project.id,
                0,
                ProjectChanges::new()
                    .status(ProjectStatus::Pending)
                    .files_count(42),
            )
            .unwrap();

        assert_eq!(updated.status, ProjectStatus::Pending);
        assert_eq!(updated.files_count, 42);
        assert_eq!(updated.version, 1);
        assert!(updated.updated_at >= project.updated_at);
    }

    #[test]
    fn test_update_if_version_conflict() {
        let store = store();
        let project = create(&store, "survey");

        store
            .update_if_version(&project.id, 0, ProjectChanges::new().files_count(1))
            .unwrap();

        // Second writer still holds version 0.
        let err = store
            .update_if_version(&project.id, 0, ProjectChanges::new().files_count(2))
            .unwrap_err();
        match err {
            ProjectError::VersionConflict {
                expected, actual, ..
            } => {
                assert_eq!(expected, 0);
                assert_eq!(actual, 1);
            }
            other => panic!("Expected version conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_update_if_version_empty_changes_is_a_version_check() {
        let store = store();
        let project = create(&store, "survey");

        let unchanged = store
            .update_if_version(&project.id, 0, ProjectChanges::new())
            .unwrap();
        assert_eq!(unchanged.version, 0);
        assert_eq!(unchanged.updated_at, project.updated_at);

        let err = store
            .update_if_version(&project.id, 7, ProjectChanges::new())
            .unwrap_err();
        assert!(matches!(err, ProjectError::VersionConflict { .. }));
    }

    #[test]
    fn test_update_if_version_missing_project() {
        let store = store();
        let err = store
            .update_if_version("nope", 0, ProjectChanges::new().progress(5))
            .unwrap_err();
        assert!(matches!(err, ProjectError::NotFound(_)));
    }

    #[test]
    fn test_nullable_fields_round_trip() {
        let store = store();
        let project = create(&store, "survey");

        let options = ProcessingOptions {
            generate_dtm: true,
            ..Default::default()
        };
        let outputs = vec![OutputArtifact {
            kind: "orthophoto".to_string(),
            filename: "odm_orthophoto.tif".to_string(),
            size_mb: Some(152.3),
        }];

        let updated = store
            .update_if_version(
                &project.id,
                0,
                ProjectChanges::new()
                    .options(Some(options.clone()))
                    .outputs(outputs.clone())
                    .active_job_id("ortho-12345678-20260831120000")
                    .error_message("boom"),
            )
            .unwrap();
        assert_eq!(updated.options, Some(options));
        assert_eq!(updated.outputs, outputs);
        assert_eq!(
            updated.active_job_id.as_deref(),
            Some("ortho-12345678-20260831120000")
        );
        assert_eq!(updated.error_message.as_deref(), Some("boom"));

        let cleared = store
            .update_if_version(
                &updated.id,
                updated.version,
                ProjectChanges::new()
                    .options(None)
                    .clear_active_job()
                    .clear_error(),
            )
            .unwrap();
        assert!(cleared.options.is_none());
        assert!(cleared.active_job_id.is_none());
        assert!(cleared.error_message.is_none());
        // Outputs were not part of the change set.
        assert_eq!(cleared.outputs, outputs);
    }

    #[test]
    fn test_find_by_job() {
        let store = store();
        let project = create(&store, "survey");

        assert!(store.find_by_job("ortho-x").unwrap().is_none());

        store
            .update_if_version(&project.id, 0, ProjectChanges::new().active_job_id("ortho-x"))
            .unwrap();
        let found = store.find_by_job("ortho-x").unwrap().unwrap();
        assert_eq!(found.id, project.id);
    }
}
