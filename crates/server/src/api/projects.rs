use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{error_response, ErrorResponse};
use crate::state::AppState;
use ortelius_core::error::OrchestrationError;
use ortelius_core::project::{
    is_canonical_project_id, CreateProjectRequest, ProcessingOptions, Project, ProjectFilter,
    ProjectStatus,
};
use ortelius_core::results::DownloadReference;
use ortelius_core::uploads::UploadAuthorization;

type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Debug, Deserialize, Default)]
pub struct CreateProjectBody {
    #[serde(default)]
    pub name: String,
}

pub async fn create_project(
    State(state): State<Arc<AppState>>,
    body: Option<Json<CreateProjectBody>>,
) -> Result<(StatusCode, Json<Project>), ApiError> {
    let Json(body) = body.unwrap_or_default();
    let project = state
        .project_store()
        .create(CreateProjectRequest { name: body.name })
        .map_err(|e| error_response(e.into()))?;
    info!("Created project {} ({})", project.id, project.name);
    Ok((StatusCode::CREATED, Json(project)))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ProjectListResponse {
    pub projects: Vec<Project>,
    pub total: i64,
    pub limit: u32,
    pub offset: u32,
}

pub async fn list_projects(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ProjectListResponse>, ApiError> {
    let mut filter = ProjectFilter::new();
    if let Some(status) = &query.status {
        let status: ProjectStatus = status
            .parse()
            .map_err(|e: String| error_response(OrchestrationError::Validation(e)))?;
        filter = filter.with_status(status);
    }
    let limit = query.limit.unwrap_or(ProjectFilter::DEFAULT_LIMIT);
    let offset = query.offset.unwrap_or(0);
    filter = filter.with_limit(limit).with_offset(offset);

    let projects = state
        .project_store()
        .list(&filter)
        .map_err(|e| error_response(e.into()))?;
    let total = state
        .project_store()
        .count(&filter)
        .map_err(|e| error_response(e.into()))?;

    Ok(Json(ProjectListResponse {
        projects,
        total,
        limit,
        offset,
    }))
}

pub async fn get_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Project>, ApiError> {
    if !is_canonical_project_id(&id) {
        return Err(error_response(OrchestrationError::Validation(format!(
            "Invalid project id: {}",
            id
        ))));
    }
    let project = state
        .project_store()
        .get(&id)
        .map_err(|e| error_response(e.into()))?
        .ok_or_else(|| error_response(OrchestrationError::NotFound(id.clone())))?;
    Ok(Json(project))
}

#[derive(Debug, Deserialize)]
pub struct UploadUrlBody {
    pub filename: String,
    pub content_type: String,
    pub file_size: u64,
}

pub async fn request_upload_url(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<UploadUrlBody>,
) -> Result<Json<UploadAuthorization>, ApiError> {
    let authorization = state
        .uploads()
        .authorize_upload(&id, &body.filename, &body.content_type, body.file_size)
        .await
        .map_err(error_response)?;
    Ok(Json(authorization))
}

pub async fn finalize_upload(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Project>, ApiError> {
    let project = state.uploads().finalize(&id).await.map_err(error_response)?;
    Ok(Json(project))
}

#[derive(Debug, Deserialize, Default)]
pub struct ProcessBody {
    #[serde(default)]
    pub options: ProcessingOptions,
}

pub async fn start_processing(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<ProcessBody>>,
) -> Result<(StatusCode, Json<Project>), ApiError> {
    let Json(body) = body.unwrap_or_default();
    let project = state
        .submitter()
        .submit(&id, body.options)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::ACCEPTED, Json(project)))
}

#[derive(Debug, Serialize)]
pub struct ResultResponse {
    pub project_id: String,
    pub files: Vec<DownloadReference>,
}

pub async fn get_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ResultResponse>, ApiError> {
    let files = state.results().list_results(&id).await.map_err(error_response)?;
    Ok(Json(ResultResponse {
        project_id: id,
        files,
    }))
}
