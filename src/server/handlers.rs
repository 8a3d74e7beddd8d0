//! HTTP request handlers

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::AppState;
use crate::core::error::GraphError;
use crate::core::graph::{CodeGraph, Relationship};
use crate::core::query::{Direction, QueryExecutor};
use crate::core::{BuildReport, ProjectBuilder};
use crate::languages::LanguageRegistry;

type ApiError = (StatusCode, Json<ErrorResponse>);

// ==================== Response Types ====================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Serialize, Deserialize)]
pub struct BuildResponse {
    pub project_id: i64,
    pub report: BuildReport,
}

#[derive(Serialize)]
pub struct LanguageInfo {
    pub id: String,
    pub extensions: Vec<String>,
}

// ==================== Request Types ====================

#[derive(Deserialize)]
pub struct BuildProjectRequest {
    pub root_path: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct NodeQuery {
    pub qname: String,
}

#[derive(Deserialize)]
pub struct NeighborsQuery {
    pub qname: String,
    #[serde(default = "default_relationship")]
    pub relationship: String,
    #[serde(default = "default_direction")]
    pub direction: String,
}

fn default_relationship() -> String {
    "calls".to_string()
}

fn default_direction() -> String {
    "both".to_string()
}

fn error(status: StatusCode, error: &str, message: impl ToString) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.to_string(),
        }),
    )
}

fn database_error(e: anyhow::Error) -> ApiError {
    error(StatusCode::INTERNAL_SERVER_ERROR, "database_error", e)
}

fn query_error(e: GraphError) -> ApiError {
    match e {
        GraphError::NodeNotFound(_) => error(StatusCode::NOT_FOUND, "not_found", e),
        other => error(StatusCode::INTERNAL_SERVER_ERROR, "query_error", other),
    }
}

/// Cached graph for a project, loaded from the database on first use
async fn project_graph(state: &AppState, name: &str) -> Result<Arc<CodeGraph>, ApiError> {
    if let Some(graph) = state.graphs.read().await.get(name) {
        return Ok(Arc::clone(graph));
    }

    let loaded = state.db.lock().await.load_graph(name).map_err(database_error)?;
    let graph = loaded
        .map(Arc::new)
        .ok_or_else(|| error(StatusCode::NOT_FOUND, "not_found", format!("Project {} not found", name)))?;

    state
        .graphs
        .write()
        .await
        .insert(name.to_string(), Arc::clone(&graph));
    Ok(graph)
}

// ==================== Handlers ====================

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// List all projects
pub async fn list_projects(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.lock().await;
    db.list_projects().map(Json).map_err(database_error)
}

/// Build a repository and store its graph
pub async fn build_project(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BuildProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let root = PathBuf::from(&req.root_path);
    let builder = ProjectBuilder::new(state.config.as_ref().clone());
    let name = req.name.clone();

    let outcome = tokio::task::spawn_blocking(move || builder.build(&root, name.as_deref()))
        .await
        .map_err(|e| error(StatusCode::INTERNAL_SERVER_ERROR, "build_error", e))?
        .map_err(|e| error(StatusCode::UNPROCESSABLE_ENTITY, "build_error", e))?;

    let root_path = outcome.report.root.to_string_lossy().into_owned();
    let project_id = state
        .db
        .lock()
        .await
        .save_graph(&root_path, &outcome.graph, Some(&outcome.report))
        .map_err(database_error)?;

    info!(repo = %outcome.report.repository, project_id, "project stored");
    state
        .graphs
        .write()
        .await
        .insert(outcome.report.repository.clone(), Arc::new(outcome.graph));

    Ok((
        StatusCode::CREATED,
        Json(BuildResponse {
            project_id,
            report: outcome.report,
        }),
    ))
}

/// Get project details
pub async fn get_project(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.lock().await;

    match db.get_project_by_name(&name) {
        Ok(Some(project)) => Ok(Json(project)),
        Ok(None) => Err(error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("Project {} not found", name),
        )),
        Err(e) => Err(database_error(e)),
    }
}

/// Delete a project and its stored graph
pub async fn delete_project(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .db
        .lock()
        .await
        .delete_project(&name)
        .map_err(database_error)?;
    state.graphs.write().await.remove(&name);

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("Project {} not found", name),
        ))
    }
}

/// Get project status
pub async fn get_project_status(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.lock().await;

    match db.get_project_status(&name) {
        Ok(Some(status)) => Ok(Json(status)),
        Ok(None) => Err(error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("Project {} not found", name),
        )),
        Err(e) => Err(database_error(e)),
    }
}

/// Node detail
pub async fn get_node(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<NodeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let graph = project_graph(&state, &name).await?;
    QueryExecutor::new(&graph)
        .node_detail(&query.qname)
        .map(Json)
        .map_err(query_error)
}

/// Siblings above and below a node
pub async fn get_context(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<NodeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let graph = project_graph(&state, &name).await?;
    QueryExecutor::new(&graph)
        .context(&query.qname)
        .map(Json)
        .map_err(query_error)
}

/// Imports of the enclosing module
pub async fn get_imports(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<NodeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let graph = project_graph(&state, &name).await?;
    QueryExecutor::new(&graph)
        .imports_of_module(&query.qname)
        .map(Json)
        .map_err(query_error)
}

/// One-hop neighbours over a relationship
pub async fn get_neighbors(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<NeighborsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let relationship: Relationship = query
        .relationship
        .parse()
        .map_err(|e: String| error(StatusCode::BAD_REQUEST, "invalid_query", e))?;
    let direction: Direction = query
        .direction
        .parse()
        .map_err(|e: String| error(StatusCode::BAD_REQUEST, "invalid_query", e))?;

    let graph = project_graph(&state, &name).await?;
    QueryExecutor::new(&graph)
        .neighbors(&query.qname, relationship, direction)
        .map(Json)
        .map_err(query_error)
}

/// List supported languages
pub async fn list_languages() -> Json<Vec<LanguageInfo>> {
    let registry = LanguageRegistry::new();
    let languages: Vec<LanguageInfo> = registry
        .list_languages()
        .iter()
        .map(|l| LanguageInfo {
            id: l.language_id().to_string(),
            extensions: l.file_extensions().iter().map(|s| s.to_string()).collect(),
        })
        .collect();

    Json(languages)
}
