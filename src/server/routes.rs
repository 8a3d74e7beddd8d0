//! API route definitions

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers;
use super::AppState;

/// Create API routes
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Health check
        .route("/api/v1/health", get(handlers::health_check))
        // Project management
        .route("/api/v1/projects", get(handlers::list_projects))
        .route("/api/v1/projects", post(handlers::build_project))
        .route(
            "/api/v1/projects/:name",
            get(handlers::get_project).delete(handlers::delete_project),
        )
        .route("/api/v1/projects/:name/status", get(handlers::get_project_status))
        // Graph queries
        .route("/api/v1/projects/:name/node", get(handlers::get_node))
        .route("/api/v1/projects/:name/context", get(handlers::get_context))
        .route("/api/v1/projects/:name/imports", get(handlers::get_imports))
        .route("/api/v1/projects/:name/neighbors", get(handlers::get_neighbors))
        // Languages
        .route("/api/v1/languages", get(handlers::list_languages))
}
