//! HTTP server exposing stored graphs and the query API

mod handlers;
mod routes;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::core::config::Config;
use crate::core::graph::CodeGraph;
use crate::storage::Database;

/// Shared application state
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Mutex<Database>,
    /// Graphs loaded from the database, keyed by repository name
    pub graphs: RwLock<HashMap<String, Arc<CodeGraph>>>,
}

impl AppState {
    pub fn new(config: Arc<Config>, db: Database) -> Self {
        Self {
            config,
            db: Mutex::new(db),
            graphs: RwLock::new(HashMap::new()),
        }
    }
}

/// Build the application router
pub fn app(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .merge(routes::api_routes())
        .layer(TraceLayer::new_for_http());

    if state.config.server.cors_enabled {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        router = router.layer(cors);
    }

    router.with_state(state)
}

/// Run the HTTP server
pub async fn run_server(config: Arc<Config>) -> Result<()> {
    let db = Database::open(&config.database.path)?;
    db.init_schema()?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let state = Arc::new(AppState::new(Arc::clone(&config), db));
    let app = app(state);

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
