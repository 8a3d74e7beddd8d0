//! Data models for the graph storage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::BuildReport;

/// Project record in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: i64,
    pub name: String,
    pub root_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored node row; `ordinal` preserves insertion order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub ordinal: i64,
    pub qualified_name: String,
    pub kind: String,
    pub source_text: Option<String>,
    pub signature: Option<String>,
}

/// Stored edge row; `ordinal` preserves insertion order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub ordinal: i64,
    pub source: String,
    pub target: String,
    pub relationship: String,
}

/// Project status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectStatus {
    pub project_id: i64,
    pub name: String,
    pub root_path: String,
    /// `complete`, `partial` or `empty` when no graph was saved yet
    pub status: String,
    pub nodes_count: u32,
    pub edges_count: u32,
    pub calls_count: u32,
    pub last_updated: DateTime<Utc>,
    pub report: Option<BuildReport>,
}
