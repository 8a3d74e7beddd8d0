//! Error taxonomy for graph construction

use std::path::PathBuf;

use thiserror::Error;

use crate::core::graph::Relationship;
use crate::oracle::OracleError;

/// Violations of the graph store's structural invariants
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("duplicate node: {0}")]
    DuplicateNode(String),

    #[error("invalid qualified name: {0:?}")]
    InvalidName(String),

    #[error("node {qualified_name} of kind {kind} cannot carry {field}")]
    InvalidPayload {
        qualified_name: String,
        kind: String,
        field: &'static str,
    },

    #[error("edge {from} -{relationship}-> {to} references a missing node")]
    MissingEndpoint {
        from: String,
        to: String,
        relationship: Relationship,
    },

    #[error("{child} already has Contains parent {parent}")]
    SecondParent { child: String, parent: String },

    #[error("node not found: {0}")]
    NodeNotFound(String),
}

/// Failures of a single project's build pipeline
#[derive(Error, Debug)]
pub enum BuildError {
    /// The repository root itself cannot be enumerated; fatal for the project
    #[error("cannot enumerate repository {path:?}: {reason}")]
    Enumerate { path: PathBuf, reason: String },

    /// A single file could not be read or parsed; the file is skipped
    #[error("failed to parse {path:?}: {reason}")]
    Parse { path: PathBuf, reason: String },

    /// The oracle process failed to start or died; aborts the call phase only
    #[error("oracle session failure: {0}")]
    OracleSession(#[from] OracleError),

    #[error("worker pool: {0}")]
    WorkerPool(String),
}
