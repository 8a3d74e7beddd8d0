//! repograph - code graph construction for Python repositories
//!
//! Builds a graph of directories, modules, classes and functions linked by
//! containment, import and call edges. Ambiguous call targets are settled by
//! a language server acting as a go-to-definition oracle.

pub mod core;
pub mod languages;
pub mod oracle;
pub mod server;
pub mod storage;

pub use crate::core::config::Config;
pub use crate::core::graph::{CodeGraph, GraphEdge, GraphNode, NodeKind, Relationship};
pub use crate::core::parser::CodeParser;
pub use crate::core::query::QueryExecutor;
pub use crate::core::{BuildOutcome, BuildReport, CallPhase, ProjectBuilder};
pub use crate::languages::LanguageRegistry;
pub use crate::oracle::{DefinitionOracle, LspSession, StaticOracle};
pub use crate::storage::Database;
