//! Definition oracle: "go to definition" answers for ambiguous callees
//!
//! The call resolver only consults an oracle when the symbol table holds two
//! or more candidates for a name. [`LspSession`] drives a real language
//! server; [`StaticOracle`] answers from an in-memory table.
//!
//! Positions follow the language server protocol: zero-based lines and
//! zero-based UTF-16 columns. [`position`] converts to and from the byte
//! columns tree-sitter reports.

pub mod lsp;
pub mod position;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use lsp::LspSession;

/// Zero-based line and UTF-16 column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

/// A definition site reported by the oracle
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub path: PathBuf,
    pub range: Range,
}

impl Location {
    /// Location spanning a single position
    pub fn at(path: impl Into<PathBuf>, line: u32, character: u32) -> Self {
        let position = Position::new(line, character);
        Self {
            path: path.into(),
            range: Range {
                start: position,
                end: position,
            },
        }
    }
}

/// Oracle failures. Only [`OracleError::is_fatal`] errors abort call resolution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("failed to start language server: {0}")]
    Spawn(String),

    #[error("no answer within {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("language server session is dead: {0}")]
    SessionDead(String),
}

impl OracleError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, OracleError::Spawn(_) | OracleError::SessionDead(_))
    }
}

/// Answers "where is the symbol at this position defined?"
///
/// Implementations are shared by the file-level workers of one build and
/// must serialize access to any single-session backend themselves.
pub trait DefinitionOracle: Send + Sync {
    fn definition_of(&self, file: &Path, position: Position) -> Result<Vec<Location>, OracleError>;
}

/// In-memory oracle with a query counter
#[derive(Debug, Default)]
pub struct StaticOracle {
    answers: HashMap<(PathBuf, Position), Vec<Location>>,
    failure: Option<OracleError>,
    queries: AtomicUsize,
}

impl StaticOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Oracle that fails every query with `error`
    pub fn failing(error: OracleError) -> Self {
        Self {
            failure: Some(error),
            ..Self::default()
        }
    }

    pub fn insert(&mut self, file: impl Into<PathBuf>, position: Position, answer: Vec<Location>) {
        self.answers.insert((file.into(), position), answer);
    }

    /// Number of queries received so far
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }
}

impl DefinitionOracle for StaticOracle {
    fn definition_of(&self, file: &Path, position: Position) -> Result<Vec<Location>, OracleError> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        Ok(self
            .answers
            .get(&(file.to_path_buf(), position))
            .cloned()
            .unwrap_or_default())
    }
}
