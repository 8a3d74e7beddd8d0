//! Core engine: graph construction and querying
//!
//! A build runs in two phases separated by a hard barrier. The hierarchical
//! pass creates every node and freezes the symbol table; the linking passes
//! (imports, then calls) only add edges.

pub mod batch;
pub mod config;
pub mod error;
pub mod export;
pub mod graph;
pub mod imports;
pub mod parser;
pub mod query;
pub mod resolver;
pub mod symbols;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::config::Config;
use crate::core::error::BuildError;
use crate::core::graph::CodeGraph;
use crate::core::imports::{ImportExtractor, ImportStats};
use crate::core::parser::{CodeParser, HierarchyOutput};
use crate::core::resolver::{CallResolver, ResolutionStats};
use crate::languages::LanguageRegistry;
use crate::oracle::{DefinitionOracle, LspSession};

/// Result of the call resolution phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallPhase {
    Completed {
        stats: ResolutionStats,
        /// Whether an oracle was available for ambiguous names
        oracle: bool,
    },
    /// The oracle session failed; the graph has no Calls edges
    Aborted { reason: String },
}

impl CallPhase {
    pub fn is_complete(&self) -> bool {
        matches!(self, CallPhase::Completed { .. })
    }
}

/// Summary of one project build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    pub repository: String,
    pub root: PathBuf,
    pub nodes: usize,
    pub edges: usize,
    pub skipped_files: Vec<String>,
    pub imports: ImportStats,
    pub calls: CallPhase,
    pub elapsed_ms: u64,
}

/// A finished graph and its report
pub struct BuildOutcome {
    pub graph: CodeGraph,
    pub report: BuildReport,
}

/// Runs the build pipeline for one repository at a time
pub struct ProjectBuilder {
    config: Config,
}

struct Linked {
    root: PathBuf,
    hierarchy: HierarchyOutput,
    imports: ImportStats,
    started: Instant,
}

impl ProjectBuilder {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Build a repository, starting a language server when the oracle is enabled.
    ///
    /// The session is opened after the structural passes and closed as soon
    /// as call resolution finishes.
    pub fn build(&self, root: &Path, name: Option<&str>) -> Result<BuildOutcome, BuildError> {
        let mut linked = self.link_structure(root, name)?;

        let calls = if self.config.oracle.enabled {
            let language_id = linked
                .hierarchy
                .sources
                .modules()
                .first()
                .map(|m| m.language.language_id().to_string())
                .unwrap_or_else(|| "python".to_string());

            match LspSession::start(&linked.root, &language_id, &self.config.oracle) {
                Ok(session) => {
                    let phase = resolve_calls(&mut linked, Some(&session));
                    session.close();
                    phase
                }
                Err(e) => {
                    warn!(error = %e, "oracle unavailable, call phase aborted");
                    CallPhase::Aborted {
                        reason: BuildError::from(e).to_string(),
                    }
                }
            }
        } else {
            resolve_calls(&mut linked, None)
        };

        Ok(finish(linked, calls))
    }

    /// Build a repository with a caller-owned oracle (or none)
    pub fn build_with_oracle(
        &self,
        root: &Path,
        name: Option<&str>,
        oracle: Option<&dyn DefinitionOracle>,
    ) -> Result<BuildOutcome, BuildError> {
        let mut linked = self.link_structure(root, name)?;
        let calls = resolve_calls(&mut linked, oracle);
        Ok(finish(linked, calls))
    }

    /// Hierarchical pass followed by the import pass
    fn link_structure(&self, root: &Path, name: Option<&str>) -> Result<Linked, BuildError> {
        let started = Instant::now();
        let root = fs::canonicalize(root).map_err(|e| BuildError::Enumerate {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;
        let name = name
            .map(str::to_string)
            .or_else(|| root.file_name().map(|n| n.to_string_lossy().into_owned()))
            .filter(|n| !n.is_empty() && !n.contains('.'))
            .ok_or_else(|| BuildError::Enumerate {
                path: root.clone(),
                reason: "repository name must be non-empty and contain no '.'".to_string(),
            })?;

        info!(repo = %name, root = ?root, "building project");

        let parser = CodeParser::new(LanguageRegistry::new(), self.config.build.clone());
        let mut hierarchy = parser.parse_repository(&root, &name)?;
        let imports = ImportExtractor::new(&mut hierarchy.graph).run(&hierarchy.sources);

        Ok(Linked {
            root,
            hierarchy,
            imports,
            started,
        })
    }
}

fn resolve_calls(linked: &mut Linked, oracle: Option<&dyn DefinitionOracle>) -> CallPhase {
    let hierarchy = &mut linked.hierarchy;
    let resolved = CallResolver::new(
        &hierarchy.graph,
        &hierarchy.symbols,
        &hierarchy.sources,
        &linked.root,
        oracle,
    )
    .run();

    match resolved {
        Ok(calls) => {
            let added = calls.apply(&mut hierarchy.graph);
            info!(edges = added, "calls edges applied");
            CallPhase::Completed {
                stats: calls.stats,
                oracle: oracle.is_some(),
            }
        }
        Err(e) => {
            warn!(error = %e, "call phase aborted, keeping structure and imports");
            CallPhase::Aborted {
                reason: BuildError::from(e).to_string(),
            }
        }
    }
}

fn finish(linked: Linked, calls: CallPhase) -> BuildOutcome {
    let Linked {
        root,
        hierarchy,
        imports,
        started,
    } = linked;
    let graph = hierarchy.graph;

    let report = BuildReport {
        repository: graph.repo_name().to_string(),
        root,
        nodes: graph.node_count(),
        edges: graph.edge_count(),
        skipped_files: hierarchy.skipped.iter().map(|e| e.to_string()).collect(),
        imports,
        calls,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    info!(
        repo = %report.repository,
        nodes = report.nodes,
        edges = report.edges,
        complete = report.calls.is_complete(),
        elapsed_ms = report.elapsed_ms,
        "build finished"
    );

    BuildOutcome { graph, report }
}
