//! Batch builds over many independent repositories
//!
//! Each repository gets its own pipeline, graph and oracle session. Builds run
//! as blocking tasks on a bounded `JoinSet`; a failure or panic in one project
//! is reported for that project only.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::core::config::Config;
use crate::core::error::BuildError;
use crate::core::graph::CodeGraph;
use crate::core::{BuildOutcome, BuildReport, CallPhase, ProjectBuilder};

/// Per-project batch outcome
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProjectOutcome {
    Complete { report: BuildReport },
    /// Structure and imports are present, Calls edges are not
    Partial { report: BuildReport, reason: String },
    Failed { error: String },
    /// Never started because the batch was cancelled
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectResult {
    pub root: PathBuf,
    pub outcome: ProjectOutcome,
}

impl ProjectResult {
    fn from_build(root: PathBuf, result: Result<BuildOutcome, BuildError>) -> (Self, Option<CodeGraph>) {
        match result {
            Ok(BuildOutcome { graph, report }) => {
                let outcome = match &report.calls {
                    CallPhase::Completed { .. } => ProjectOutcome::Complete { report },
                    CallPhase::Aborted { reason } => ProjectOutcome::Partial {
                        reason: reason.clone(),
                        report,
                    },
                };
                (Self { root, outcome }, Some(graph))
            }
            Err(e) => (
                Self {
                    root,
                    outcome: ProjectOutcome::Failed {
                        error: e.to_string(),
                    },
                },
                None,
            ),
        }
    }
}

/// Totals over a finished batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub complete: usize,
    pub partial: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl BatchSummary {
    pub fn of(results: &[ProjectResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            match result.outcome {
                ProjectOutcome::Complete { .. } => summary.complete += 1,
                ProjectOutcome::Partial { .. } => summary.partial += 1,
                ProjectOutcome::Failed { .. } => summary.failed += 1,
                ProjectOutcome::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }
}

/// Flag set on Ctrl-C; stops submission of further projects
pub fn cancel_on_ctrl_c() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight projects");
            flag.store(true, Ordering::SeqCst);
        }
    });
    cancel
}

/// Build every repository, at most `config.batch.workers` at a time.
///
/// `sink` sees each finished graph on the calling task, in completion order;
/// its errors are logged against that project only.
pub async fn run_batch<F>(
    config: Arc<Config>,
    repositories: Vec<PathBuf>,
    cancel: Arc<AtomicBool>,
    mut sink: F,
) -> Vec<ProjectResult>
where
    F: FnMut(&ProjectResult, &CodeGraph) -> Result<()>,
{
    let workers = config.batch.workers.max(1);
    let mut tasks: JoinSet<(ProjectResult, Option<CodeGraph>)> = JoinSet::new();
    let mut results = Vec::with_capacity(repositories.len());
    let names = project_names(&repositories);
    let mut queue = repositories.into_iter().zip(names);

    info!(workers, "starting batch");

    loop {
        while tasks.len() < workers && !cancel.load(Ordering::SeqCst) {
            let Some((root, name)) = queue.next() else {
                break;
            };
            if let Some(name) = &name {
                info!(root = ?root, %name, "repository name shared in batch, renamed");
            }
            let config = Arc::clone(&config);
            tasks.spawn_blocking(move || build_isolated(&config, root, name));
        }

        let Some(joined) = tasks.join_next().await else {
            break;
        };
        match joined {
            Ok((result, graph)) => {
                if let Some(graph) = &graph {
                    if let Err(e) = sink(&result, graph) {
                        error!(root = ?result.root, error = %e, "failed to store project graph");
                    }
                }
                log_result(&result);
                results.push(result);
            }
            Err(e) => error!(error = %e, "batch worker failed"),
        }
    }

    results.extend(queue.map(|(root, _)| ProjectResult {
        root,
        outcome: ProjectOutcome::Cancelled,
    }));

    let summary = BatchSummary::of(&results);
    info!(
        complete = summary.complete,
        partial = summary.partial,
        failed = summary.failed,
        cancelled = summary.cancelled,
        "batch finished"
    );
    results
}

/// Explicit names for repositories whose directory name is shared with
/// another repository of the batch; `None` keeps the directory name.
///
/// A shared name is prefixed with the parent directory (`cli/alpha` becomes
/// `cli_alpha`) and numbered if that is still taken.
fn project_names(repositories: &[PathBuf]) -> Vec<Option<String>> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for root in repositories {
        if let Some(name) = dir_name(root) {
            *counts.entry(name).or_default() += 1;
        }
    }
    let mut taken: HashSet<String> = counts
        .iter()
        .filter(|(_, count)| **count == 1)
        .map(|(name, _)| name.clone())
        .collect();

    repositories
        .iter()
        .map(|root| {
            let name = dir_name(root)?;
            if counts.get(&name).copied().unwrap_or(0) < 2 {
                return None;
            }
            let base = match root.parent().and_then(dir_name) {
                Some(parent) => format!("{}_{}", parent, name),
                None => name,
            };
            let mut candidate = base.clone();
            let mut suffix = 2;
            while !taken.insert(candidate.clone()) {
                candidate = format!("{}_{}", base, suffix);
                suffix += 1;
            }
            Some(candidate)
        })
        .collect()
}

fn dir_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

fn build_isolated(config: &Config, root: PathBuf, name: Option<String>) -> (ProjectResult, Option<CodeGraph>) {
    let builder = ProjectBuilder::new(config.clone());
    let result = catch_unwind(AssertUnwindSafe(|| builder.build(&root, name.as_deref())))
        .unwrap_or_else(|panic| Err(BuildError::WorkerPool(panic_message(panic))));
    ProjectResult::from_build(root, result)
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("build panicked: {}", detail)
}

fn log_result(result: &ProjectResult) {
    match &result.outcome {
        ProjectOutcome::Complete { report } => {
            info!(repo = %report.repository, nodes = report.nodes, edges = report.edges, "project complete")
        }
        ProjectOutcome::Partial { report, reason } => {
            warn!(repo = %report.repository, %reason, "project partial")
        }
        ProjectOutcome::Failed { error } => error!(root = ?result.root, %error, "project failed"),
        ProjectOutcome::Cancelled => {}
    }
}

/// Repositories under `parent`: its subdirectories (depth 1) or `category/repo` (depth 2)
pub fn discover_repositories(parent: &Path, depth: usize) -> Result<Vec<PathBuf>> {
    let depth = depth.clamp(1, 2);
    let mut found = Vec::new();
    for entry in WalkDir::new(parent)
        .min_depth(1)
        .max_depth(depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
    {
        let entry = entry?;
        if entry.file_type().is_dir() && entry.depth() == depth {
            found.push(entry.into_path());
        }
    }
    Ok(found)
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}
