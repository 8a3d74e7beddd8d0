//! Hierarchical parser: directory tree, modules and nested definitions
//!
//! Walks a repository, parses every recognised source file with tree-sitter
//! and emits the containment tree together with the symbol table. This is the
//! only pass that creates Directory, Module, Class and Function nodes.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info, warn};
use tree_sitter::{Node, Tree};
use walkdir::WalkDir;

use crate::core::config::BuildConfig;
use crate::core::error::BuildError;
use crate::core::graph::{CodeGraph, GraphEdge, GraphNode};
use crate::core::symbols::{ScopeStack, SymbolTable, SymbolTableBuilder};
use crate::languages::{node_text, DefinitionKind, LanguageRegistry, LanguageSupport};

/// A successfully parsed source file
pub struct ParsedModule {
    pub path: PathBuf,
    pub qualified_name: String,
    pub language: Arc<dyn LanguageSupport>,
    pub source: String,
    pub tree: Tree,
}

/// Parsed modules of one build, addressable by path
#[derive(Default)]
pub struct SourceSet {
    modules: Vec<ParsedModule>,
    by_path: HashMap<PathBuf, usize>,
}

impl SourceSet {
    pub fn insert(&mut self, module: ParsedModule) {
        self.by_path.insert(module.path.clone(), self.modules.len());
        self.modules.push(module);
    }

    pub fn get(&self, path: &Path) -> Option<&ParsedModule> {
        self.by_path.get(path).map(|&i| &self.modules[i])
    }

    pub fn modules(&self) -> &[ParsedModule] {
        &self.modules
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Everything produced by the hierarchical pass
pub struct HierarchyOutput {
    pub graph: CodeGraph,
    pub symbols: SymbolTable,
    pub sources: SourceSet,
    /// Files that were skipped, with the reason
    pub skipped: Vec<BuildError>,
}

enum EntryKind {
    Directory,
    File(Arc<dyn LanguageSupport>),
}

struct WalkEntry {
    path: PathBuf,
    qualified_name: String,
    parent: Option<String>,
    kind: EntryKind,
}

enum Step<'tree> {
    Enter(Node<'tree>),
    Leave,
}

/// Code parser that uses tree-sitter for syntax analysis
pub struct CodeParser {
    registry: LanguageRegistry,
    config: BuildConfig,
}

impl CodeParser {
    /// Create a new parser with the given language registry
    pub fn new(registry: LanguageRegistry, config: BuildConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    /// Build the containment tree and symbol table for a repository.
    ///
    /// Only a root that cannot be enumerated is an error; unreadable or
    /// malformed files are reported in [`HierarchyOutput::skipped`].
    pub fn parse_repository(
        &self,
        root: &Path,
        repo_name: &str,
    ) -> Result<HierarchyOutput, BuildError> {
        let entries = self.collect_entries(root, repo_name)?;

        let parsed: Vec<Option<Result<(String, Tree), BuildError>>> = entries
            .par_iter()
            .map_init(tree_sitter::Parser::new, |parser, entry| match &entry.kind {
                EntryKind::Directory => None,
                EntryKind::File(language) => {
                    Some(self.parse_file(parser, &entry.path, language.as_ref()))
                }
            })
            .collect();

        let mut graph = CodeGraph::new(repo_name);
        let mut symbols = SymbolTableBuilder::new();
        let mut sources = SourceSet::default();
        let mut skipped = Vec::new();

        for (entry, result) in entries.into_iter().zip(parsed) {
            let WalkEntry {
                path,
                qualified_name,
                parent,
                kind,
            } = entry;

            let (node, unit) = match (kind, result) {
                (EntryKind::Directory, _) => (GraphNode::directory(qualified_name.clone()), None),
                (EntryKind::File(language), Some(Ok((source, tree)))) => (
                    GraphNode::module(qualified_name.clone()),
                    Some((language, source, tree)),
                ),
                (EntryKind::File(_), Some(Err(e))) => {
                    warn!(error = %e, "skipping file");
                    skipped.push(e);
                    continue;
                }
                (EntryKind::File(_), None) => continue,
            };

            if let Err(e) = graph.add_node(node) {
                warn!(path = ?path, error = %e, "name collision, entry skipped");
                continue;
            }
            if let Some(parent) = parent {
                graph.link(GraphEdge::contains(parent, qualified_name.clone()));
            }

            if let Some((language, source, tree)) = unit {
                emit_definitions(
                    &mut graph,
                    &mut symbols,
                    language.as_ref(),
                    &qualified_name,
                    &source,
                    &tree,
                );
                sources.insert(ParsedModule {
                    path,
                    qualified_name,
                    language,
                    source,
                    tree,
                });
            }
        }

        let symbols = symbols.freeze();
        info!(
            repo = repo_name,
            nodes = graph.node_count(),
            modules = sources.len(),
            symbols = symbols.len(),
            skipped = skipped.len(),
            "hierarchical pass complete"
        );

        Ok(HierarchyOutput {
            graph,
            symbols,
            sources,
            skipped,
        })
    }

    /// Enumerate directories and recognised source files in sorted walk order
    fn collect_entries(&self, root: &Path, repo_name: &str) -> Result<Vec<WalkEntry>, BuildError> {
        fs::read_dir(root).map_err(|e| BuildError::Enumerate {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut entries = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(self.config.follow_links)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !(is_hidden(e) || self.is_excluded(e)));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(BuildError::Enumerate {
                        path: root.to_path_buf(),
                        reason: e.to_string(),
                    })
                }
                Err(e) => {
                    warn!(error = %e, "cannot read directory entry");
                    continue;
                }
            };

            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            let mut segments: Vec<String> = Vec::new();
            let mut valid = true;
            for component in relative.components() {
                let Some(name) = component.as_os_str().to_str() else {
                    valid = false;
                    break;
                };
                segments.push(name.to_string());
            }
            if !valid {
                debug!(path = ?entry.path(), "non UTF-8 path, skipping");
                continue;
            }

            let kind = if entry.file_type().is_dir() {
                EntryKind::Directory
            } else if entry.file_type().is_file() {
                let Some(language) = self.registry.for_path(entry.path()) else {
                    continue;
                };
                if let Some(last) = segments.last_mut() {
                    if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                        *last = stem.to_string();
                    }
                }
                EntryKind::File(language.clone())
            } else {
                continue;
            };

            if segments.iter().any(|s| s.is_empty() || s.contains('.')) {
                debug!(path = ?entry.path(), "name cannot form a qualified name, skipping");
                continue;
            }

            let parent = if entry.depth() == 0 {
                None
            } else {
                let parent_segments = &segments[..segments.len() - 1];
                Some(join_name(repo_name, parent_segments))
            };

            entries.push(WalkEntry {
                path: entry.path().to_path_buf(),
                qualified_name: join_name(repo_name, &segments),
                parent,
                kind,
            });
        }

        Ok(entries)
    }

    /// Parse a single file as strict UTF-8
    fn parse_file(
        &self,
        parser: &mut tree_sitter::Parser,
        path: &Path,
        language: &dyn LanguageSupport,
    ) -> Result<(String, Tree), BuildError> {
        let parse_error = |reason: String| BuildError::Parse {
            path: path.to_path_buf(),
            reason,
        };

        let bytes = fs::read(path).map_err(|e| parse_error(e.to_string()))?;
        let source = String::from_utf8(bytes).map_err(|e| parse_error(e.to_string()))?;

        parser
            .set_language(&language.grammar())
            .map_err(|e| parse_error(e.to_string()))?;
        let tree = parser
            .parse(&source, None)
            .ok_or_else(|| parse_error("parser returned no tree".to_string()))?;

        if self.config.skip_files_with_syntax_errors && tree.root_node().has_error() {
            return Err(parse_error("syntax errors in source".to_string()));
        }

        debug!(path = ?path, root = tree.root_node().kind(), "parsed");
        Ok((source, tree))
    }

    fn is_excluded(&self, entry: &walkdir::DirEntry) -> bool {
        entry.file_type().is_dir()
            && entry
                .file_name()
                .to_str()
                .map(|name| self.config.exclude_dirs.iter().any(|d| d == name))
                .unwrap_or(false)
    }
}

/// Emit Class and Function nodes of one module, root to leaf
fn emit_definitions(
    graph: &mut CodeGraph,
    symbols: &mut SymbolTableBuilder,
    language: &dyn LanguageSupport,
    module_name: &str,
    source: &str,
    tree: &Tree,
) {
    let mut scope = ScopeStack::new(module_name);
    let mut stack = Vec::new();
    push_children(&mut stack, tree.root_node());

    while let Some(step) = stack.pop() {
        let node = match step {
            Step::Leave => {
                scope.pop();
                continue;
            }
            Step::Enter(node) => node,
        };

        let Some(kind) = language.definition_kind(node) else {
            push_children(&mut stack, node);
            continue;
        };
        let Some(name_node) = language.definition_name(node) else {
            continue;
        };

        let name = node_text(name_node, source);
        let parent = scope.current().to_string();
        let qualified_name = format!("{}.{}", parent, name);
        let text = node_text(node, source);

        let (graph_node, parameters) = match kind {
            DefinitionKind::Class => (GraphNode::class(qualified_name.clone(), text), Vec::new()),
            DefinitionKind::Function => (
                GraphNode::function(qualified_name.clone(), text, language.signature(node, source)),
                language.parameter_names(node, source),
            ),
        };

        if let Err(e) = graph.add_node(graph_node) {
            warn!(error = %e, "definition skipped");
            continue;
        }
        graph.link(GraphEdge::contains(parent, qualified_name.clone()));
        symbols.register(name, &qualified_name);

        scope.push(name, parameters);
        stack.push(Step::Leave);
        push_children(&mut stack, node);
    }
}

fn push_children<'tree>(stack: &mut Vec<Step<'tree>>, node: Node<'tree>) {
    let mut cursor = node.walk();
    let children: Vec<Node<'tree>> = node.children(&mut cursor).collect();
    stack.extend(children.into_iter().rev().map(Step::Enter));
}

fn join_name(repo_name: &str, segments: &[String]) -> String {
    std::iter::once(repo_name)
        .chain(segments.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(".")
}

/// Check if a directory entry is hidden
fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}
