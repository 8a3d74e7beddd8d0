//! Import extraction
//!
//! Adds one Imports edge per imported module, from the importing module to
//! the module it names. Modules that are not part of the repository become
//! ExternalModule placeholders keyed by their dotted name.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::graph::{parent_name, CodeGraph, GraphEdge, GraphNode, NodeKind};
use crate::core::parser::{ParsedModule, SourceSet};
use crate::languages::ModuleReference;

/// Counters for one import pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportStats {
    pub internal: usize,
    pub external: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ImportTarget {
    Internal(String),
    External(String),
}

/// Resolves import constructs against the nodes of one graph
pub struct ImportExtractor<'g> {
    graph: &'g mut CodeGraph,
}

impl<'g> ImportExtractor<'g> {
    pub fn new(graph: &'g mut CodeGraph) -> Self {
        Self { graph }
    }

    /// Add Imports edges for every parsed module
    pub fn run(mut self, sources: &SourceSet) -> ImportStats {
        let collected: Vec<(&str, Vec<ModuleReference>)> = sources
            .modules()
            .par_iter()
            .map(|module| (module.qualified_name.as_str(), collect_references(module)))
            .collect();

        let mut stats = ImportStats::default();
        for (importer, references) in collected {
            for reference in references {
                let targets = self.resolve(importer, &reference);
                if targets.is_empty() {
                    warn!(
                        module = importer,
                        import = %reference.dotted,
                        level = reference.level,
                        "relative import reaches above the repository root, dropped"
                    );
                    stats.dropped += 1;
                }
                for target in targets {
                    self.link(importer, target, &mut stats);
                }
            }
        }

        info!(
            internal = stats.internal,
            external = stats.external,
            dropped = stats.dropped,
            "import pass complete"
        );
        stats
    }

    fn link(&mut self, importer: &str, target: ImportTarget, stats: &mut ImportStats) {
        let to = match target {
            ImportTarget::Internal(q) => {
                stats.internal += 1;
                q
            }
            ImportTarget::External(dotted) => {
                if let Some(kind) = self.graph.kind_of(&dotted).filter(|k| *k != NodeKind::ExternalModule) {
                    warn!(
                        module = importer,
                        import = %dotted,
                        existing = %kind,
                        "external module name is taken by a repository node, dropped"
                    );
                    stats.dropped += 1;
                    return;
                }
                if !self.graph.contains_node(&dotted) {
                    if let Err(e) = self.graph.add_node(GraphNode::external_module(dotted.clone())) {
                        warn!(error = %e, "cannot create external module");
                        stats.dropped += 1;
                        return;
                    }
                }
                stats.external += 1;
                dotted
            }
        };

        if to == importer {
            debug!(module = importer, "self import ignored");
            return;
        }
        self.graph.link(GraphEdge::imports(importer, to));
    }

    fn resolve(&self, importer: &str, reference: &ModuleReference) -> Vec<ImportTarget> {
        let package = parent_name(importer).unwrap_or(importer);

        if reference.level == 0 {
            if reference.dotted.is_empty() {
                return Vec::new();
            }
            let mut anchor = Some(package);
            while let Some(current) = anchor {
                let candidate = format!("{}.{}", current, reference.dotted);
                if self.is_module_like(&candidate) {
                    return vec![ImportTarget::Internal(candidate)];
                }
                if current == self.graph.repo_name() {
                    break;
                }
                anchor = parent_name(current);
            }
            return vec![ImportTarget::External(reference.dotted.clone())];
        }

        let mut base = Some(package);
        for _ in 1..reference.level {
            base = base.and_then(parent_name);
        }
        let Some(base) = base.filter(|b| self.within_repository(b)) else {
            return Vec::new();
        };

        if !reference.dotted.is_empty() {
            let candidate = format!("{}.{}", base, reference.dotted);
            // Unparsed siblings and native extensions still get a placeholder
            return if self.is_module_like(&candidate) {
                vec![ImportTarget::Internal(candidate)]
            } else {
                vec![ImportTarget::External(candidate)]
            };
        }

        let mut targets: Vec<ImportTarget> = reference
            .names
            .iter()
            .map(|name| {
                let candidate = format!("{}.{}", base, name);
                if self.is_module_like(&candidate) {
                    ImportTarget::Internal(candidate)
                } else {
                    ImportTarget::Internal(base.to_string())
                }
            })
            .collect();
        if targets.is_empty() {
            targets.push(ImportTarget::Internal(base.to_string()));
        }
        targets.dedup();
        targets
    }

    fn is_module_like(&self, qualified_name: &str) -> bool {
        matches!(
            self.graph.kind_of(qualified_name),
            Some(NodeKind::Module | NodeKind::Directory)
        )
    }

    fn within_repository(&self, qualified_name: &str) -> bool {
        let repo = self.graph.repo_name();
        qualified_name == repo
            || qualified_name
                .strip_prefix(repo)
                .map(|rest| rest.starts_with('.'))
                .unwrap_or(false)
    }
}

/// All module references in a file, at any nesting depth
fn collect_references(module: &ParsedModule) -> Vec<ModuleReference> {
    let mut references = Vec::new();
    let mut stack = vec![module.tree.root_node()];

    while let Some(node) = stack.pop() {
        if let Some(found) = module.language.module_references(node, &module.source) {
            references.extend(found);
            continue;
        }
        let mut cursor = node.walk();
        let children: Vec<_> = node.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }

    references
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::BuildConfig;
    use crate::core::graph::Relationship;
    use crate::core::parser::CodeParser;
    use crate::languages::LanguageRegistry;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn build(root: &Path) -> (CodeGraph, ImportStats) {
        let parser = CodeParser::new(LanguageRegistry::new(), BuildConfig::default());
        let mut out = parser.parse_repository(root, "repo").unwrap();
        let stats = ImportExtractor::new(&mut out.graph).run(&out.sources);
        (out.graph, stats)
    }

    fn imports_of(graph: &CodeGraph, module: &str) -> Vec<String> {
        let mut targets: Vec<String> = graph
            .outgoing(module, Relationship::Imports)
            .iter()
            .map(|n| n.qualified_name().to_string())
            .collect();
        targets.sort();
        targets
    }

    #[test]
    fn test_absolute_and_external_imports() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "pkg/util.py", "def helper():\n    pass\n");
        write(
            dir.path(),
            "pkg/app.py",
            "import os.path\nimport requests\nfrom pkg.util import helper\nfrom pkg import util\n\ndef run():\n    import json\n",
        );

        let (graph, stats) = build(dir.path());
        assert_eq!(
            imports_of(&graph, "repo.pkg.app"),
            vec!["json", "os.path", "repo.pkg", "repo.pkg.util", "requests"]
        );
        assert_eq!(graph.kind_of("os.path"), Some(NodeKind::ExternalModule));
        assert_eq!(graph.kind_of("repo.pkg.util"), Some(NodeKind::Module));
        assert_eq!(stats.external, 3);
        assert_eq!(stats.dropped, 0);
    }

    #[test]
    fn test_sibling_import_resolves_from_package() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "pkg/util.py", "X = 1\n");
        write(dir.path(), "pkg/app.py", "import util\n");

        let (graph, _) = build(dir.path());
        assert_eq!(imports_of(&graph, "repo.pkg.app"), vec!["repo.pkg.util"]);
    }

    #[test]
    fn test_relative_imports() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "pkg/util.py", "X = 1\n");
        write(dir.path(), "pkg/sub/leaf.py", "Y = 2\n");
        write(
            dir.path(),
            "pkg/sub/mod.py",
            "from . import leaf, CONSTANT\nfrom ..util import X\n",
        );
        write(dir.path(), "top.py", "from .. import nothing\n");

        let (graph, stats) = build(dir.path());
        assert_eq!(
            imports_of(&graph, "repo.pkg.sub.mod"),
            vec!["repo.pkg.sub", "repo.pkg.sub.leaf", "repo.pkg.util"]
        );
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.external, 0);
    }

    #[test]
    fn test_relative_import_of_unparsed_module_gets_placeholder() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "pkg/sub/broken.py", "def broken(:\n");
        write(
            dir.path(),
            "pkg/sub/app.py",
            "from .broken import x\nfrom .ext_native import y\nimport os\n",
        );

        let (graph, stats) = build(dir.path());
        assert_eq!(
            imports_of(&graph, "repo.pkg.sub.app"),
            vec!["os", "repo.pkg.sub.broken", "repo.pkg.sub.ext_native"]
        );
        assert_eq!(graph.kind_of("repo.pkg.sub.broken"), Some(NodeKind::ExternalModule));
        assert_eq!(graph.kind_of("repo.pkg.sub.ext_native"), Some(NodeKind::ExternalModule));
        assert_eq!(stats, ImportStats { internal: 0, external: 3, dropped: 0 });
    }

    #[test]
    fn test_external_name_matching_repository_is_not_linked() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "main.py", "import repo\nimport repo.main\n");

        let (graph, stats) = build(dir.path());
        assert!(imports_of(&graph, "repo.main").is_empty());
        assert!(graph.incoming("repo", Relationship::Imports).is_empty());
        assert_eq!(graph.kind_of("repo"), Some(NodeKind::Directory));
        assert_eq!(stats.dropped, 2);
    }

    #[test]
    fn test_external_node_shared_between_importers() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.py", "import numpy\n");
        write(dir.path(), "b.py", "import numpy\nimport numpy\n");

        let (graph, _) = build(dir.path());
        assert_eq!(graph.incoming("numpy", Relationship::Imports).len(), 2);
        assert_eq!(graph.edge_count_of(Relationship::Imports), 2);
    }
}
