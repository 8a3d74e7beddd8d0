//! Call resolution
//!
//! Runs after the symbol table is frozen. Every call expression is reduced to
//! a [`CallSite`] (caller qualified name plus callee tokens) and then resolved:
//!
//! - no symbol-table candidate: unresolved, no edge
//! - exactly one candidate: exact, no oracle query
//! - two or more: the oracle is asked where the callee token is defined, the
//!   answer is mapped back to a qualified name and validated against the
//!   candidates
//!
//! A member call `recv.method()` is first resolved through its receiver when
//! the receiver names a known class, then falls back to the method's short
//! name. Files are processed in parallel; the resulting edges are handed back
//! to the caller, which applies them as the single writer.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use tree_sitter::{Node, Point};

use crate::core::graph::{CodeGraph, GraphEdge, NodeKind};
use crate::core::parser::{ParsedModule, SourceSet};
use crate::core::symbols::{ScopeStack, SymbolTable};
use crate::languages::{node_text, CalleeShape, DefinitionKind};
use crate::oracle::position::{byte_to_utf16_column, line_text, utf16_to_byte_column};
use crate::oracle::{DefinitionOracle, Location, OracleError, Position};

/// An identifier token of a callee expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameToken {
    pub text: String,
    /// Row and byte column of the token start
    pub point: Point,
    /// Bound as a parameter of an enclosing function
    pub shadowed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalleeRef {
    Name(NameToken),
    Member {
        receiver: Option<NameToken>,
        member: NameToken,
    },
}

/// A call expression reduced to plain data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub caller: String,
    pub callee: CalleeRef,
}

/// Outcome of resolving one callee
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Exact(String),
    Disambiguated(String),
    /// No candidate in the symbol table
    Unknown,
    /// Ambiguous name bound by an enclosing parameter
    Shadowed,
    /// Ambiguous and the oracle gave no usable answer
    Ambiguous,
}

impl Resolution {
    pub fn target(&self) -> Option<&str> {
        match self {
            Resolution::Exact(q) | Resolution::Disambiguated(q) => Some(q),
            _ => None,
        }
    }
}

/// Per-build call resolution counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionStats {
    pub call_sites: usize,
    pub exact: usize,
    pub disambiguated: usize,
    pub unresolved: usize,
    pub ambiguous_unresolved: usize,
    pub shadowed: usize,
    pub oracle_queries: usize,
}

#[derive(Default)]
struct Counters {
    call_sites: AtomicUsize,
    exact: AtomicUsize,
    disambiguated: AtomicUsize,
    unresolved: AtomicUsize,
    ambiguous_unresolved: AtomicUsize,
    shadowed: AtomicUsize,
    oracle_queries: AtomicUsize,
}

impl Counters {
    fn record(&self, resolution: &Resolution) {
        let counter = match resolution {
            Resolution::Exact(_) => &self.exact,
            Resolution::Disambiguated(_) => &self.disambiguated,
            Resolution::Unknown => &self.unresolved,
            Resolution::Shadowed => &self.shadowed,
            Resolution::Ambiguous => &self.ambiguous_unresolved,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ResolutionStats {
        ResolutionStats {
            call_sites: self.call_sites.load(Ordering::Relaxed),
            exact: self.exact.load(Ordering::Relaxed),
            disambiguated: self.disambiguated.load(Ordering::Relaxed),
            unresolved: self.unresolved.load(Ordering::Relaxed),
            ambiguous_unresolved: self.ambiguous_unresolved.load(Ordering::Relaxed),
            shadowed: self.shadowed.load(Ordering::Relaxed),
            oracle_queries: self.oracle_queries.load(Ordering::Relaxed),
        }
    }
}

/// Calls edges produced by a completed resolution phase
#[derive(Debug, Clone)]
pub struct ResolvedCalls {
    pub edges: Vec<GraphEdge>,
    pub stats: ResolutionStats,
}

impl ResolvedCalls {
    /// Insert the edges; returns how many were new
    pub fn apply(&self, graph: &mut CodeGraph) -> usize {
        self.edges
            .iter()
            .filter(|edge| graph.link((*edge).clone()))
            .count()
    }
}

/// Resolves call sites against a frozen symbol table
pub struct CallResolver<'a> {
    graph: &'a CodeGraph,
    symbols: &'a SymbolTable,
    sources: &'a SourceSet,
    root: &'a Path,
    oracle: Option<&'a dyn DefinitionOracle>,
    counters: Counters,
    aborted: AtomicBool,
}

enum Step<'tree> {
    Enter(Node<'tree>),
    Open { name: String, parameters: Vec<String> },
    Leave,
}

impl<'a> CallResolver<'a> {
    pub fn new(
        graph: &'a CodeGraph,
        symbols: &'a SymbolTable,
        sources: &'a SourceSet,
        root: &'a Path,
        oracle: Option<&'a dyn DefinitionOracle>,
    ) -> Self {
        Self {
            graph,
            symbols,
            sources,
            root,
            oracle,
            counters: Counters::default(),
            aborted: AtomicBool::new(false),
        }
    }

    /// Resolve every call site of every parsed module.
    ///
    /// A fatal oracle error aborts the whole phase; no edges are returned then.
    pub fn run(&self) -> Result<ResolvedCalls, OracleError> {
        let per_module: Vec<Vec<GraphEdge>> = self
            .sources
            .modules()
            .par_iter()
            .map(|module| self.resolve_module(module))
            .collect::<Result<_, _>>()?;

        let stats = self.counters.snapshot();
        info!(
            call_sites = stats.call_sites,
            exact = stats.exact,
            disambiguated = stats.disambiguated,
            unresolved = stats.unresolved,
            ambiguous = stats.ambiguous_unresolved,
            shadowed = stats.shadowed,
            oracle_queries = stats.oracle_queries,
            "call resolution complete"
        );

        Ok(ResolvedCalls {
            edges: per_module.into_iter().flatten().collect(),
            stats,
        })
    }

    fn resolve_module(&self, module: &ParsedModule) -> Result<Vec<GraphEdge>, OracleError> {
        let mut edges = Vec::new();
        for site in collect_call_sites(module) {
            self.counters.call_sites.fetch_add(1, Ordering::Relaxed);
            let resolution = self.resolve_site(module, &site)?;
            self.counters.record(&resolution);
            if let Some(target) = resolution.target() {
                edges.push(GraphEdge::calls(site.caller.clone(), target));
            }
        }
        Ok(edges)
    }

    /// Resolve one call site of `module`
    pub fn resolve_site(&self, module: &ParsedModule, site: &CallSite) -> Result<Resolution, OracleError> {
        match &site.callee {
            CalleeRef::Name(token) => self.resolve_name(module, &site.caller, token),
            CalleeRef::Member { receiver, member } => {
                if let Some(receiver) = receiver {
                    if let Some(class) = self.resolve_receiver_class(module, &site.caller, receiver)? {
                        let target = format!("{}.{}", class.target().unwrap_or_default(), member.text);
                        return Ok(match (class, self.graph.contains_node(&target)) {
                            (_, false) => {
                                debug!(callee = %target, "member not defined on resolved class");
                                Resolution::Unknown
                            }
                            (Resolution::Disambiguated(_), true) => Resolution::Disambiguated(target),
                            (_, true) => Resolution::Exact(target),
                        });
                    }
                }
                self.resolve_name(module, &site.caller, member)
            }
        }
    }

    fn resolve_name(
        &self,
        module: &ParsedModule,
        caller: &str,
        token: &NameToken,
    ) -> Result<Resolution, OracleError> {
        let candidates: Vec<&str> = self
            .symbols
            .lookup(&token.text)
            .iter()
            .map(String::as_str)
            .collect();
        self.choose(module, caller, token, &candidates)
    }

    /// Class named by a member call's receiver, if it resolves to one
    fn resolve_receiver_class(
        &self,
        module: &ParsedModule,
        caller: &str,
        receiver: &NameToken,
    ) -> Result<Option<Resolution>, OracleError> {
        let classes: Vec<&str> = self
            .symbols
            .lookup(&receiver.text)
            .iter()
            .map(String::as_str)
            .filter(|q| self.graph.kind_of(q) == Some(NodeKind::Class))
            .collect();

        let resolution = self.choose(module, caller, receiver, &classes)?;
        Ok(resolution.target().is_some().then_some(resolution))
    }

    fn choose(
        &self,
        module: &ParsedModule,
        caller: &str,
        token: &NameToken,
        candidates: &[&str],
    ) -> Result<Resolution, OracleError> {
        match candidates {
            [] => Ok(Resolution::Unknown),
            [only] => Ok(Resolution::Exact((*only).to_string())),
            _ if token.shadowed => {
                debug!(caller, callee = %token.text, "ambiguous name shadowed by parameter");
                Ok(Resolution::Shadowed)
            }
            _ => {
                let resolution = self.disambiguate(module, token, candidates)?;
                if resolution == Resolution::Ambiguous {
                    warn!(
                        caller,
                        callee = %token.text,
                        candidates = candidates.len(),
                        "ambiguous call left unresolved"
                    );
                }
                Ok(resolution)
            }
        }
    }

    fn disambiguate(
        &self,
        module: &ParsedModule,
        token: &NameToken,
        candidates: &[&str],
    ) -> Result<Resolution, OracleError> {
        let Some(oracle) = self.oracle else {
            return Ok(Resolution::Ambiguous);
        };
        if self.aborted.load(Ordering::Relaxed) {
            return Err(OracleError::SessionDead("call resolution aborted".to_string()));
        }

        let line = line_text(&module.source, token.point.row).unwrap_or_default();
        let position = Position::new(
            token.point.row as u32,
            byte_to_utf16_column(line, token.point.column),
        );

        self.counters.oracle_queries.fetch_add(1, Ordering::Relaxed);
        let locations = match oracle.definition_of(&module.path, position) {
            Ok(locations) => locations,
            Err(e) if e.is_fatal() => {
                self.aborted.store(true, Ordering::Relaxed);
                return Err(e);
            }
            Err(e) => {
                debug!(error = %e, callee = %token.text, "oracle gave no answer");
                return Ok(Resolution::Ambiguous);
            }
        };

        let Some(reconstructed) = locations.first().and_then(|l| self.qualified_name_at(l)) else {
            return Ok(Resolution::Ambiguous);
        };

        Ok(match best_candidate(&reconstructed, candidates) {
            Some(candidate) => Resolution::Disambiguated(candidate.to_string()),
            None => {
                debug!(%reconstructed, "oracle answer matches no candidate");
                Resolution::Ambiguous
            }
        })
    }

    /// Qualified name of the innermost definition enclosing an oracle location
    fn qualified_name_at(&self, location: &Location) -> Option<String> {
        let path = fs::canonicalize(&location.path).unwrap_or_else(|_| location.path.clone());
        if !path.starts_with(self.root) {
            debug!(path = ?path, "definition outside the repository");
            return None;
        }
        let Some(module) = self.sources.get(&path) else {
            debug!(path = ?path, "definition in a file that is not part of the build");
            return None;
        };

        let row = location.range.start.line as usize;
        let line = line_text(&module.source, row)?;
        let point = Point::new(row, utf16_to_byte_column(line, location.range.start.character));
        let node = module
            .tree
            .root_node()
            .descendant_for_point_range(point, point)?;

        Some(enclosing_qualified_name(module, node))
    }
}

/// Longest candidate equal to `reconstructed` or a dotted prefix of it
fn best_candidate<'c>(reconstructed: &str, candidates: &[&'c str]) -> Option<&'c str> {
    candidates
        .iter()
        .copied()
        .filter(|c| {
            reconstructed == *c
                || reconstructed
                    .strip_prefix(*c)
                    .map(|rest| rest.starts_with('.'))
                    .unwrap_or(false)
        })
        .max_by_key(|c| c.len())
}

/// Walk upward from `node`, collecting definition names root to leaf
fn enclosing_qualified_name(module: &ParsedModule, node: Node) -> String {
    let mut names = Vec::new();
    let mut current = Some(node);
    while let Some(n) = current {
        if module.language.definition_kind(n).is_some() {
            if let Some(name) = module.language.definition_name(n) {
                names.push(node_text(name, &module.source));
            }
        }
        current = n.parent();
    }

    std::iter::once(module.qualified_name.as_str())
        .chain(names.into_iter().rev())
        .collect::<Vec<_>>()
        .join(".")
}

/// Every call expression of a module with its enclosing scope
pub fn collect_call_sites(module: &ParsedModule) -> Vec<CallSite> {
    let language = module.language.as_ref();
    let source = module.source.as_str();
    let mut scope = ScopeStack::new(&module.qualified_name);
    let mut sites = Vec::new();
    let mut stack = vec![Step::Enter(module.tree.root_node())];

    let token = |node: Node, scope: &ScopeStack| {
        let text = node_text(node, source).to_string();
        NameToken {
            shadowed: scope.is_parameter(&text),
            text,
            point: node.start_position(),
        }
    };

    while let Some(step) = stack.pop() {
        let node = match step {
            Step::Leave => {
                scope.pop();
                continue;
            }
            Step::Open { name, parameters } => {
                scope.push(&name, parameters);
                continue;
            }
            Step::Enter(node) => node,
        };

        if let Some(kind) = language.definition_kind(node) {
            let Some(name) = language.definition_name(node) else {
                continue;
            };
            let parameters = match kind {
                DefinitionKind::Function => language.parameter_names(node, source),
                DefinitionKind::Class => Vec::new(),
            };
            // Defaults, annotations and bases belong to the enclosing scope
            let body = language.definition_body(node);
            if let Some(body) = body {
                stack.push(Step::Leave);
                stack.push(Step::Enter(body));
                stack.push(Step::Open {
                    name: node_text(name, source).to_string(),
                    parameters,
                });
            }
            let mut cursor = node.walk();
            let header: Vec<Node> = node.children(&mut cursor).filter(|c| Some(*c) != body).collect();
            stack.extend(header.into_iter().rev().map(Step::Enter));
            continue;
        } else if let Some(shape) = language.callee(node) {
            let callee = match shape {
                CalleeShape::Identifier(ident) => Some(CalleeRef::Name(token(ident, &scope))),
                CalleeShape::Member { receiver, member } => Some(CalleeRef::Member {
                    receiver: receiver.map(|r| token(r, &scope)),
                    member: token(member, &scope),
                }),
                CalleeShape::Other => None,
            };
            if let Some(callee) = callee {
                sites.push(CallSite {
                    caller: scope.current().to_string(),
                    callee,
                });
            }
        }

        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev().map(Step::Enter));
    }

    sites
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::BuildConfig;
    use crate::core::graph::Relationship;
    use crate::core::parser::{CodeParser, HierarchyOutput};
    use crate::languages::LanguageRegistry;
    use crate::oracle::StaticOracle;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        out: HierarchyOutput,
    }

    fn fixture(files: &[(&str, &str)]) -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        for (rel, content) in files {
            let path = root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        let parser = CodeParser::new(LanguageRegistry::new(), BuildConfig::default());
        let out = parser.parse_repository(&root, "pkg").unwrap();
        Fixture {
            _dir: dir,
            root,
            out,
        }
    }

    /// Zero-based (line, column) of the first occurrence of `needle`
    fn position_of(source: &str, needle: &str) -> Position {
        let offset = source.find(needle).unwrap();
        let line = source[..offset].matches('\n').count();
        let column = offset - source[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
        Position::new(line as u32, column as u32)
    }

    fn run(f: &Fixture, oracle: Option<&dyn DefinitionOracle>) -> Result<ResolvedCalls, OracleError> {
        CallResolver::new(&f.out.graph, &f.out.symbols, &f.out.sources, &f.root, oracle).run()
    }

    fn has_call(calls: &ResolvedCalls, from: &str, to: &str) -> bool {
        calls.edges.contains(&GraphEdge::calls(from, to))
    }

    const A: &str = "def foo():\n    return 'a'\n";
    const B: &str = "def foo():\n    return 'b'\n";
    const MAIN: &str = "def run():\n    foo()\n";

    #[test]
    fn test_call_site_scopes() {
        let f = fixture(&[(
            "mod.py",
            "setup()\n\nclass Box:\n    def open(self, key):\n        key()\n        self.check()\n        helpers[0]()\n",
        )]);
        let module = &f.out.sources.modules()[0];
        let sites = collect_call_sites(module);

        assert_eq!(sites.len(), 3);
        assert_eq!(sites[0].caller, "pkg.mod");
        assert_eq!(sites[1].caller, "pkg.mod.Box.open");
        match &sites[1].callee {
            CalleeRef::Name(token) => {
                assert_eq!(token.text, "key");
                assert!(token.shadowed);
                assert_eq!(token.point, Point::new(4, 8));
            }
            other => panic!("unexpected {:?}", other),
        }
        match &sites[2].callee {
            CalleeRef::Member { receiver, member } => {
                assert_eq!(receiver.as_ref().unwrap().text, "self");
                assert_eq!(member.text, "check");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_defaults_and_bases_are_called_from_enclosing_scope() {
        let f = fixture(&[(
            "mod.py",
            "class Box(make_base()):\n    def open(self, key=default_key(), factory=None):\n        factory()\n",
        )]);
        let module = &f.out.sources.modules()[0];
        let sites = collect_call_sites(module);

        let callers: Vec<(&str, &str)> = sites
            .iter()
            .map(|site| match &site.callee {
                CalleeRef::Name(token) => (site.caller.as_str(), token.text.as_str()),
                CalleeRef::Member { member, .. } => (site.caller.as_str(), member.text.as_str()),
            })
            .collect();
        assert_eq!(
            callers,
            vec![
                ("pkg.mod", "make_base"),
                ("pkg.mod.Box", "default_key"),
                ("pkg.mod.Box.open", "factory"),
            ]
        );
        match &sites[2].callee {
            CalleeRef::Name(token) => assert!(token.shadowed),
            other => panic!("unexpected {:?}", other),
        }
        match &sites[1].callee {
            CalleeRef::Name(token) => assert!(!token.shadowed),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unique_name_never_queries_oracle() {
        let f = fixture(&[
            ("a.py", "def helper():\n    pass\n"),
            ("main.py", "from a import helper\n\ndef run():\n    helper()\n"),
        ]);
        let oracle = StaticOracle::new();
        let calls = run(&f, Some(&oracle)).unwrap();

        assert!(has_call(&calls, "pkg.main.run", "pkg.a.helper"));
        assert_eq!(calls.stats.exact, 1);
        assert_eq!(oracle.query_count(), 0);
    }

    #[test]
    fn test_unknown_name_adds_no_edge() {
        let f = fixture(&[("main.py", "import requests\n\ndef run():\n    requests.get('x')\n    print('y')\n")]);
        let calls = run(&f, None).unwrap();
        assert!(calls.edges.is_empty());
        assert_eq!(calls.stats.call_sites, 2);
        assert_eq!(calls.stats.unresolved, 2);
    }

    #[test]
    fn test_ambiguous_name_uses_oracle_answer() {
        let f = fixture(&[("a.py", A), ("b.py", B), ("main.py", MAIN)]);
        let mut oracle = StaticOracle::new();
        oracle.insert(
            f.root.join("main.py"),
            position_of(MAIN, "foo()"),
            vec![
                Location::at(f.root.join("b.py"), 0, 4),
                Location::at(f.root.join("a.py"), 0, 4),
            ],
        );

        let calls = run(&f, Some(&oracle)).unwrap();
        assert!(has_call(&calls, "pkg.main.run", "pkg.b.foo"));
        assert!(!has_call(&calls, "pkg.main.run", "pkg.a.foo"));
        assert_eq!(calls.stats.disambiguated, 1);
        assert_eq!(oracle.query_count(), 1);
    }

    #[test]
    fn test_oracle_position_inside_body_maps_to_function() {
        let f = fixture(&[("a.py", A), ("b.py", B), ("main.py", MAIN)]);
        let mut oracle = StaticOracle::new();
        oracle.insert(
            f.root.join("main.py"),
            position_of(MAIN, "foo()"),
            vec![Location::at(f.root.join("a.py"), 1, 12)],
        );

        let calls = run(&f, Some(&oracle)).unwrap();
        assert!(has_call(&calls, "pkg.main.run", "pkg.a.foo"));
    }

    #[test]
    fn test_ambiguous_without_answer_is_unresolved() {
        let f = fixture(&[("a.py", A), ("b.py", B), ("main.py", MAIN)]);
        let oracle = StaticOracle::new();
        let calls = run(&f, Some(&oracle)).unwrap();
        assert!(calls.edges.is_empty());
        assert_eq!(calls.stats.ambiguous_unresolved, 1);

        let calls = run(&f, None).unwrap();
        assert!(calls.edges.is_empty());
    }

    #[test]
    fn test_oracle_answer_outside_root_is_unresolved() {
        let f = fixture(&[("a.py", A), ("b.py", B), ("main.py", MAIN)]);
        let elsewhere = TempDir::new().unwrap();
        let outside = elsewhere.path().join("foo.py");
        fs::write(&outside, A).unwrap();

        let mut oracle = StaticOracle::new();
        oracle.insert(
            f.root.join("main.py"),
            position_of(MAIN, "foo()"),
            vec![Location::at(outside, 0, 4)],
        );
        let calls = run(&f, Some(&oracle)).unwrap();
        assert!(calls.edges.is_empty());
        assert_eq!(calls.stats.ambiguous_unresolved, 1);
    }

    #[test]
    fn test_shadowed_ambiguous_name_skips_oracle() {
        let source = "def run(foo):\n    foo()\n";
        let f = fixture(&[("a.py", A), ("b.py", B), ("main.py", source)]);
        let oracle = StaticOracle::new();
        let calls = run(&f, Some(&oracle)).unwrap();

        assert!(calls.edges.is_empty());
        assert_eq!(calls.stats.shadowed, 1);
        assert_eq!(oracle.query_count(), 0);
    }

    #[test]
    fn test_member_calls() {
        let shapes = "class Shape:\n    def area(self):\n        return 0\n\n    @staticmethod\n    def unit():\n        return Shape()\n";
        let main = "def run(s):\n    Shape.unit()\n    s.area()\n    Shape.missing()\n";
        let f = fixture(&[("shapes.py", shapes), ("main.py", main)]);
        let calls = run(&f, None).unwrap();

        assert!(has_call(&calls, "pkg.main.run", "pkg.shapes.Shape.unit"));
        assert!(has_call(&calls, "pkg.main.run", "pkg.shapes.Shape.area"));
        assert!(has_call(&calls, "pkg.shapes.Shape.unit", "pkg.shapes.Shape"));
        assert!(!calls
            .edges
            .iter()
            .any(|e| e.to.ends_with("missing")));
    }

    #[test]
    fn test_ambiguous_receiver_class_via_oracle() {
        let a = "class Store:\n    def save(self):\n        pass\n";
        let b = "class Store:\n    def save(self):\n        pass\n";
        let main = "def run():\n    Store.save(None)\n";
        let f = fixture(&[("a.py", a), ("b.py", b), ("main.py", main)]);

        let mut oracle = StaticOracle::new();
        oracle.insert(
            f.root.join("main.py"),
            position_of(main, "Store"),
            vec![Location::at(f.root.join("b.py"), 0, 6)],
        );
        let calls = run(&f, Some(&oracle)).unwrap();
        assert!(has_call(&calls, "pkg.main.run", "pkg.b.Store.save"));
        assert_eq!(oracle.query_count(), 1);
    }

    #[test]
    fn test_transient_oracle_error_is_no_answer() {
        let f = fixture(&[("a.py", A), ("b.py", B), ("main.py", MAIN)]);
        let oracle = StaticOracle::failing(OracleError::Timeout(Duration::from_millis(5)));
        let calls = run(&f, Some(&oracle)).unwrap();
        assert!(calls.edges.is_empty());
        assert_eq!(calls.stats.ambiguous_unresolved, 1);
    }

    #[test]
    fn test_dead_session_aborts_phase() {
        let f = fixture(&[
            ("a.py", A),
            ("b.py", B),
            ("main.py", MAIN),
            ("other.py", "def bar():\n    pass\n\ndef go():\n    bar()\n"),
        ]);
        let oracle = StaticOracle::failing(OracleError::SessionDead("crashed".into()));
        let err = run(&f, Some(&oracle)).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_apply_skips_duplicates() {
        let f = fixture(&[
            ("a.py", "def helper():\n    pass\n"),
            ("main.py", "def run():\n    helper()\n    helper()\n"),
        ]);
        let calls = run(&f, None).unwrap();
        assert_eq!(calls.edges.len(), 2);

        let mut graph = f.out.graph.clone();
        assert_eq!(calls.apply(&mut graph), 1);
        assert_eq!(graph.edge_count_of(Relationship::Calls), 1);
    }

    #[test]
    fn test_best_candidate_respects_segments() {
        let candidates = ["pkg.a.foo", "pkg.a.foo_bar", "pkg.a"];
        assert_eq!(best_candidate("pkg.a.foo", &candidates), Some("pkg.a.foo"));
        assert_eq!(best_candidate("pkg.a.foo.inner", &candidates), Some("pkg.a.foo"));
        assert_eq!(best_candidate("pkg.a.foobar", &candidates), Some("pkg.a"));
        assert_eq!(best_candidate("pkg.b.foo", &candidates), None);
    }
}
