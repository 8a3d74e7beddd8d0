//! Integration tests for repograph
//!
//! These tests run the full build pipeline over small repositories on disk
//! and check the resulting graphs, exports and storage.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use repograph::core::export;
use repograph::core::query::Direction;
use repograph::oracle::{Location, OracleError, Position};
use repograph::{
    BuildOutcome, CallPhase, CodeGraph, Config, Database, DefinitionOracle, GraphEdge, NodeKind, ProjectBuilder,
    QueryExecutor, Relationship, StaticOracle,
};

fn setup_repository(files: &[(&str, &str)]) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let root = fs::canonicalize(temp_dir.path()).unwrap().join("pkg");
    for (rel, content) in files {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    (temp_dir, root)
}

fn offline_builder() -> ProjectBuilder {
    let mut config = Config::default();
    config.oracle.enabled = false;
    ProjectBuilder::new(config)
}

fn build(root: &Path, oracle: Option<&StaticOracle>) -> BuildOutcome {
    offline_builder()
        .build_with_oracle(root, None, oracle.map(|o| o as &dyn DefinitionOracle))
        .unwrap()
}

fn edge_set(graph: &CodeGraph) -> BTreeSet<(String, String, Relationship)> {
    graph
        .edges()
        .iter()
        .filter(|e| graph.kind_of(&e.from) != Some(NodeKind::Directory))
        .map(|e| (e.from.clone(), e.to.clone(), e.relationship))
        .collect()
}

const FOO_A: &str = "def foo():\n    return 'a'\n";
const FOO_B: &str = "def foo():\n    return 'b'\n";

#[test]
fn test_ambiguous_call_resolved_by_oracle() {
    let main = "foo()\n";
    let (_dir, root) = setup_repository(&[("a.py", FOO_A), ("b.py", FOO_B), ("main.py", main)]);

    let mut oracle = StaticOracle::new();
    oracle.insert(
        root.join("main.py"),
        Position::new(0, 0),
        vec![Location::at(root.join("b.py"), 0, 4)],
    );
    let outcome = build(&root, Some(&oracle));
    let graph = &outcome.graph;

    assert!(graph.has_edge(&GraphEdge::calls("pkg.main", "pkg.b.foo")));
    assert!(!graph.has_edge(&GraphEdge::calls("pkg.main", "pkg.a.foo")));
    assert_eq!(oracle.query_count(), 1);

    match &outcome.report.calls {
        CallPhase::Completed { stats, oracle } => {
            assert!(*oracle);
            assert_eq!(stats.disambiguated, 1);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_external_call_adds_no_edge() {
    let (_dir, root) = setup_repository(&[(
        "client.py",
        "import requests\n\ndef fetch():\n    return requests.get('https://example.org')\n",
    )]);
    let outcome = build(&root, None);
    let graph = &outcome.graph;

    assert_eq!(graph.kind_of("requests"), Some(NodeKind::ExternalModule));
    assert!(graph.has_edge(&GraphEdge::imports("pkg.client", "requests")));
    assert_eq!(graph.edge_count_of(Relationship::Calls), 0);
    assert!(outcome.report.calls.is_complete());
    assert_eq!(outcome.report.imports.external, 1);
}

#[test]
fn test_context_above_and_below() {
    let (_dir, root) = setup_repository(&[(
        "funcs.py",
        "def f1():\n    pass\n\ndef f2():\n    pass\n\ndef f3():\n    pass\n",
    )]);
    let outcome = build(&root, None);
    let query = QueryExecutor::new(&outcome.graph);

    let above: Vec<_> = query.context_above("pkg.funcs.f2").iter().map(|n| n.qualified_name()).collect();
    let below: Vec<_> = query.context_below("pkg.funcs.f2").iter().map(|n| n.qualified_name()).collect();
    assert_eq!(above, vec!["pkg.funcs.f1"]);
    assert_eq!(below, vec!["pkg.funcs.f3"]);
}

#[test]
fn test_two_file_project_edge_set() {
    let (_dir, root) = setup_repository(&[
        ("a.py", "from b import g\n\ndef f():\n    g()\n"),
        ("b.py", "def g():\n    pass\n"),
    ]);
    let outcome = build(&root, None);

    let expected: BTreeSet<_> = [
        ("pkg.a", "pkg.a.f", Relationship::Contains),
        ("pkg.b", "pkg.b.g", Relationship::Contains),
        ("pkg.a", "pkg.b", Relationship::Imports),
        ("pkg.a.f", "pkg.b.g", Relationship::Calls),
    ]
    .into_iter()
    .map(|(from, to, rel)| (from.to_string(), to.to_string(), rel))
    .collect();
    assert_eq!(edge_set(&outcome.graph), expected);
}

#[test]
fn test_hierarchy_of_nested_packages() {
    let (_dir, root) = setup_repository(&[
        ("app/__init__.py", ""),
        ("app/models/user.py", "class User:\n    def save(self):\n        pass\n"),
        ("app/.hidden/skip.py", "def nope():\n    pass\n"),
        ("__pycache__/cached.py", "def nope():\n    pass\n"),
        ("broken.py", "def broken(:\n"),
    ]);
    let outcome = build(&root, None);
    let graph = &outcome.graph;

    assert_eq!(graph.kind_of("pkg"), Some(NodeKind::Directory));
    assert_eq!(graph.kind_of("pkg.app"), Some(NodeKind::Directory));
    assert_eq!(graph.kind_of("pkg.app.__init__"), Some(NodeKind::Module));
    assert_eq!(graph.kind_of("pkg.app.models.user.User"), Some(NodeKind::Class));
    assert_eq!(graph.kind_of("pkg.app.models.user.User.save"), Some(NodeKind::Function));
    assert_eq!(
        graph.parent_of("pkg.app.models.user").map(|n| n.qualified_name()),
        Some("pkg.app.models")
    );
    assert!(graph.nodes().all(|n| !n.qualified_name().contains("nope")));
    assert!(!graph.contains_node("pkg.broken"));
    assert_eq!(outcome.report.skipped_files.len(), 1);

    for node in graph.nodes() {
        if node.kind() != NodeKind::ExternalModule && node.qualified_name() != "pkg" {
            assert!(graph.parent_of(node.qualified_name()).is_some(), "{} has no parent", node.qualified_name());
        }
    }
}

#[test]
fn test_shadowed_ambiguous_name_is_unresolved() {
    let main = "def run(foo):\n    foo()\n";
    let (_dir, root) = setup_repository(&[("a.py", FOO_A), ("b.py", FOO_B), ("main.py", main)]);
    let oracle = StaticOracle::new();
    let outcome = build(&root, Some(&oracle));

    assert_eq!(outcome.graph.edge_count_of(Relationship::Calls), 0);
    assert_eq!(oracle.query_count(), 0);
    match &outcome.report.calls {
        CallPhase::Completed { stats, .. } => assert_eq!(stats.shadowed, 1),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_dead_oracle_keeps_structure_and_imports() {
    let main = "import os\nfrom a import foo\n\ndef run():\n    foo()\n";
    let (_dir, root) = setup_repository(&[("a.py", FOO_A), ("b.py", FOO_B), ("main.py", main)]);
    let oracle = StaticOracle::failing(OracleError::SessionDead("server exited".to_string()));
    let outcome = build(&root, Some(&oracle));
    let graph = &outcome.graph;

    assert!(matches!(outcome.report.calls, CallPhase::Aborted { .. }));
    assert_eq!(graph.edge_count_of(Relationship::Calls), 0);
    assert!(graph.has_edge(&GraphEdge::imports("pkg.main", "os")));
    assert!(graph.has_edge(&GraphEdge::imports("pkg.main", "pkg.a")));
    assert!(graph.contains_node("pkg.main.run"));
}

#[test]
fn test_method_call_through_class() {
    let (_dir, root) = setup_repository(&[
        ("shapes.py", "class Circle:\n    def area(self):\n        return 3\n\nclass Square:\n    def area(self):\n        return 4\n"),
        ("main.py", "from shapes import Circle\n\ndef run():\n    return Circle.area(None)\n"),
    ]);
    let outcome = build(&root, None);
    assert!(outcome
        .graph
        .has_edge(&GraphEdge::calls("pkg.main.run", "pkg.shapes.Circle.area")));
    assert!(!outcome
        .graph
        .has_edge(&GraphEdge::calls("pkg.main.run", "pkg.shapes.Square.area")));
}

#[test]
fn test_context_partitions_siblings_everywhere() {
    let (_dir, root) = setup_repository(&[
        ("m.py", "def z():\n    pass\n\nclass K:\n    def b(self):\n        pass\n    def a(self):\n        pass\n\ndef y():\n    pass\n"),
        ("sub/n.py", "x = 1\n"),
    ]);
    let outcome = build(&root, None);
    let graph = &outcome.graph;
    let query = QueryExecutor::new(graph);

    for node in graph.nodes() {
        let Some(parent) = graph.parent_of(node.qualified_name()) else {
            continue;
        };
        let mut joined: Vec<&str> = query
            .context_above(node.qualified_name())
            .iter()
            .map(|n| n.qualified_name())
            .collect();
        joined.push(node.qualified_name());
        joined.extend(query.context_below(node.qualified_name()).iter().map(|n| n.qualified_name()));

        let siblings: Vec<&str> = graph
            .children_of(parent.qualified_name())
            .iter()
            .map(|n| n.qualified_name())
            .collect();
        assert_eq!(joined, siblings);
    }

    let methods: Vec<_> = graph.children_of("pkg.m.K").iter().map(|n| n.name().to_string()).collect();
    assert_eq!(methods, vec!["b", "a"]);
}

#[test]
fn test_json_export_round_trip() {
    let (dir, root) = setup_repository(&[
        ("a.py", "import json\nfrom b import g\n\ndef f():\n    g()\n"),
        ("b.py", "class G:\n    \"\"\"Doc.\"\"\"\n\ndef g():\n    pass\n"),
    ]);
    let outcome = build(&root, None);
    let path = dir.path().join("graph.json");

    export::write_json(&outcome.graph, &path).unwrap();
    let loaded = export::read_json(&path).unwrap();

    assert_eq!(loaded.repo_name(), "pkg");
    assert_eq!(loaded.nodes().collect::<Vec<_>>(), outcome.graph.nodes().collect::<Vec<_>>());
    assert_eq!(loaded.edges(), outcome.graph.edges());
}

#[test]
fn test_database_round_trip_and_queries() {
    let (_dir, root) = setup_repository(&[
        ("a.py", "from b import g\n\ndef f():\n    g()\n\ndef h():\n    g()\n"),
        ("b.py", "def g():\n    pass\n"),
    ]);
    let outcome = build(&root, None);

    let mut db = Database::open_in_memory().unwrap();
    db.init_schema().unwrap();
    db.save_graph(&root.to_string_lossy(), &outcome.graph, Some(&outcome.report))
        .unwrap();

    let status = db.get_project_status("pkg").unwrap().unwrap();
    assert_eq!(status.status, "complete");
    assert_eq!(status.calls_count, 2);
    assert_eq!(status.report.unwrap().repository, "pkg");

    let graph = db.load_graph("pkg").unwrap().unwrap();
    let callers = QueryExecutor::new(&graph)
        .neighbors("pkg.b.g", Relationship::Calls, Direction::Incoming)
        .unwrap();
    let names: Vec<_> = callers.incoming.iter().map(|n| n.qualified_name.as_str()).collect();
    assert_eq!(names, vec!["pkg.a.f", "pkg.a.h"]);
}

#[test]
fn test_missing_root_fails() {
    let dir = TempDir::new().unwrap();
    let result = offline_builder().build(&dir.path().join("absent"), None);
    assert!(result.is_err());
}
