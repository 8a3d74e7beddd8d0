//! In-memory graph store for containment, import and call relationships
//!
//! Nodes are keyed by qualified name and kept in insertion order. Edges are
//! kept in insertion order as well and collapse on the `(from, to,
//! relationship)` triple. The order of Contains edges defines declaration
//! order among siblings.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::error::GraphError;

/// Node kinds in the code graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Directory,
    Module,
    Class,
    Function,
    ExternalModule,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Directory => "directory",
            NodeKind::Module => "module",
            NodeKind::Class => "class",
            NodeKind::Function => "function",
            NodeKind::ExternalModule => "external_module",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "directory" => Ok(NodeKind::Directory),
            "module" => Ok(NodeKind::Module),
            "class" => Ok(NodeKind::Class),
            "function" => Ok(NodeKind::Function),
            "external_module" => Ok(NodeKind::ExternalModule),
            other => Err(format!("unknown node kind: {}", other)),
        }
    }
}

/// Per-kind node attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodePayload {
    Directory,
    Module,
    Class { source_text: String },
    Function { source_text: String, signature: String },
    ExternalModule,
}

/// A node in the code graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    qualified_name: String,
    payload: NodePayload,
}

impl GraphNode {
    pub fn directory(qualified_name: impl Into<String>) -> Self {
        Self::with_payload(qualified_name, NodePayload::Directory)
    }

    pub fn module(qualified_name: impl Into<String>) -> Self {
        Self::with_payload(qualified_name, NodePayload::Module)
    }

    pub fn class(qualified_name: impl Into<String>, source_text: impl Into<String>) -> Self {
        Self::with_payload(
            qualified_name,
            NodePayload::Class {
                source_text: source_text.into(),
            },
        )
    }

    pub fn function(
        qualified_name: impl Into<String>,
        source_text: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        Self::with_payload(
            qualified_name,
            NodePayload::Function {
                source_text: source_text.into(),
                signature: signature.into(),
            },
        )
    }

    pub fn external_module(qualified_name: impl Into<String>) -> Self {
        Self::with_payload(qualified_name, NodePayload::ExternalModule)
    }

    fn with_payload(qualified_name: impl Into<String>, payload: NodePayload) -> Self {
        Self {
            qualified_name: qualified_name.into(),
            payload,
        }
    }

    /// Rebuild a node from flat attributes, rejecting fields its kind cannot carry
    pub fn from_parts(
        qualified_name: String,
        kind: NodeKind,
        source_text: Option<String>,
        signature: Option<String>,
    ) -> Result<Self, GraphError> {
        let invalid = |field| GraphError::InvalidPayload {
            qualified_name: qualified_name.clone(),
            kind: kind.to_string(),
            field,
        };

        let payload = match (kind, source_text, signature) {
            (NodeKind::Directory, None, None) => NodePayload::Directory,
            (NodeKind::Module, None, None) => NodePayload::Module,
            (NodeKind::ExternalModule, None, None) => NodePayload::ExternalModule,
            (NodeKind::Class, Some(source_text), None) => NodePayload::Class { source_text },
            (NodeKind::Function, Some(source_text), Some(signature)) => NodePayload::Function {
                source_text,
                signature,
            },
            (NodeKind::Class | NodeKind::Function, None, _) => return Err(invalid("no source_text")),
            (NodeKind::Function, Some(_), None) => return Err(invalid("no signature")),
            (_, _, Some(_)) => return Err(invalid("signature")),
            (_, Some(_), None) => return Err(invalid("source_text")),
        };

        Ok(Self {
            qualified_name,
            payload,
        })
    }

    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    /// Last dot-separated segment
    pub fn name(&self) -> &str {
        short_name(&self.qualified_name)
    }

    pub fn kind(&self) -> NodeKind {
        match self.payload {
            NodePayload::Directory => NodeKind::Directory,
            NodePayload::Module => NodeKind::Module,
            NodePayload::Class { .. } => NodeKind::Class,
            NodePayload::Function { .. } => NodeKind::Function,
            NodePayload::ExternalModule => NodeKind::ExternalModule,
        }
    }

    pub fn payload(&self) -> &NodePayload {
        &self.payload
    }

    pub fn source_text(&self) -> Option<&str> {
        match &self.payload {
            NodePayload::Class { source_text } | NodePayload::Function { source_text, .. } => {
                Some(source_text)
            }
            _ => None,
        }
    }

    pub fn signature(&self) -> Option<&str> {
        match &self.payload {
            NodePayload::Function { signature, .. } => Some(signature),
            _ => None,
        }
    }
}

/// Edge relationship labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Relationship {
    Contains,
    Imports,
    Calls,
}

impl Relationship {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relationship::Contains => "CONTAINS",
            Relationship::Imports => "IMPORTS",
            Relationship::Calls => "CALLS",
        }
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Relationship {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CONTAINS" => Ok(Relationship::Contains),
            "IMPORTS" => Ok(Relationship::Imports),
            "CALLS" => Ok(Relationship::Calls),
            other => Err(format!("unknown relationship: {}", other)),
        }
    }
}

/// A directed edge between two qualified names
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub relationship: Relationship,
}

impl GraphEdge {
    pub fn new(from: impl Into<String>, to: impl Into<String>, relationship: Relationship) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            relationship,
        }
    }

    pub fn contains(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(from, to, Relationship::Contains)
    }

    pub fn imports(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(from, to, Relationship::Imports)
    }

    pub fn calls(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(from, to, Relationship::Calls)
    }
}

/// Last segment of a dotted qualified name
pub fn short_name(qualified_name: &str) -> &str {
    qualified_name
        .rsplit_once('.')
        .map(|(_, name)| name)
        .unwrap_or(qualified_name)
}

/// Qualified name with its last segment removed
pub fn parent_name(qualified_name: &str) -> Option<&str> {
    qualified_name.rsplit_once('.').map(|(parent, _)| parent)
}

fn is_valid_name(qualified_name: &str) -> bool {
    !qualified_name.is_empty() && qualified_name.split('.').all(|segment| !segment.is_empty())
}

/// The code graph for one repository build
#[derive(Debug, Clone, Default)]
pub struct CodeGraph {
    repo_name: String,
    nodes: HashMap<String, GraphNode>,
    order: Vec<String>,
    parents: HashMap<String, String>,
    children: HashMap<String, Vec<String>>,
    edges: Vec<GraphEdge>,
    edge_set: HashSet<GraphEdge>,
    outgoing: HashMap<String, Vec<usize>>,
    incoming: HashMap<String, Vec<usize>>,
}

impl CodeGraph {
    pub fn new(repo_name: impl Into<String>) -> Self {
        Self {
            repo_name: repo_name.into(),
            ..Default::default()
        }
    }

    /// Name of the root Directory node
    pub fn repo_name(&self) -> &str {
        &self.repo_name
    }

    /// Insert a node; qualified names are unique and never reassigned
    pub fn add_node(&mut self, node: GraphNode) -> Result<(), GraphError> {
        if !is_valid_name(node.qualified_name()) {
            return Err(GraphError::InvalidName(node.qualified_name().to_string()));
        }
        if self.nodes.contains_key(node.qualified_name()) {
            return Err(GraphError::DuplicateNode(node.qualified_name().to_string()));
        }

        let key = node.qualified_name().to_string();
        self.order.push(key.clone());
        self.nodes.insert(key, node);
        Ok(())
    }

    /// Insert an edge whose endpoints already exist.
    ///
    /// Returns `Ok(false)` when the same triple is already present.
    pub fn add_edge(&mut self, edge: GraphEdge) -> Result<bool, GraphError> {
        if !self.nodes.contains_key(&edge.from) || !self.nodes.contains_key(&edge.to) {
            return Err(GraphError::MissingEndpoint {
                from: edge.from,
                to: edge.to,
                relationship: edge.relationship,
            });
        }
        if self.edge_set.contains(&edge) {
            return Ok(false);
        }

        if edge.relationship == Relationship::Contains {
            if let Some(parent) = self.parents.get(&edge.to) {
                return Err(GraphError::SecondParent {
                    child: edge.to,
                    parent: parent.clone(),
                });
            }
            self.parents.insert(edge.to.clone(), edge.from.clone());
            self.children
                .entry(edge.from.clone())
                .or_default()
                .push(edge.to.clone());
        }

        let idx = self.edges.len();
        self.outgoing.entry(edge.from.clone()).or_default().push(idx);
        self.incoming.entry(edge.to.clone()).or_default().push(idx);
        self.edge_set.insert(edge.clone());
        self.edges.push(edge);
        Ok(true)
    }

    /// Insert an edge, logging and dropping it if it would violate an invariant
    pub fn link(&mut self, edge: GraphEdge) -> bool {
        match self.add_edge(edge) {
            Ok(inserted) => inserted,
            Err(e) => {
                warn!(error = %e, "graph integrity violation, edge dropped");
                false
            }
        }
    }

    pub fn node(&self, qualified_name: &str) -> Option<&GraphNode> {
        self.nodes.get(qualified_name)
    }

    pub fn contains_node(&self, qualified_name: &str) -> bool {
        self.nodes.contains_key(qualified_name)
    }

    pub fn kind_of(&self, qualified_name: &str) -> Option<NodeKind> {
        self.node(qualified_name).map(GraphNode::kind)
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> + '_ {
        self.order.iter().filter_map(|q| self.nodes.get(q))
    }

    /// Edges in insertion order
    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn has_edge(&self, edge: &GraphEdge) -> bool {
        self.edge_set.contains(edge)
    }

    pub fn node_count(&self) -> usize {
        self.order.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edge_count_of(&self, relationship: Relationship) -> usize {
        self.edges
            .iter()
            .filter(|e| e.relationship == relationship)
            .count()
    }

    /// Contains-parent of a node
    pub fn parent_of(&self, qualified_name: &str) -> Option<&GraphNode> {
        self.parents
            .get(qualified_name)
            .and_then(|p| self.nodes.get(p))
    }

    /// Contains-children in declaration order
    pub fn children_of(&self, qualified_name: &str) -> Vec<&GraphNode> {
        self.children
            .get(qualified_name)
            .map(|names| names.iter().filter_map(|n| self.nodes.get(n)).collect())
            .unwrap_or_default()
    }

    /// Targets of outgoing edges with the given relationship
    pub fn outgoing(&self, qualified_name: &str, relationship: Relationship) -> Vec<&GraphNode> {
        self.adjacent(&self.outgoing, qualified_name, relationship, |e| &e.to)
    }

    /// Sources of incoming edges with the given relationship
    pub fn incoming(&self, qualified_name: &str, relationship: Relationship) -> Vec<&GraphNode> {
        self.adjacent(&self.incoming, qualified_name, relationship, |e| &e.from)
    }

    fn adjacent<'a>(
        &'a self,
        index: &'a HashMap<String, Vec<usize>>,
        qualified_name: &str,
        relationship: Relationship,
        endpoint: impl Fn(&'a GraphEdge) -> &'a String,
    ) -> Vec<&'a GraphNode> {
        index
            .get(qualified_name)
            .map(|ids| {
                ids.iter()
                    .map(|&i| &self.edges[i])
                    .filter(|e| e.relationship == relationship)
                    .filter_map(|e| self.nodes.get(endpoint(e)))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CodeGraph {
        let mut graph = CodeGraph::new("repo");
        graph.add_node(GraphNode::directory("repo")).unwrap();
        graph.add_node(GraphNode::module("repo.a")).unwrap();
        graph
            .add_node(GraphNode::function("repo.a.f", "def f():\n    pass", "def f():"))
            .unwrap();
        graph
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut graph = sample();
        let err = graph.add_node(GraphNode::module("repo.a")).unwrap_err();
        assert_eq!(err, GraphError::DuplicateNode("repo.a".to_string()));
        assert_eq!(graph.node_count(), 3);
    }

    #[test]
    fn test_invalid_names_rejected() {
        let mut graph = CodeGraph::new("repo");
        assert!(graph.add_node(GraphNode::module("")).is_err());
        assert!(graph.add_node(GraphNode::module("repo..a")).is_err());
        assert!(graph.add_node(GraphNode::module(".a")).is_err());
    }

    #[test]
    fn test_edge_with_missing_endpoint_dropped() {
        let mut graph = sample();
        let err = graph
            .add_edge(GraphEdge::calls("repo.a.f", "repo.b.g"))
            .unwrap_err();
        assert!(matches!(err, GraphError::MissingEndpoint { .. }));
        assert!(!graph.link(GraphEdge::calls("repo.missing", "repo.a.f")));
        assert_eq!(graph.edge_count(), 0);
        assert!(!graph.contains_node("repo.b.g"));
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let mut graph = sample();
        assert!(graph.add_edge(GraphEdge::calls("repo.a", "repo.a.f")).unwrap());
        assert!(!graph.add_edge(GraphEdge::calls("repo.a", "repo.a.f")).unwrap());
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_contains_is_a_tree() {
        let mut graph = sample();
        graph.link(GraphEdge::contains("repo", "repo.a"));
        graph.link(GraphEdge::contains("repo.a", "repo.a.f"));
        let err = graph
            .add_edge(GraphEdge::contains("repo", "repo.a.f"))
            .unwrap_err();
        assert!(matches!(err, GraphError::SecondParent { .. }));
        assert_eq!(graph.parent_of("repo.a.f").unwrap().qualified_name(), "repo.a");
    }

    #[test]
    fn test_children_keep_declaration_order() {
        let mut graph = sample();
        graph.link(GraphEdge::contains("repo", "repo.a"));
        for name in ["f3", "f1", "f2"] {
            let q = format!("repo.a.{}", name);
            graph
                .add_node(GraphNode::function(q.clone(), "", "def x():"))
                .unwrap();
            graph.link(GraphEdge::contains("repo.a", q));
        }
        let names: Vec<_> = graph
            .children_of("repo.a")
            .iter()
            .map(|n| n.name().to_string())
            .collect();
        assert_eq!(names, vec!["f3", "f1", "f2"]);
    }

    #[test]
    fn test_adjacency_by_relationship() {
        let mut graph = sample();
        graph.add_node(GraphNode::external_module("os")).unwrap();
        graph.link(GraphEdge::contains("repo.a", "repo.a.f"));
        graph.link(GraphEdge::imports("repo.a", "os"));
        graph.link(GraphEdge::calls("repo.a", "repo.a.f"));

        let calls: Vec<_> = graph
            .outgoing("repo.a", Relationship::Calls)
            .iter()
            .map(|n| n.qualified_name())
            .collect();
        assert_eq!(calls, vec!["repo.a.f"]);
        let callers: Vec<_> = graph
            .incoming("repo.a.f", Relationship::Calls)
            .iter()
            .map(|n| n.qualified_name())
            .collect();
        assert_eq!(callers, vec!["repo.a"]);
        assert_eq!(graph.outgoing("repo.a", Relationship::Imports).len(), 1);
    }

    #[test]
    fn test_payload_validation() {
        assert!(GraphNode::from_parts("m".into(), NodeKind::Module, None, None).is_ok());
        assert!(GraphNode::from_parts("m".into(), NodeKind::Module, Some("x".into()), None).is_err());
        assert!(GraphNode::from_parts("c".into(), NodeKind::Class, None, None).is_err());
        assert!(GraphNode::from_parts("c".into(), NodeKind::Class, Some("x".into()), Some("s".into())).is_err());
        assert!(GraphNode::from_parts("f".into(), NodeKind::Function, Some("x".into()), None).is_err());

        let f = GraphNode::from_parts(
            "r.f".into(),
            NodeKind::Function,
            Some("def f(): pass".into()),
            Some("def f():".into()),
        )
        .unwrap();
        assert_eq!(f.signature(), Some("def f():"));
        assert_eq!(f.name(), "f");
    }

    /// Shuffle edges and nodes with a fixed xorshift; an edge lands only once both ends exist.
    #[test]
    fn test_endpoint_invariant_under_shuffled_insertion() {
        let names: Vec<String> = (0..12).map(|i| format!("repo.n{}", i)).collect();
        let mut edges = Vec::new();
        for (i, a) in names.iter().enumerate() {
            for b in names.iter().skip(i + 1).step_by(3) {
                edges.push(GraphEdge::calls(a.clone(), b.clone()));
            }
        }

        let mut seed: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        for _ in 0..50 {
            #[derive(Clone)]
            enum Op {
                Node(String),
                Edge(GraphEdge),
            }
            let mut ops: Vec<Op> = names
                .iter()
                .cloned()
                .map(Op::Node)
                .chain(edges.iter().cloned().map(Op::Edge))
                .collect();
            for i in (1..ops.len()).rev() {
                let j = (next() % (i as u64 + 1)) as usize;
                ops.swap(i, j);
            }

            let mut graph = CodeGraph::new("repo");
            for op in ops {
                match op {
                    Op::Node(name) => graph.add_node(GraphNode::module(name)).unwrap(),
                    Op::Edge(edge) => {
                        let both_exist =
                            graph.contains_node(&edge.from) && graph.contains_node(&edge.to);
                        assert_eq!(graph.link(edge), both_exist);
                    }
                }
            }
            for edge in graph.edges() {
                assert!(graph.contains_node(&edge.from));
                assert!(graph.contains_node(&edge.to));
            }
        }
    }
}
