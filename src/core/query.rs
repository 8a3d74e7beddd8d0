//! Query executor for code graph queries
//!
//! Read-only operations used by external tooling: node detail, enclosing
//! ancestors, declaration-order context and one-hop neighbours.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::error::GraphError;
use crate::core::graph::{parent_name, CodeGraph, GraphNode, NodeKind, Relationship};

/// Edge direction relative to the queried node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
    Both,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Incoming => "incoming",
            Direction::Outgoing => "outgoing",
            Direction::Both => "both",
        })
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "incoming" | "in" | "callers" => Ok(Direction::Incoming),
            "outgoing" | "out" | "callees" => Ok(Direction::Outgoing),
            "both" => Ok(Direction::Both),
            other => Err(format!("unknown direction: {}", other)),
        }
    }
}

/// Short description of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub qualified_name: String,
    pub name: String,
    pub kind: NodeKind,
}

impl From<&GraphNode> for NodeSummary {
    fn from(node: &GraphNode) -> Self {
        Self {
            qualified_name: node.qualified_name().to_string(),
            name: node.name().to_string(),
            kind: node.kind(),
        }
    }
}

/// Full node description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDetail {
    pub qualified_name: String,
    pub name: String,
    pub kind: NodeKind,
    pub source_text: Option<String>,
    pub signature: Option<String>,
    pub parent: Option<String>,
    pub module: Option<String>,
    pub children: Vec<NodeSummary>,
}

/// Siblings before and after a node, in declaration order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextResult {
    pub node: NodeSummary,
    pub parent: Option<NodeSummary>,
    pub above: Vec<NodeSummary>,
    pub below: Vec<NodeSummary>,
}

/// Imports of the module enclosing a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportsResult {
    pub node: NodeSummary,
    pub module: Option<String>,
    pub imports: Vec<NodeSummary>,
}

/// One-hop neighbours over one relationship
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborsResult {
    pub node: NodeSummary,
    pub relationship: Relationship,
    pub direction: Direction,
    pub incoming: Vec<NodeSummary>,
    pub outgoing: Vec<NodeSummary>,
}

/// Query executor for the code graph
pub struct QueryExecutor<'g> {
    graph: &'g CodeGraph,
}

impl<'g> QueryExecutor<'g> {
    /// Create a new query executor
    pub fn new(graph: &'g CodeGraph) -> Self {
        Self { graph }
    }

    fn require(&self, qualified_name: &str) -> Result<&'g GraphNode, GraphError> {
        self.graph
            .node(qualified_name)
            .ok_or_else(|| GraphError::NodeNotFound(qualified_name.to_string()))
    }

    /// Nearest node of `kind` among the qualified-name prefixes of a node, itself included
    pub fn ancestor_of_kind(&self, qualified_name: &str, kind: NodeKind) -> Option<&'g GraphNode> {
        let mut current = Some(qualified_name);
        while let Some(name) = current {
            if let Some(node) = self.graph.node(name).filter(|n| n.kind() == kind) {
                return Some(node);
            }
            current = parent_name(name);
        }
        None
    }

    /// Siblings declared strictly before the node
    pub fn context_above(&self, qualified_name: &str) -> Vec<&'g GraphNode> {
        self.split_siblings(qualified_name).0
    }

    /// Siblings declared strictly after the node
    pub fn context_below(&self, qualified_name: &str) -> Vec<&'g GraphNode> {
        self.split_siblings(qualified_name).1
    }

    fn split_siblings(&self, qualified_name: &str) -> (Vec<&'g GraphNode>, Vec<&'g GraphNode>) {
        let Some(parent) = self.graph.parent_of(qualified_name) else {
            return (Vec::new(), Vec::new());
        };
        let mut siblings = self.graph.children_of(parent.qualified_name());
        match siblings
            .iter()
            .position(|n| n.qualified_name() == qualified_name)
        {
            Some(index) => {
                let below = siblings.split_off(index + 1);
                siblings.truncate(index);
                (siblings, below)
            }
            None => (Vec::new(), Vec::new()),
        }
    }

    pub fn node_detail(&self, qualified_name: &str) -> Result<NodeDetail, GraphError> {
        let node = self.require(qualified_name)?;
        Ok(NodeDetail {
            qualified_name: node.qualified_name().to_string(),
            name: node.name().to_string(),
            kind: node.kind(),
            source_text: node.source_text().map(str::to_string),
            signature: node.signature().map(str::to_string),
            parent: self
                .graph
                .parent_of(qualified_name)
                .map(|p| p.qualified_name().to_string()),
            module: self
                .ancestor_of_kind(qualified_name, NodeKind::Module)
                .map(|m| m.qualified_name().to_string()),
            children: self
                .graph
                .children_of(qualified_name)
                .into_iter()
                .map(NodeSummary::from)
                .collect(),
        })
    }

    pub fn context(&self, qualified_name: &str) -> Result<ContextResult, GraphError> {
        let node = self.require(qualified_name)?;
        let (above, below) = self.split_siblings(qualified_name);
        Ok(ContextResult {
            node: node.into(),
            parent: self.graph.parent_of(qualified_name).map(NodeSummary::from),
            above: above.into_iter().map(NodeSummary::from).collect(),
            below: below.into_iter().map(NodeSummary::from).collect(),
        })
    }

    pub fn imports_of_module(&self, qualified_name: &str) -> Result<ImportsResult, GraphError> {
        let node = self.require(qualified_name)?;
        let module = self.ancestor_of_kind(qualified_name, NodeKind::Module);
        let imports = module
            .map(|m| {
                self.graph
                    .outgoing(m.qualified_name(), Relationship::Imports)
                    .into_iter()
                    .map(NodeSummary::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(ImportsResult {
            node: node.into(),
            module: module.map(|m| m.qualified_name().to_string()),
            imports,
        })
    }

    pub fn neighbors(
        &self,
        qualified_name: &str,
        relationship: Relationship,
        direction: Direction,
    ) -> Result<NeighborsResult, GraphError> {
        let node = self.require(qualified_name)?;
        let collect = |nodes: Vec<&GraphNode>| -> Vec<NodeSummary> {
            nodes.into_iter().map(NodeSummary::from).collect()
        };

        let incoming = match direction {
            Direction::Incoming | Direction::Both => {
                collect(self.graph.incoming(qualified_name, relationship))
            }
            Direction::Outgoing => Vec::new(),
        };
        let outgoing = match direction {
            Direction::Outgoing | Direction::Both => {
                collect(self.graph.outgoing(qualified_name, relationship))
            }
            Direction::Incoming => Vec::new(),
        };

        Ok(NeighborsResult {
            node: node.into(),
            relationship,
            direction,
            incoming,
            outgoing,
        })
    }
}
