//! Graph interchange: lossless JSON documents and a GML writer

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::error::GraphError;
use crate::core::graph::{CodeGraph, GraphEdge, GraphNode, NodeKind, Relationship};

/// Serialized node: `id` is the qualified name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentNode {
    pub id: String,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentEdge {
    pub source: String,
    pub target: String,
    pub relationship: Relationship,
}

/// A graph in interchange form. Node and edge order is significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDocument {
    pub repository: String,
    pub nodes: Vec<DocumentNode>,
    pub edges: Vec<DocumentEdge>,
}

impl GraphDocument {
    pub fn from_graph(graph: &CodeGraph) -> Self {
        let nodes = graph
            .nodes()
            .map(|n| DocumentNode {
                id: n.qualified_name().to_string(),
                kind: n.kind(),
                source_text: n.source_text().map(str::to_string),
                signature: n.signature().map(str::to_string),
            })
            .collect();
        let edges = graph
            .edges()
            .iter()
            .map(|e| DocumentEdge {
                source: e.from.clone(),
                target: e.to.clone(),
                relationship: e.relationship,
            })
            .collect();

        Self {
            repository: graph.repo_name().to_string(),
            nodes,
            edges,
        }
    }

    /// Rebuild the graph, enforcing every store invariant
    pub fn into_graph(self) -> Result<CodeGraph, GraphError> {
        let mut graph = CodeGraph::new(self.repository);
        for node in self.nodes {
            graph.add_node(GraphNode::from_parts(
                node.id,
                node.kind,
                node.source_text,
                node.signature,
            )?)?;
        }
        for edge in self.edges {
            graph.add_edge(GraphEdge::new(edge.source, edge.target, edge.relationship))?;
        }
        Ok(graph)
    }
}

/// Write a graph as a pretty-printed JSON document
pub fn write_json(graph: &CodeGraph, path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(&GraphDocument::from_graph(graph))?;
    fs::write(path, content).with_context(|| format!("Failed to write graph: {:?}", path))?;
    Ok(())
}

/// Read a graph written by [`write_json`]
pub fn read_json(path: &Path) -> Result<CodeGraph> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read graph: {:?}", path))?;
    let document: GraphDocument = serde_json::from_str(&content)?;
    Ok(document.into_graph()?)
}

/// Write a graph in GML. Source text is omitted.
pub fn write_gml<W: Write>(graph: &CodeGraph, out: &mut W) -> io::Result<()> {
    let index: std::collections::HashMap<&str, usize> = graph
        .nodes()
        .enumerate()
        .map(|(i, n)| (n.qualified_name(), i))
        .collect();

    writeln!(out, "graph [")?;
    writeln!(out, "  directed 1")?;
    writeln!(out, "  label \"{}\"", gml_escape(graph.repo_name()))?;
    for (i, node) in graph.nodes().enumerate() {
        writeln!(out, "  node [")?;
        writeln!(out, "    id {}", i)?;
        writeln!(out, "    label \"{}\"", gml_escape(node.qualified_name()))?;
        writeln!(out, "    kind \"{}\"", node.kind())?;
        if let Some(signature) = node.signature() {
            writeln!(out, "    signature \"{}\"", gml_escape(signature))?;
        }
        writeln!(out, "  ]")?;
    }
    for edge in graph.edges() {
        let (Some(source), Some(target)) = (index.get(edge.from.as_str()), index.get(edge.to.as_str()))
        else {
            continue;
        };
        writeln!(out, "  edge [")?;
        writeln!(out, "    source {}", source)?;
        writeln!(out, "    target {}", target)?;
        writeln!(out, "    relationship \"{}\"", edge.relationship)?;
        writeln!(out, "  ]")?;
    }
    writeln!(out, "]")
}

fn gml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('\n', " ")
}
