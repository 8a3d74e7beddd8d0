//! SQLite database implementation

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::models::{EdgeRecord, NodeRecord, ProjectRecord, ProjectStatus};
use crate::core::export::{DocumentEdge, DocumentNode, GraphDocument};
use crate::core::graph::CodeGraph;
use crate::core::BuildReport;

/// SQLite database wrapper
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {:?}", path))?;

        conn.execute("PRAGMA foreign_keys = ON", [])?;

        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self { conn })
    }

    /// Initialize the database schema
    pub fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                root_path TEXT NOT NULL,
                report TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS nodes (
                project_id INTEGER NOT NULL,
                ordinal INTEGER NOT NULL,
                qualified_name TEXT NOT NULL,
                kind TEXT NOT NULL,
                source_text TEXT,
                signature TEXT,
                PRIMARY KEY (project_id, ordinal),
                UNIQUE (project_id, qualified_name),
                FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS edges (
                project_id INTEGER NOT NULL,
                ordinal INTEGER NOT NULL,
                source TEXT NOT NULL,
                target TEXT NOT NULL,
                relationship TEXT NOT NULL,
                PRIMARY KEY (project_id, ordinal),
                FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_nodes_kind ON nodes(project_id, kind);
            CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(project_id, source);
            CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(project_id, target);
            CREATE INDEX IF NOT EXISTS idx_edges_relationship ON edges(project_id, relationship);
            "#,
        )?;

        Ok(())
    }

    // ==================== Project Operations ====================

    /// Get a project by its repository name
    pub fn get_project_by_name(&self, name: &str) -> Result<Option<ProjectRecord>> {
        self.conn
            .query_row(
                "SELECT id, name, root_path, created_at, updated_at FROM projects WHERE name = ?1",
                params![name],
                project_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// List all projects
    pub fn list_projects(&self) -> Result<Vec<ProjectRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, root_path, created_at, updated_at FROM projects ORDER BY name",
        )?;
        let rows = stmt.query_map([], project_from_row)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Delete a project and its graph
    pub fn delete_project(&self, name: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM projects WHERE name = ?1", params![name])?;
        Ok(deleted > 0)
    }

    /// Get project status with graph statistics
    pub fn get_project_status(&self, name: &str) -> Result<Option<ProjectStatus>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, root_path, updated_at, report FROM projects WHERE name = ?1",
                params![name],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        parse_timestamp(row, 3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((project_id, name, root_path, last_updated, report)) = row else {
            return Ok(None);
        };

        let report: Option<BuildReport> = report
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .context("Corrupt build report")?;

        let nodes_count: u32 = self.conn.query_row(
            "SELECT COUNT(*) FROM nodes WHERE project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )?;
        let edges_count: u32 = self.conn.query_row(
            "SELECT COUNT(*) FROM edges WHERE project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )?;
        let calls_count: u32 = self.conn.query_row(
            "SELECT COUNT(*) FROM edges WHERE project_id = ?1 AND relationship = 'CALLS'",
            params![project_id],
            |row| row.get(0),
        )?;

        let status = match &report {
            _ if nodes_count == 0 => "empty",
            Some(r) if !r.calls.is_complete() => "partial",
            _ => "complete",
        };

        Ok(Some(ProjectStatus {
            project_id,
            name,
            root_path,
            status: status.to_string(),
            nodes_count,
            edges_count,
            calls_count,
            last_updated,
            report,
        }))
    }

    // ==================== Graph Operations ====================

    /// Replace the stored graph of a project in a single transaction
    pub fn save_graph(
        &mut self,
        root_path: &str,
        graph: &CodeGraph,
        report: Option<&BuildReport>,
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let report = report.map(serde_json::to_string).transpose()?;
        let tx = self.conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO projects (name, root_path, report, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT(name) DO UPDATE SET
                root_path = excluded.root_path,
                report = excluded.report,
                updated_at = excluded.updated_at
            "#,
            params![graph.repo_name(), root_path, report, now],
        )?;
        let project_id: i64 = tx.query_row(
            "SELECT id FROM projects WHERE name = ?1",
            params![graph.repo_name()],
            |row| row.get(0),
        )?;

        tx.execute("DELETE FROM edges WHERE project_id = ?1", params![project_id])?;
        tx.execute("DELETE FROM nodes WHERE project_id = ?1", params![project_id])?;

        {
            let mut insert_node = tx.prepare(
                "INSERT INTO nodes (project_id, ordinal, qualified_name, kind, source_text, signature)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (ordinal, node) in graph.nodes().enumerate() {
                insert_node.execute(params![
                    project_id,
                    ordinal as i64,
                    node.qualified_name(),
                    node.kind().as_str(),
                    node.source_text(),
                    node.signature(),
                ])?;
            }

            let mut insert_edge = tx.prepare(
                "INSERT INTO edges (project_id, ordinal, source, target, relationship)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (ordinal, edge) in graph.edges().iter().enumerate() {
                insert_edge.execute(params![
                    project_id,
                    ordinal as i64,
                    edge.from,
                    edge.to,
                    edge.relationship.as_str(),
                ])?;
            }
        }

        tx.commit()?;
        Ok(project_id)
    }

    /// Load a stored graph, re-validating every store invariant
    pub fn load_graph(&self, name: &str) -> Result<Option<CodeGraph>> {
        let Some(project) = self.get_project_by_name(name)? else {
            return Ok(None);
        };

        let nodes = self
            .node_records(project.id)?
            .into_iter()
            .map(|record| -> Result<DocumentNode> {
                Ok(DocumentNode {
                    kind: record.kind.parse().map_err(|e: String| anyhow!(e))?,
                    id: record.qualified_name,
                    source_text: record.source_text,
                    signature: record.signature,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let edges = self
            .edge_records(project.id)?
            .into_iter()
            .map(|record| -> Result<DocumentEdge> {
                Ok(DocumentEdge {
                    relationship: record.relationship.parse().map_err(|e: String| anyhow!(e))?,
                    source: record.source,
                    target: record.target,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let document = GraphDocument {
            repository: project.name,
            nodes,
            edges,
        };
        let graph = document
            .into_graph()
            .with_context(|| format!("Stored graph for {} is inconsistent", name))?;
        Ok(Some(graph))
    }

    fn node_records(&self, project_id: i64) -> Result<Vec<NodeRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT ordinal, qualified_name, kind, source_text, signature
             FROM nodes WHERE project_id = ?1 ORDER BY ordinal",
        )?;
        let rows = stmt.query_map(params![project_id], |row| {
            Ok(NodeRecord {
                ordinal: row.get(0)?,
                qualified_name: row.get(1)?,
                kind: row.get(2)?,
                source_text: row.get(3)?,
                signature: row.get(4)?,
            })
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    fn edge_records(&self, project_id: i64) -> Result<Vec<EdgeRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT ordinal, source, target, relationship
             FROM edges WHERE project_id = ?1 ORDER BY ordinal",
        )?;
        let rows = stmt.query_map(params![project_id], |row| {
            Ok(EdgeRecord {
                ordinal: row.get(0)?,
                source: row.get(1)?,
                target: row.get(2)?,
                relationship: row.get(3)?,
            })
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<ProjectRecord> {
    Ok(ProjectRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        root_path: row.get(2)?,
        created_at: parse_timestamp(row, 3)?,
        updated_at: parse_timestamp(row, 4)?,
    })
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::{GraphEdge, GraphNode, Relationship};

    fn sample(repo: &str) -> CodeGraph {
        let mut graph = CodeGraph::new(repo);
        graph.add_node(GraphNode::directory(repo)).unwrap();
        let module = format!("{}.m", repo);
        graph.add_node(GraphNode::module(module.clone())).unwrap();
        graph.link(GraphEdge::contains(repo, module.clone()));
        for name in ["zeta", "alpha"] {
            let q = format!("{}.{}", module, name);
            graph
                .add_node(GraphNode::function(q.clone(), format!("def {}():\n    pass", name), format!("def {}():", name)))
                .unwrap();
            graph.link(GraphEdge::contains(module.clone(), q));
        }
        graph.add_node(GraphNode::external_module("os")).unwrap();
        graph.link(GraphEdge::imports(module.clone(), "os"));
        graph.link(GraphEdge::calls(format!("{}.zeta", module), format!("{}.alpha", module)));
        graph
    }

    fn database() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.init_schema().unwrap();
        db
    }

    #[test]
    fn test_init_schema_is_idempotent() {
        let db = database();
        db.init_schema().unwrap();
    }

    #[test]
    fn test_save_and_load_graph() {
        let mut db = database();
        let graph = sample("repo");
        let id = db.save_graph("/src/repo", &graph, None).unwrap();
        assert!(id > 0);

        let loaded = db.load_graph("repo").unwrap().unwrap();
        assert_eq!(loaded.nodes().collect::<Vec<_>>(), graph.nodes().collect::<Vec<_>>());
        assert_eq!(loaded.edges(), graph.edges());
        let children: Vec<_> = loaded.children_of("repo.m").iter().map(|n| n.name().to_string()).collect();
        assert_eq!(children, vec!["zeta", "alpha"]);

        assert!(db.load_graph("missing").unwrap().is_none());
    }

    #[test]
    fn test_save_replaces_previous_graph() {
        let mut db = database();
        db.save_graph("/src/repo", &sample("repo"), None).unwrap();

        let mut smaller = CodeGraph::new("repo");
        smaller.add_node(GraphNode::directory("repo")).unwrap();
        db.save_graph("/elsewhere/repo", &smaller, None).unwrap();

        let loaded = db.load_graph("repo").unwrap().unwrap();
        assert_eq!(loaded.node_count(), 1);
        assert_eq!(loaded.edge_count(), 0);

        let projects = db.list_projects().unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].root_path, "/elsewhere/repo");
    }

    #[test]
    fn test_project_status() {
        let mut db = database();
        db.save_graph("/src/a", &sample("a"), None).unwrap();
        db.save_graph("/src/b", &sample("b"), None).unwrap();

        let status = db.get_project_status("a").unwrap().unwrap();
        assert_eq!(status.status, "complete");
        assert_eq!(status.nodes_count, 5);
        assert_eq!(status.edges_count, 5);
        assert_eq!(status.calls_count, 1);
        assert!(status.report.is_none());

        let names: Vec<_> = db.list_projects().unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["a", "b"]);

        assert!(db.delete_project("a").unwrap());
        assert!(db.get_project_status("a").unwrap().is_none());
        assert!(db.get_project_by_name("b").unwrap().is_some());
    }

    #[test]
    fn test_relationship_column_uses_wire_names() {
        let mut db = database();
        db.save_graph("/src/repo", &sample("repo"), None).unwrap();
        let relationships: Vec<String> = db
            .edge_records(1)
            .unwrap()
            .into_iter()
            .map(|e| e.relationship)
            .collect();
        assert!(relationships.contains(&Relationship::Imports.as_str().to_string()));
        assert!(relationships.iter().all(|r| r.chars().all(|c| c.is_ascii_uppercase())));
    }
}
