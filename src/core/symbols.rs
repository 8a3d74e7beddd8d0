//! Symbol table and lexical scope tracking
//!
//! The table is filled during the hierarchical pass through a
//! [`SymbolTableBuilder`] and frozen into a read-only [`SymbolTable`] before
//! any linking pass starts.

use std::collections::HashMap;

/// Mutable symbol registry used while nodes are being created
#[derive(Debug, Default)]
pub struct SymbolTableBuilder {
    entries: HashMap<String, Vec<String>>,
}

impl SymbolTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition under its short name, in discovery order
    pub fn register(&mut self, short_name: &str, qualified_name: &str) {
        let list = self.entries.entry(short_name.to_string()).or_default();
        if !list.iter().any(|q| q == qualified_name) {
            list.push(qualified_name.to_string());
        }
    }

    pub fn freeze(self) -> SymbolTable {
        SymbolTable {
            entries: self.entries,
        }
    }
}

/// Frozen short-name → qualified-names mapping
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    entries: HashMap<String, Vec<String>>,
}

impl SymbolTable {
    /// Qualified names defining `short_name`; empty when unknown
    pub fn lookup(&self, short_name: &str) -> &[String] {
        self.entries
            .get(short_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of distinct short names
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Short names with two or more definitions
    pub fn ambiguous_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries
            .iter()
            .filter(|(_, v)| v.len() > 1)
            .map(|(k, _)| k.as_str())
    }
}

#[derive(Debug, Clone)]
struct Frame {
    qualified_name: String,
    parameters: Vec<String>,
}

/// Enclosing qualified names during a per-file walk (module → class → function)
#[derive(Debug, Clone)]
pub struct ScopeStack {
    frames: Vec<Frame>,
}

impl ScopeStack {
    pub fn new(module_qualified_name: &str) -> Self {
        Self {
            frames: vec![Frame {
                qualified_name: module_qualified_name.to_string(),
                parameters: Vec::new(),
            }],
        }
    }

    /// Enter a nested definition; returns its qualified name
    pub fn push(&mut self, name: &str, parameters: Vec<String>) -> &str {
        let qualified_name = format!("{}.{}", self.current(), name);
        self.frames.push(Frame {
            qualified_name,
            parameters,
        });
        self.current()
    }

    /// Leave the innermost definition. The module frame is never popped.
    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    /// Qualified name of the innermost enclosing scope
    pub fn current(&self) -> &str {
        self.frames
            .last()
            .map(|f| f.qualified_name.as_str())
            .unwrap_or_default()
    }

    pub fn module(&self) -> &str {
        self.frames
            .first()
            .map(|f| f.qualified_name.as_str())
            .unwrap_or_default()
    }

    /// Whether `name` is bound as a parameter by any enclosing function
    pub fn is_parameter(&self, name: &str) -> bool {
        self.frames
            .iter()
            .any(|f| f.parameters.iter().any(|p| p == name))
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}
