//! Language support for code parsing
//!
//! This module provides the trait for language support plugins and the
//! implementations for supported languages. The graph walkers in `core`
//! only talk to syntax trees through this trait, so every language shares
//! one containment, import and call-resolution contract.

pub mod python;

use std::path::Path;
use std::sync::Arc;

use tree_sitter::Node;

/// Kind of definition that becomes a graph node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionKind {
    Class,
    Function,
}

/// A module named by an import construct
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleReference {
    /// Dotted module path as written (empty for `from . import x`)
    pub dotted: String,
    /// Number of leading dots of a relative import (0 = absolute)
    pub level: usize,
    /// Names pulled out of the module by a `from ... import` form
    pub names: Vec<String>,
}

/// Shape of the callee expression of a call
#[derive(Debug, Clone, Copy)]
pub enum CalleeShape<'tree> {
    /// `foo(...)`
    Identifier(Node<'tree>),
    /// `obj.method(...)`; `receiver` is set only when the object is a plain identifier
    Member {
        receiver: Option<Node<'tree>>,
        member: Node<'tree>,
    },
    /// Subscripts, calls of calls, lambdas and the like
    Other,
}

/// Trait for language support plugins
pub trait LanguageSupport: Send + Sync {
    /// Get the language identifier (e.g., "python")
    fn language_id(&self) -> &str;

    /// Get supported file extensions (e.g., [".py"])
    fn file_extensions(&self) -> &[&str];

    /// Get the tree-sitter grammar
    fn grammar(&self) -> tree_sitter::Language;

    /// Classify a node as a class or function definition
    fn definition_kind(&self, node: Node) -> Option<DefinitionKind>;

    /// Name token of a definition node
    fn definition_name<'tree>(&self, node: Node<'tree>) -> Option<Node<'tree>> {
        node.child_by_field_name("name")
    }

    /// Block that runs in the definition's own scope
    fn definition_body<'tree>(&self, node: Node<'tree>) -> Option<Node<'tree>> {
        node.child_by_field_name("body")
    }

    /// Reconstruct a function signature with the body discarded
    fn signature(&self, node: Node, source: &str) -> String;

    /// Names bound by a function's parameter list
    fn parameter_names(&self, node: Node, source: &str) -> Vec<String>;

    /// Module references of an import construct, `None` if `node` is not one
    fn module_references(&self, node: Node, source: &str) -> Option<Vec<ModuleReference>>;

    /// Callee of a call expression, `None` if `node` is not a call
    fn callee<'tree>(&self, node: Node<'tree>) -> Option<CalleeShape<'tree>>;
}

/// Source text covered by a syntax node
pub fn node_text<'s>(node: Node, source: &'s str) -> &'s str {
    source.get(node.byte_range()).unwrap_or_default()
}

/// Registry for managing language support plugins
pub struct LanguageRegistry {
    languages: Vec<Arc<dyn LanguageSupport>>,
}

impl LanguageRegistry {
    /// Create a new registry with default language support
    pub fn new() -> Self {
        let mut registry = Self::empty();

        // Register built-in languages
        registry.register(Arc::new(python::PythonLanguage::new()));

        registry
    }

    /// Create a registry without any languages
    pub fn empty() -> Self {
        Self {
            languages: Vec::new(),
        }
    }

    /// Register a language support plugin
    pub fn register(&mut self, language: Arc<dyn LanguageSupport>) {
        self.languages.push(language);
    }

    /// Get language support by ID
    pub fn get(&self, language_id: &str) -> Option<&Arc<dyn LanguageSupport>> {
        self.languages.iter().find(|l| l.language_id() == language_id)
    }

    /// Get language support by file extension
    pub fn get_by_extension(&self, extension: &str) -> Option<&Arc<dyn LanguageSupport>> {
        let ext = if extension.starts_with('.') {
            extension.to_string()
        } else {
            format!(".{}", extension)
        };

        self.languages
            .iter()
            .find(|l| l.file_extensions().contains(&ext.as_str()))
    }

    /// Get language support for a file path
    pub fn for_path(&self, path: &Path) -> Option<&Arc<dyn LanguageSupport>> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(|ext| self.get_by_extension(ext))
    }

    /// List all supported languages
    pub fn list_languages(&self) -> &[Arc<dyn LanguageSupport>] {
        &self.languages
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_registry() {
        let registry = LanguageRegistry::empty();
        assert!(registry.list_languages().is_empty());
        assert!(registry.get_by_extension("py").is_none());
    }

    #[test]
    fn test_lookup_by_extension_and_path() {
        let registry = LanguageRegistry::new();
        assert_eq!(registry.get_by_extension("py").unwrap().language_id(), "python");
        assert_eq!(registry.get_by_extension(".py").unwrap().language_id(), "python");
        assert!(registry.for_path(Path::new("pkg/mod.py")).is_some());
        assert!(registry.for_path(Path::new("README.md")).is_none());
        assert!(registry.for_path(Path::new("Makefile")).is_none());
    }
}
