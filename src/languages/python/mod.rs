//! Python language support

use tree_sitter::Node;

use crate::languages::{node_text, CalleeShape, DefinitionKind, LanguageSupport, ModuleReference};

/// Python language support implementation
pub struct PythonLanguage;

impl PythonLanguage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PythonLanguage {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageSupport for PythonLanguage {
    fn language_id(&self) -> &str {
        "python"
    }

    fn file_extensions(&self) -> &[&str] {
        &[".py"]
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_python::LANGUAGE.into()
    }

    fn definition_kind(&self, node: Node) -> Option<DefinitionKind> {
        match node.kind() {
            "class_definition" => Some(DefinitionKind::Class),
            "function_definition" => Some(DefinitionKind::Function),
            _ => None,
        }
    }

    fn signature(&self, node: Node, source: &str) -> String {
        let mut signature = String::new();
        let mut cursor = node.walk();

        for child in node.children(&mut cursor) {
            if child.kind() == "block" {
                break;
            }

            match child.kind() {
                "async" => signature.push_str("async "),
                "def" => signature.push_str("def "),
                ":" => signature.push(':'),
                "->" => signature.push_str(" -> "),
                "identifier" | "parameters" | "type_parameter" => {
                    signature.push_str(&collapse_lines(node_text(child, source)))
                }
                _ => {
                    if !signature.is_empty() && !signature.ends_with(' ') {
                        signature.push(' ');
                    }
                    signature.push_str(&collapse_lines(node_text(child, source)));
                }
            }
        }

        if !signature.ends_with(':') {
            signature.push(':');
        }

        signature.trim().to_string()
    }

    fn parameter_names(&self, node: Node, source: &str) -> Vec<String> {
        let Some(params) = node.child_by_field_name("parameters") else {
            return Vec::new();
        };

        let mut names = Vec::new();
        let mut cursor = params.walk();
        for param in params.named_children(&mut cursor) {
            let ident = match param.kind() {
                "identifier" => Some(param),
                "default_parameter" | "typed_default_parameter" => param
                    .child_by_field_name("name")
                    .filter(|n| n.kind() == "identifier"),
                "typed_parameter" => param.named_child(0).and_then(splat_identifier),
                "list_splat_pattern" | "dictionary_splat_pattern" => splat_identifier(param),
                _ => None,
            };
            if let Some(ident) = ident {
                names.push(node_text(ident, source).to_string());
            }
        }
        names
    }

    fn module_references(&self, node: Node, source: &str) -> Option<Vec<ModuleReference>> {
        let mut cursor = node.walk();
        match node.kind() {
            "import_statement" => {
                let refs = node
                    .children_by_field_name("name", &mut cursor)
                    .map(|name| ModuleReference {
                        dotted: imported_path(name, source),
                        level: 0,
                        names: Vec::new(),
                    })
                    .filter(|r| !r.dotted.is_empty())
                    .collect();
                Some(refs)
            }
            "import_from_statement" => {
                let names: Vec<String> = node
                    .children_by_field_name("name", &mut cursor)
                    .map(|name| imported_path(name, source))
                    .filter(|n| !n.is_empty())
                    .collect();

                let Some(module) = node.child_by_field_name("module_name") else {
                    return Some(Vec::new());
                };

                let reference = if module.kind() == "relative_import" {
                    let mut inner = module.walk();
                    let mut level = 0;
                    let mut dotted = String::new();
                    for part in module.named_children(&mut inner) {
                        match part.kind() {
                            "import_prefix" => {
                                level = node_text(part, source).matches('.').count()
                            }
                            "dotted_name" => dotted = strip_whitespace(node_text(part, source)),
                            _ => {}
                        }
                    }
                    ModuleReference {
                        dotted,
                        level,
                        names,
                    }
                } else {
                    ModuleReference {
                        dotted: strip_whitespace(node_text(module, source)),
                        level: 0,
                        names,
                    }
                };
                Some(vec![reference])
            }
            "future_import_statement" => Some(vec![ModuleReference {
                dotted: "__future__".to_string(),
                level: 0,
                names: Vec::new(),
            }]),
            _ => None,
        }
    }

    fn callee<'tree>(&self, node: Node<'tree>) -> Option<CalleeShape<'tree>> {
        if node.kind() != "call" {
            return None;
        }

        let function = node.child_by_field_name("function")?;
        let shape = match function.kind() {
            "identifier" => CalleeShape::Identifier(function),
            "attribute" => match function.child_by_field_name("attribute") {
                Some(member) => CalleeShape::Member {
                    receiver: function
                        .child_by_field_name("object")
                        .filter(|o| o.kind() == "identifier"),
                    member,
                },
                None => CalleeShape::Other,
            },
            _ => CalleeShape::Other,
        };
        Some(shape)
    }
}

/// Identifier bound by a (possibly splatted) parameter
fn splat_identifier(node: Node) -> Option<Node> {
    match node.kind() {
        "identifier" => Some(node),
        "list_splat_pattern" | "dictionary_splat_pattern" => {
            node.named_child(0).filter(|n| n.kind() == "identifier")
        }
        _ => None,
    }
}

/// Dotted path of an `import` list entry, ignoring any `as` alias
fn imported_path(node: Node, source: &str) -> String {
    let path = if node.kind() == "aliased_import" {
        node.child_by_field_name("name")
    } else {
        Some(node)
    };
    path.map(|p| strip_whitespace(node_text(p, source)))
        .unwrap_or_default()
}

fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

fn collapse_lines(text: &str) -> String {
    if !text.contains('\n') {
        return text.to_string();
    }
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tree_sitter::{Parser, Tree};

    fn parse(source: &str) -> Tree {
        let mut parser = Parser::new();
        parser
            .set_language(&PythonLanguage::new().grammar())
            .unwrap();
        parser.parse(source, None).unwrap()
    }

    fn first_of_kind<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
        if node.kind() == kind {
            return Some(node);
        }
        let mut cursor = node.walk();
        let children: Vec<_> = node.children(&mut cursor).collect();
        children.into_iter().find_map(|c| first_of_kind(c, kind))
    }

    #[test]
    fn test_signature_drops_body() {
        let lang = PythonLanguage::new();
        let source = "def add(a, b: int = 1) -> int:\n    return a + b\n";
        let tree = parse(source);
        let func = first_of_kind(tree.root_node(), "function_definition").unwrap();
        assert_eq!(lang.signature(func, source), "def add(a, b: int = 1) -> int:");
    }

    #[test]
    fn test_async_and_multiline_signature() {
        let lang = PythonLanguage::new();
        let source = "async def fetch(\n    url,\n    retries=3,\n):\n    pass\n";
        let tree = parse(source);
        let func = first_of_kind(tree.root_node(), "function_definition").unwrap();
        let signature = lang.signature(func, source);
        assert!(signature.starts_with("async def fetch("));
        assert!(signature.ends_with("):"));
        assert!(!signature.contains('\n'));
    }

    #[test]
    fn test_parameter_names() {
        let lang = PythonLanguage::new();
        let source = "def f(self, a, b=2, c: int = 3, d: str = 'x', *args, **kwargs):\n    pass\n";
        let tree = parse(source);
        let func = first_of_kind(tree.root_node(), "function_definition").unwrap();
        assert_eq!(
            lang.parameter_names(func, source),
            vec!["self", "a", "b", "c", "d", "args", "kwargs"]
        );
    }

    #[test]
    fn test_import_references() {
        let lang = PythonLanguage::new();
        let source = "import os.path as p, sys\nfrom ..utils.helper import greet, wave as w\nfrom . import sibling\n";
        let tree = parse(source);
        let root = tree.root_node();
        let mut cursor = root.walk();
        let refs: Vec<ModuleReference> = root
            .children(&mut cursor)
            .filter_map(|n| lang.module_references(n, source))
            .flatten()
            .collect();

        assert_eq!(refs.len(), 4);
        assert_eq!(refs[0].dotted, "os.path");
        assert_eq!(refs[1].dotted, "sys");
        assert_eq!(refs[2].dotted, "utils.helper");
        assert_eq!(refs[2].level, 2);
        assert_eq!(refs[2].names, vec!["greet", "wave"]);
        assert_eq!(refs[3].dotted, "");
        assert_eq!(refs[3].level, 1);
        assert_eq!(refs[3].names, vec!["sibling"]);
    }

    #[test]
    fn test_callee_shapes() {
        let lang = PythonLanguage::new();
        let source = "foo()\nobj.run()\nget_obj().run()\nhandlers[0]()\n";
        let tree = parse(source);
        let root = tree.root_node();

        let mut calls = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if node.kind() == "call" {
                calls.push(node);
            }
            let mut cursor = node.walk();
            stack.extend(node.children(&mut cursor));
        }
        calls.sort_by_key(|n| n.start_byte());

        match lang.callee(calls[0]).unwrap() {
            CalleeShape::Identifier(n) => assert_eq!(node_text(n, source), "foo"),
            other => panic!("unexpected {:?}", other),
        }
        match lang.callee(calls[1]).unwrap() {
            CalleeShape::Member { receiver, member } => {
                assert_eq!(node_text(receiver.unwrap(), source), "obj");
                assert_eq!(node_text(member, source), "run");
            }
            other => panic!("unexpected {:?}", other),
        }
        // `get_obj().run()` has a call receiver; the inner call is listed separately
        let chained = calls
            .iter()
            .find(|c| node_text(**c, source) == "get_obj().run()")
            .unwrap();
        match lang.callee(*chained).unwrap() {
            CalleeShape::Member { receiver, member } => {
                assert!(receiver.is_none());
                assert_eq!(node_text(member, source), "run");
            }
            other => panic!("unexpected {:?}", other),
        }
        let subscript = calls
            .iter()
            .find(|c| node_text(**c, source) == "handlers[0]()")
            .unwrap();
        assert!(matches!(lang.callee(*subscript), Some(CalleeShape::Other)));
    }
}
