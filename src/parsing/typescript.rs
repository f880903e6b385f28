//! TypeScript parser adapter.
//!
//! Shares extraction logic with the JavaScript adapter and adds the nodes
//! the TypeScript grammar introduces: interfaces, enums, abstract classes,
//! and type annotations on bindings.

use super::javascript;
use super::{Language, LanguageParser, ParseRecord, node_text, signature_line};
use crate::types::{Symbol, SymbolKind};
use tree_sitter::{Node, Parser};

pub struct TypeScriptParser {
    parser: Parser,
}

impl TypeScriptParser {
    pub fn new() -> Result<Self, String> {
        let mut parser = Parser::new();
        parser
            .set_language(&Language::TypeScript.grammar())
            .map_err(|e| format!("failed to load typescript grammar: {e}"))?;
        Ok(Self { parser })
    }
}

impl LanguageParser for TypeScriptParser {
    fn parse(&mut self, path: &str, source: &str) -> ParseRecord {
        let mut record = ParseRecord::default();
        let Some(tree) = self.parser.parse(source, None) else {
            tracing::warn!("typescript parse produced no tree for '{path}'");
            return record;
        };
        walk(tree.root_node(), source, path, None, &mut record);
        record
    }

    fn language(&self) -> Language {
        Language::TypeScript
    }
}

fn walk(node: Node, source: &str, path: &str, class: Option<&str>, out: &mut ParseRecord) {
    match node.kind() {
        "interface_declaration" => {
            extract_named(node, source, path, SymbolKind::Interface, out);
        }
        "enum_declaration" => {
            extract_named(node, source, path, SymbolKind::Enum, out);
            return;
        }
        "class_declaration" | "abstract_class_declaration" => {
            javascript::extract_class(node, source, path, out);
            let name = node
                .child_by_field_name("name")
                .map(|n| node_text(n, source).to_string());
            if let Some(body) = node.child_by_field_name("body") {
                walk_children(body, source, path, name.as_deref(), out);
            }
            return;
        }
        "function_declaration" | "generator_function_declaration" => {
            javascript::extract_function(node, source, path, class, out);
        }
        "method_definition" => {
            javascript::extract_method(node, source, path, class, out);
        }
        "variable_declarator" => {
            javascript::extract_declarator(node, source, path, out);
        }
        "import_statement" => {
            javascript::extract_import(node, source, path, out);
            return;
        }
        "call_expression" => javascript::extract_call(node, source, path, out),
        "new_expression" => javascript::extract_new(node, source, path, out),
        _ => {}
    }
    walk_children(node, source, path, class, out);
}

fn walk_children(node: Node, source: &str, path: &str, class: Option<&str>, out: &mut ParseRecord) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk(child, source, path, class, out);
    }
}

fn extract_named(node: Node, source: &str, path: &str, kind: SymbolKind, out: &mut ParseRecord) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    out.symbols.push(Symbol {
        name: node_text(name_node, source).to_string(),
        kind,
        file_path: path.to_string(),
        start_line: node.start_position().row as u32 + 1,
        end_line: node.end_position().row as u32 + 1,
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
        signature: Some(signature_line(node, source)),
        return_type: None,
        parameters: None,
        parent_class: None,
    });
}
