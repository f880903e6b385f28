//! Symbol location: name to exact byte range.
//!
//! The store supplies the expected line; a fresh tree-sitter parse of the
//! current file supplies the exact bytes. The AST node must carry the
//! right identifier and sit within one line of the stored position, which
//! protects against a stale index.

use crate::error::{CerberusError, Result};
use crate::parsing::{Language, node_text};
use crate::storage::{SqliteStore, SymbolFilter};
use crate::types::SymbolKind;
use serde::Serialize;
use std::path::Path;
use tree_sitter::Node;

/// Precise, AST-verified location of one symbol.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolLocation {
    pub file_path: String,
    pub symbol_name: String,
    pub symbol_kind: SymbolKind,
    pub start_byte: usize,
    pub end_byte: usize,
    pub start_line: u32,
    pub end_line: u32,
    pub indentation_level: usize,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_class: Option<String>,
}

pub struct SymbolLocator<'a> {
    store: &'a SqliteStore,
    project_root: &'a Path,
}

impl<'a> SymbolLocator<'a> {
    pub fn new(store: &'a SqliteStore, project_root: &'a Path) -> Self {
        Self {
            store,
            project_root,
        }
    }

    pub fn locate(
        &self,
        file_path: &str,
        symbol_name: &str,
        symbol_kind: Option<SymbolKind>,
        parent_class: Option<&str>,
    ) -> Result<SymbolLocation> {
        let matches = self.store.query_symbols(&SymbolFilter {
            name: Some(symbol_name),
            file_path: Some(file_path),
            kind: symbol_kind,
            parent_class,
        })?;
        let Some(stored) = matches.first() else {
            return Err(CerberusError::SymbolNotFound {
                name: format!("{symbol_name} in {file_path}"),
            });
        };

        let absolute = self.project_root.join(file_path);
        let source =
            std::fs::read_to_string(&absolute).map_err(|e| CerberusError::FileRead {
                path: absolute.clone(),
                source: e,
            })?;

        let Some(language) = Language::from_path(&absolute) else {
            return Err(CerberusError::Parse {
                path: absolute,
                language: "unknown".into(),
                reason: "unsupported file extension".into(),
            });
        };

        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&language.grammar())
            .map_err(|e| CerberusError::Parse {
                path: absolute.clone(),
                language: language.as_str().into(),
                reason: e.to_string(),
            })?;
        let tree = parser
            .parse(&source, None)
            .ok_or_else(|| CerberusError::Parse {
                path: absolute.clone(),
                language: language.as_str().into(),
                reason: "parser produced no tree".into(),
            })?;

        let node = find_named_node(
            tree.root_node(),
            &source,
            symbol_name,
            stored.kind,
            stored.start_line,
        )
        .ok_or_else(|| CerberusError::SymbolNotFound {
            name: format!(
                "{symbol_name} near line {} of {file_path} (index may be stale)",
                stored.start_line
            ),
        })?;

        // Decorated declarations edit as a unit.
        let span = match node.parent() {
            Some(parent) if parent.kind() == "decorated_definition" => parent,
            _ => node,
        };

        let start_line = span.start_position().row as u32 + 1;
        let indent = source
            .lines()
            .nth(start_line as usize - 1)
            .map(|line| line.len() - line.trim_start().len())
            .unwrap_or(0);
        let indent_unit_width = super::formatter::detect_indent_unit(&source).len().max(1);

        Ok(SymbolLocation {
            file_path: file_path.to_string(),
            symbol_name: symbol_name.to_string(),
            symbol_kind: stored.kind,
            start_byte: span.start_byte(),
            end_byte: span.end_byte(),
            start_line,
            end_line: span.end_position().row as u32 + 1,
            indentation_level: indent / indent_unit_width,
            language: language.as_str().to_string(),
            parent_class: stored.parent_class.clone(),
        })
    }
}

const NODE_KINDS: &[(&str, &[&str])] = &[
    (
        "function",
        &[
            "function_definition",
            "function_declaration",
            "generator_function_declaration",
            "lexical_declaration",
            "variable_declaration",
        ],
    ),
    (
        "class",
        &[
            "class_definition",
            "class_declaration",
            "abstract_class_declaration",
        ],
    ),
    ("method", &["function_definition", "method_definition"]),
    ("variable", &["assignment", "variable_declarator"]),
    ("interface", &["interface_declaration"]),
    ("enum", &["enum_declaration"]),
    ("struct", &["class_declaration"]),
];

/// Find the declaration node whose identifier matches and whose start line
/// is within one of the expected line.
fn find_named_node<'t>(
    root: Node<'t>,
    source: &str,
    name: &str,
    kind: SymbolKind,
    expected_line: u32,
) -> Option<Node<'t>> {
    let target_kinds: &[&str] = NODE_KINDS
        .iter()
        .find(|(k, _)| *k == kind.as_str())
        .map(|(_, kinds)| *kinds)?;

    let mut best: Option<(u32, Node<'t>)> = None;
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if target_kinds.contains(&node.kind()) && node_names(node, source, name) {
            let line = node.start_position().row as u32 + 1;
            let distance = line.abs_diff(expected_line);
            if distance <= 1 && best.as_ref().is_none_or(|(d, _)| distance < *d) {
                best = Some((distance, node));
            }
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            stack.push(child);
        }
    }
    best.map(|(_, node)| node)
}

/// Does this declaration node declare `name`?
fn node_names(node: Node, source: &str, name: &str) -> bool {
    if let Some(name_node) = node.child_by_field_name("name") {
        if node_text(name_node, source) == name {
            return true;
        }
    }
    if let Some(left) = node.child_by_field_name("left") {
        if node_text(left, source) == name {
            return true;
        }
    }
    // Declarations wrapping a declarator (const f = ...).
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "variable_declarator" {
            if let Some(name_node) = child.child_by_field_name("name") {
                if node_text(name_node, source) == name {
                    return true;
                }
            }
        }
    }
    false
}
