//! Post-edit validation.
//!
//! Syntax is the hard gate: any ERROR or missing node in a fresh parse
//! fails the edit and triggers backup restore. Semantic checks (symbols
//! referenced but unknown to the index) are warning-only.

use crate::parsing::Language;
use crate::storage::{SqliteStore, SymbolFilter};
use std::collections::HashSet;
use tree_sitter::Node;

#[derive(Debug, Default)]
pub struct ValidationOutcome {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationOutcome {
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Parse `source` and report every ERROR or missing node.
pub fn validate_syntax(source: &str, language: Language) -> Vec<String> {
    let mut parser = tree_sitter::Parser::new();
    if parser.set_language(&language.grammar()).is_err() {
        return vec!["parser initialization failed".to_string()];
    }
    let Some(tree) = parser.parse(source, None) else {
        return vec!["parser produced no tree".to_string()];
    };

    let mut errors = Vec::new();
    collect_errors(tree.root_node(), &mut errors);
    errors
}

fn collect_errors(node: Node, errors: &mut Vec<String>) {
    if node.kind() == "ERROR" || node.is_missing() {
        errors.push(format!(
            "syntax error at line {}, column {}",
            node.start_position().row + 1,
            node.start_position().column + 1
        ));
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_errors(child, errors);
    }
}

/// Plain identifiers called in a code block, builtins excluded.
pub fn called_identifiers(code: &str, language: Language) -> Vec<String> {
    let mut parser = tree_sitter::Parser::new();
    if parser.set_language(&language.grammar()).is_err() {
        return Vec::new();
    }
    let Some(tree) = parser.parse(code, None) else {
        return Vec::new();
    };
    let mut called: HashSet<String> = HashSet::new();
    collect_called_identifiers(tree.root_node(), code, &mut called);
    let mut names: Vec<String> = called
        .into_iter()
        .filter(|name| !is_probably_builtin(name))
        .collect();
    names.sort();
    names
}

/// Identifiers called in `new_code` that the index has never seen.
/// Advisory only; dynamic code makes this unreliable as a hard gate.
pub fn undefined_symbol_warnings(
    store: &SqliteStore,
    new_code: &str,
    language: Language,
) -> Vec<String> {
    let called = called_identifiers(new_code, language);

    let mut warnings = Vec::new();
    for name in called {
        if is_probably_builtin(&name) {
            continue;
        }
        let known = store
            .query_symbols(&SymbolFilter {
                name: Some(&name),
                ..Default::default()
            })
            .map(|v| !v.is_empty())
            .unwrap_or(true);
        if !known {
            warnings.push(format!("undefined symbol: {name}"));
        }
    }
    warnings.sort();
    warnings
}

fn collect_called_identifiers(node: Node, source: &str, out: &mut HashSet<String>) {
    if matches!(node.kind(), "call" | "call_expression") {
        if let Some(function) = node.child_by_field_name("function") {
            if function.kind() == "identifier" {
                out.insert(
                    function
                        .utf8_text(source.as_bytes())
                        .unwrap_or("")
                        .to_string(),
                );
            }
        }
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_called_identifiers(child, source, out);
    }
}

fn is_probably_builtin(name: &str) -> bool {
    matches!(
        name,
        "print" | "len" | "str" | "int" | "float" | "bool" | "list" | "dict" | "set" | "tuple"
            | "range" | "open" | "type" | "isinstance" | "super" | "hasattr" | "getattr"
            | "setattr" | "enumerate" | "zip" | "map" | "filter" | "sorted" | "sum" | "min"
            | "max" | "abs" | "repr" | "require" | "parseInt" | "parseFloat" | "String"
            | "Number" | "Boolean" | "Array" | "Object" | "JSON"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::IndexStore;
    use tempfile::TempDir;

    #[test]
    fn valid_python_passes() {
        assert!(validate_syntax("def f():\n    return 1\n", Language::Python).is_empty());
    }

    #[test]
    fn broken_python_reports_location() {
        let errors = validate_syntax("def f(:\n    pass\n", Language::Python);
        assert!(!errors.is_empty());
        assert!(errors[0].contains("line"));
    }

    #[test]
    fn broken_typescript_detected() {
        let errors = validate_syntax("class { nope(", Language::TypeScript);
        assert!(!errors.is_empty());
    }

    #[test]
    fn unknown_call_is_a_warning_not_error() {
        let temp = TempDir::new().unwrap();
        let store = IndexStore::open(temp.path(), 8).unwrap();
        let warnings = undefined_symbol_warnings(
            &store.sqlite,
            "def f():\n    frobnicate()\n",
            Language::Python,
        );
        assert_eq!(warnings, ["undefined symbol: frobnicate"]);
    }

    #[test]
    fn builtins_do_not_warn() {
        let temp = TempDir::new().unwrap();
        let store = IndexStore::open(temp.path(), 8).unwrap();
        let warnings = undefined_symbol_warnings(
            &store.sqlite,
            "def f(x):\n    print(len(x))\n",
            Language::Python,
        );
        assert!(warnings.is_empty());
    }
}
