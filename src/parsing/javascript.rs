//! JavaScript parser adapter.
//!
//! Extracts functions (declarations and arrow functions bound to a name),
//! classes, methods, variables, ES module imports, and call sites.

use super::{Language, LanguageParser, ParseRecord, node_text, signature_line};
use crate::types::{Call, Import, ImportLink, MethodCall, Symbol, SymbolKind, TypeInfo};
use tree_sitter::{Node, Parser};

pub struct JavaScriptParser {
    parser: Parser,
}

impl JavaScriptParser {
    pub fn new() -> Result<Self, String> {
        let mut parser = Parser::new();
        parser
            .set_language(&Language::JavaScript.grammar())
            .map_err(|e| format!("failed to load javascript grammar: {e}"))?;
        Ok(Self { parser })
    }
}

impl LanguageParser for JavaScriptParser {
    fn parse(&mut self, path: &str, source: &str) -> ParseRecord {
        let mut record = ParseRecord::default();
        let Some(tree) = self.parser.parse(source, None) else {
            tracing::warn!("javascript parse produced no tree for '{path}'");
            return record;
        };
        walk(tree.root_node(), source, path, None, &mut record);
        record
    }

    fn language(&self) -> Language {
        Language::JavaScript
    }
}

pub(crate) fn walk(
    node: Node,
    source: &str,
    path: &str,
    class: Option<&str>,
    out: &mut ParseRecord,
) {
    match node.kind() {
        "function_declaration" | "generator_function_declaration" => {
            extract_function(node, source, path, class, out);
        }
        "class_declaration" => {
            extract_class(node, source, path, out);
            let name = node
                .child_by_field_name("name")
                .map(|n| node_text(n, source).to_string());
            if let Some(body) = node.child_by_field_name("body") {
                walk_children(body, source, path, name.as_deref(), out);
            }
            return;
        }
        "method_definition" => {
            extract_method(node, source, path, class, out);
        }
        "variable_declarator" => {
            extract_declarator(node, source, path, out);
        }
        "import_statement" => {
            extract_import(node, source, path, out);
            return;
        }
        "call_expression" => extract_call(node, source, path, out),
        "new_expression" => extract_new(node, source, path, out),
        _ => {}
    }
    walk_children(node, source, path, class, out);
}

pub(crate) fn walk_children(
    node: Node,
    source: &str,
    path: &str,
    class: Option<&str>,
    out: &mut ParseRecord,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk(child, source, path, class, out);
    }
}

pub(crate) fn extract_function(node: Node, source: &str, path: &str, class: Option<&str>, out: &mut ParseRecord) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    out.symbols.push(Symbol {
        name: node_text(name_node, source).to_string(),
        kind: SymbolKind::Function,
        file_path: path.to_string(),
        start_line: node.start_position().row as u32 + 1,
        end_line: node.end_position().row as u32 + 1,
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
        signature: Some(signature_line(node, source)),
        return_type: return_type_of(node, source),
        parameters: Some(parameter_names(node, source)),
        parent_class: class.map(str::to_string),
    });
}

pub(crate) fn extract_class(node: Node, source: &str, path: &str, out: &mut ParseRecord) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    out.symbols.push(Symbol {
        name: node_text(name_node, source).to_string(),
        kind: SymbolKind::Class,
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

pub(crate) fn extract_method(node: Node, source: &str, path: &str, class: Option<&str>, out: &mut ParseRecord) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    out.symbols.push(Symbol {
        name: node_text(name_node, source).to_string(),
        kind: SymbolKind::Method,
        file_path: path.to_string(),
        start_line: node.start_position().row as u32 + 1,
        end_line: node.end_position().row as u32 + 1,
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
        signature: Some(signature_line(node, source)),
        return_type: return_type_of(node, source),
        parameters: Some(parameter_names(node, source)),
        parent_class: class.map(str::to_string),
    });
}

pub(crate) fn extract_declarator(node: Node, source: &str, path: &str, out: &mut ParseRecord) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    if name_node.kind() != "identifier" {
        return;
    }
    let name = node_text(name_node, source).to_string();
    let line = node.start_position().row as u32 + 1;

    // Type annotations only exist in the TypeScript grammar; the shared
    // walker picks them up when present.
    let annotation = node
        .child_by_field_name("type")
        .map(|n| node_text(n, source).trim_start_matches(':').trim().to_string());

    let value = node.child_by_field_name("value");
    let is_function_value = value
        .map(|v| matches!(v.kind(), "arrow_function" | "function_expression" | "function"))
        .unwrap_or(false);

    // `const f = () => ...` is a named function for indexing purposes.
    if is_function_value {
        let value = value.unwrap();
        // Span the whole declaration statement so edits replace the binding.
        let mut span = node;
        if let Some(declaration) = node.parent().filter(|p| {
            matches!(p.kind(), "lexical_declaration" | "variable_declaration")
        }) {
            span = declaration;
            if let Some(export) = declaration.parent().filter(|p| p.kind() == "export_statement") {
                span = export;
            }
        }
        out.symbols.push(Symbol {
            name,
            kind: SymbolKind::Function,
            file_path: path.to_string(),
            start_line: span.start_position().row as u32 + 1,
            end_line: span.end_position().row as u32 + 1,
            start_byte: span.start_byte(),
            end_byte: span.end_byte(),
            signature: Some(signature_line(node, source)),
            return_type: return_type_of(value, source),
            parameters: Some(parameter_names(value, source)),
            parent_class: None,
        });
        return;
    }

    let inferred = value.and_then(|v| match v.kind() {
        "new_expression" => v
            .child_by_field_name("constructor")
            .map(|c| super::extract_base_type(node_text(c, source))),
        "call_expression" => v
            .child_by_field_name("function")
            .map(|f| super::extract_base_type(node_text(f, source)))
            .filter(|base| base.chars().next().is_some_and(|c| c.is_uppercase())),
        _ => None,
    });

    if annotation.is_some() || inferred.is_some() {
        out.type_infos.push(TypeInfo {
            name: name.clone(),
            type_annotation: annotation,
            inferred_type: inferred,
            file_path: path.to_string(),
            line,
        });
    }

    // Top-level bindings become variable symbols.
    let top_level = node
        .parent()
        .and_then(|declaration| declaration.parent())
        .map(|statement| {
            matches!(statement.kind(), "program" | "export_statement")
        })
        .unwrap_or(false);
    if top_level {
        out.symbols.push(Symbol {
            name,
            kind: SymbolKind::Variable,
            file_path: path.to_string(),
            start_line: line,
            end_line: node.end_position().row as u32 + 1,
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
            signature: Some(signature_line(node, source)),
            return_type: None,
            parameters: None,
            parent_class: None,
        });
    }
}

pub(crate) fn extract_import(node: Node, source: &str, path: &str, out: &mut ParseRecord) {
    let Some(source_node) = node.child_by_field_name("source") else {
        return;
    };
    let module = node_text(source_node, source)
        .trim_matches(|c| c == '"' || c == '\'')
        .to_string();
    let line = node.start_position().row as u32 + 1;

    out.imports.push(Import {
        module: module.clone(),
        file_path: path.to_string(),
        line,
    });

    let mut imported_symbols = Vec::new();
    collect_import_names(node, source, &mut imported_symbols);

    out.import_links.push(ImportLink {
        importer_file: path.to_string(),
        imported_module: module,
        imported_symbols,
        import_line: line,
        definition_file: None,
        definition_symbol: None,
    });
}

fn collect_import_names(node: Node, source: &str, names: &mut Vec<String>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "import_specifier" => {
                if let Some(name) = child.child_by_field_name("name") {
                    names.push(node_text(name, source).to_string());
                }
            }
            "identifier" if node.kind() == "import_clause" => {
                names.push(node_text(child, source).to_string());
            }
            "namespace_import" => {
                if let Some(alias) = first_identifier(child) {
                    names.push(node_text(alias, source).to_string());
                }
            }
            _ => collect_import_names(child, source, names),
        }
    }
}

pub(crate) fn extract_call(node: Node, source: &str, path: &str, out: &mut ParseRecord) {
    let Some(function) = node.child_by_field_name("function") else {
        return;
    };
    let line = node.start_position().row as u32 + 1;
    match function.kind() {
        "identifier" => out.calls.push(Call {
            caller_file: path.to_string(),
            callee: node_text(function, source).to_string(),
            line,
        }),
        "member_expression" => {
            let receiver = function
                .child_by_field_name("object")
                .map(|n| node_text(n, source).to_string());
            let method = function
                .child_by_field_name("property")
                .map(|n| node_text(n, source).to_string());
            if let (Some(receiver), Some(method)) = (receiver, method) {
                out.method_calls.push(MethodCall {
                    caller_file: path.to_string(),
                    line,
                    receiver,
                    method,
                    receiver_type: None,
                });
            }
        }
        _ => {}
    }
}

pub(crate) fn extract_new(node: Node, source: &str, path: &str, out: &mut ParseRecord) {
    if let Some(constructor) = node.child_by_field_name("constructor") {
        out.calls.push(Call {
            caller_file: path.to_string(),
            callee: super::extract_base_type(node_text(constructor, source)),
            line: node.start_position().row as u32 + 1,
        });
    }
}

pub(crate) fn parameter_names(node: Node, source: &str) -> Vec<String> {
    let mut names = Vec::new();
    if let Some(params) = node.child_by_field_name("parameters") {
        let mut cursor = params.walk();
        for param in params.children(&mut cursor) {
            match param.kind() {
                "identifier" => names.push(node_text(param, source).to_string()),
                "required_parameter" | "optional_parameter" => {
                    if let Some(pattern) = param.child_by_field_name("pattern") {
                        names.push(node_text(pattern, source).to_string());
                    }
                }
                "assignment_pattern" => {
                    if let Some(left) = param.child_by_field_name("left") {
                        names.push(node_text(left, source).to_string());
                    }
                }
                "rest_pattern" => names.push(node_text(param, source).to_string()),
                _ => {}
            }
        }
    }
    names
}

pub(crate) fn return_type_of(node: Node, source: &str) -> Option<String> {
    node.child_by_field_name("return_type")
        .map(|n| node_text(n, source).trim_start_matches(':').trim().to_string())
}

fn first_identifier(node: Node) -> Option<Node> {
    let mut cursor = node.walk();
    node.children(&mut cursor).find(|c| c.kind() == "identifier")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> ParseRecord {
        let mut parser = JavaScriptParser::new().unwrap();
        parser.parse("src/app.js", source)
    }

    #[test]
    fn extracts_functions_classes_methods() {
        let record = parse(
            r#"
function build(config) { return config; }

class Server {
  start(port) { return port; }
}
"#,
        );
        let build = record.symbols.iter().find(|s| s.name == "build").unwrap();
        assert_eq!(build.kind, SymbolKind::Function);
        assert_eq!(build.parameters.as_deref().unwrap(), ["config"]);

        let server = record.symbols.iter().find(|s| s.name == "Server").unwrap();
        assert_eq!(server.kind, SymbolKind::Class);

        let start = record.symbols.iter().find(|s| s.name == "start").unwrap();
        assert_eq!(start.kind, SymbolKind::Method);
        assert_eq!(start.parent_class.as_deref(), Some("Server"));
    }

    #[test]
    fn arrow_function_binding_is_a_function() {
        let record = parse("const handler = (req) => req.url;\n");
        let handler = record.symbols.iter().find(|s| s.name == "handler").unwrap();
        assert_eq!(handler.kind, SymbolKind::Function);
        assert_eq!(handler.start_byte, 0);
    }

    #[test]
    fn extracts_es_imports() {
        let record = parse("import { join, resolve } from 'path';\nimport fs from 'fs';\n");
        assert!(record.imports.iter().any(|i| i.module == "path"));
        let link = record
            .import_links
            .iter()
            .find(|l| l.imported_module == "path")
            .unwrap();
        assert_eq!(link.imported_symbols, ["join", "resolve"]);
        let default = record
            .import_links
            .iter()
            .find(|l| l.imported_module == "fs")
            .unwrap();
        assert_eq!(default.imported_symbols, ["fs"]);
    }

    #[test]
    fn new_expression_infers_type() {
        let record = parse("const srv = new Server();\n");
        let info = record.type_infos.iter().find(|t| t.name == "srv").unwrap();
        assert_eq!(info.inferred_type.as_deref(), Some("Server"));
        assert!(record.calls.iter().any(|c| c.callee == "Server"));
    }

    #[test]
    fn member_calls_become_method_calls() {
        let record = parse("db.connect();\napp.router.use(x);\n");
        let connect = record
            .method_calls
            .iter()
            .find(|m| m.method == "connect")
            .unwrap();
        assert_eq!(connect.receiver, "db");
        let use_call = record
            .method_calls
            .iter()
            .find(|m| m.method == "use")
            .unwrap();
        assert_eq!(use_call.receiver, "app.router");
    }
}
