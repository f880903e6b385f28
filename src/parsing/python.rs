//! Python parser adapter.
//!
//! Extracts functions, classes, methods, module-level variables, imports,
//! calls (plain and receiver-qualified), and type information from Python
//! source using tree-sitter.

use super::{Language, LanguageParser, ParseRecord, extract_base_type, node_text, signature_line};
use crate::types::{Call, Import, ImportLink, MethodCall, Symbol, SymbolKind, TypeInfo};
use tree_sitter::{Node, Parser};

pub struct PythonParser {
    parser: Parser,
}

impl PythonParser {
    pub fn new() -> Result<Self, String> {
        let mut parser = Parser::new();
        parser
            .set_language(&Language::Python.grammar())
            .map_err(|e| format!("failed to load python grammar: {e}"))?;
        Ok(Self { parser })
    }

    fn walk(&self, node: Node, source: &str, path: &str, class: Option<&str>, out: &mut ParseRecord) {
        match node.kind() {
            "function_definition" => {
                self.extract_function(node, source, path, class, out);
                // Nested definitions inside a function body are walked with
                // the class context cleared.
                if let Some(body) = node.child_by_field_name("body") {
                    self.walk_children(body, source, path, None, out);
                }
                return;
            }
            "class_definition" => {
                self.extract_class(node, source, path, out);
                let name = node
                    .child_by_field_name("name")
                    .map(|n| node_text(n, source).to_string());
                if let Some(body) = node.child_by_field_name("body") {
                    self.walk_children(body, source, path, name.as_deref(), out);
                }
                return;
            }
            "import_statement" => self.extract_import(node, source, path, out),
            "import_from_statement" => self.extract_import_from(node, source, path, out),
            "assignment" => self.extract_assignment(node, source, path, class, out),
            "call" => self.extract_call(node, source, path, out),
            _ => {}
        }
        self.walk_children(node, source, path, class, out);
    }

    fn walk_children(
        &self,
        node: Node,
        source: &str,
        path: &str,
        class: Option<&str>,
        out: &mut ParseRecord,
    ) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.walk(child, source, path, class, out);
        }
    }

    fn extract_function(
        &self,
        node: Node,
        source: &str,
        path: &str,
        class: Option<&str>,
        out: &mut ParseRecord,
    ) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, source).to_string();

        // Decorators belong to the declaration for editing purposes.
        let span_node = match node.parent() {
            Some(parent) if parent.kind() == "decorated_definition" => parent,
            _ => node,
        };

        let mut parameters = Vec::new();
        if let Some(params) = node.child_by_field_name("parameters") {
            let mut cursor = params.walk();
            for param in params.children(&mut cursor) {
                match param.kind() {
                    "identifier" => parameters.push(node_text(param, source).to_string()),
                    "typed_parameter" | "typed_default_parameter" => {
                        let ident = param
                            .child_by_field_name("name")
                            .or_else(|| first_child_of_kind(param, "identifier"));
                        if let Some(ident) = ident {
                            let pname = node_text(ident, source).to_string();
                            if let Some(type_node) = param.child_by_field_name("type") {
                                out.type_infos.push(TypeInfo {
                                    name: pname.clone(),
                                    type_annotation: Some(node_text(type_node, source).to_string()),
                                    inferred_type: None,
                                    file_path: path.to_string(),
                                    line: param.start_position().row as u32 + 1,
                                });
                            }
                            parameters.push(pname);
                        }
                    }
                    "default_parameter" => {
                        if let Some(ident) = param.child_by_field_name("name") {
                            parameters.push(node_text(ident, source).to_string());
                        }
                    }
                    "list_splat_pattern" | "dictionary_splat_pattern" => {
                        parameters.push(node_text(param, source).to_string());
                    }
                    _ => {}
                }
            }
        }

        let return_type = node
            .child_by_field_name("return_type")
            .map(|n| node_text(n, source).to_string());

        let kind = if class.is_some() {
            SymbolKind::Method
        } else {
            SymbolKind::Function
        };

        out.symbols.push(Symbol {
            name,
            kind,
            file_path: path.to_string(),
            start_line: span_node.start_position().row as u32 + 1,
            end_line: span_node.end_position().row as u32 + 1,
            start_byte: span_node.start_byte(),
            end_byte: span_node.end_byte(),
            signature: Some(signature_line(node, source)),
            return_type,
            parameters: Some(parameters),
            parent_class: class.map(str::to_string),
        });
    }

    fn extract_class(&self, node: Node, source: &str, path: &str, out: &mut ParseRecord) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let span_node = match node.parent() {
            Some(parent) if parent.kind() == "decorated_definition" => parent,
            _ => node,
        };
        out.symbols.push(Symbol {
            name: node_text(name_node, source).to_string(),
            kind: SymbolKind::Class,
            file_path: path.to_string(),
            start_line: span_node.start_position().row as u32 + 1,
            end_line: span_node.end_position().row as u32 + 1,
            start_byte: span_node.start_byte(),
            end_byte: span_node.end_byte(),
            signature: Some(signature_line(node, source)),
            return_type: None,
            parameters: None,
            parent_class: None,
        });
    }

    fn extract_import(&self, node: Node, source: &str, path: &str, out: &mut ParseRecord) {
        let line = node.start_position().row as u32 + 1;
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "dotted_name" => out.imports.push(Import {
                    module: node_text(child, source).to_string(),
                    file_path: path.to_string(),
                    line,
                }),
                "aliased_import" => {
                    if let Some(name) = child.child_by_field_name("name") {
                        out.imports.push(Import {
                            module: node_text(name, source).to_string(),
                            file_path: path.to_string(),
                            line,
                        });
                    }
                }
                _ => {}
            }
        }
    }

    fn extract_import_from(&self, node: Node, source: &str, path: &str, out: &mut ParseRecord) {
        let line = node.start_position().row as u32 + 1;
        let Some(module_node) = node.child_by_field_name("module_name") else {
            return;
        };
        let module = node_text(module_node, source).to_string();

        out.imports.push(Import {
            module: module.clone(),
            file_path: path.to_string(),
            line,
        });

        let mut imported_symbols = Vec::new();
        let mut cursor = node.walk();
        let mut past_import_kw = false;
        for child in node.children(&mut cursor) {
            if child.kind() == "import" {
                past_import_kw = true;
                continue;
            }
            if !past_import_kw {
                continue;
            }
            match child.kind() {
                "dotted_name" | "identifier" => {
                    imported_symbols.push(node_text(child, source).to_string());
                }
                "aliased_import" => {
                    if let Some(name) = child.child_by_field_name("name") {
                        imported_symbols.push(node_text(name, source).to_string());
                    }
                }
                "wildcard_import" => imported_symbols.push("*".to_string()),
                _ => {}
            }
        }

        out.import_links.push(ImportLink {
            importer_file: path.to_string(),
            imported_module: module,
            imported_symbols,
            import_line: line,
            definition_file: None,
            definition_symbol: None,
        });
    }

    fn extract_assignment(
        &self,
        node: Node,
        source: &str,
        path: &str,
        class: Option<&str>,
        out: &mut ParseRecord,
    ) {
        let Some(left) = node.child_by_field_name("left") else {
            return;
        };
        if left.kind() != "identifier" {
            return;
        }
        let name = node_text(left, source).to_string();
        let line = node.start_position().row as u32 + 1;

        let annotation = node
            .child_by_field_name("type")
            .map(|n| node_text(n, source).to_string());

        // `x = Foo(...)` records an inferred type when the callee looks like
        // a class constructor.
        let inferred = node
            .child_by_field_name("right")
            .filter(|right| right.kind() == "call")
            .and_then(|call| call.child_by_field_name("function"))
            .and_then(|function| match function.kind() {
                "identifier" | "attribute" => {
                    let base = extract_base_type(node_text(function, source));
                    base.chars()
                        .next()
                        .filter(|c| c.is_uppercase())
                        .map(|_| base)
                }
                _ => None,
            });

        if annotation.is_some() || inferred.is_some() {
            out.type_infos.push(TypeInfo {
                name: name.clone(),
                type_annotation: annotation.clone(),
                inferred_type: inferred,
                file_path: path.to_string(),
                line,
            });
        }

        // Only module-level bindings become variable symbols.
        let module_level = class.is_none()
            && node
                .parent()
                .and_then(|p| p.parent())
                .map(|grandparent| grandparent.kind() == "module")
                .unwrap_or(false);
        if module_level {
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

    fn extract_call(&self, node: Node, source: &str, path: &str, out: &mut ParseRecord) {
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
            "attribute" => {
                let receiver = function
                    .child_by_field_name("object")
                    .map(|n| node_text(n, source).to_string());
                let method = function
                    .child_by_field_name("attribute")
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
}

fn first_child_of_kind<'a>(node: Node<'a>, kind: &str) -> Option<Node<'a>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).find(|c| c.kind() == kind)
}

impl LanguageParser for PythonParser {
    fn parse(&mut self, path: &str, source: &str) -> ParseRecord {
        let mut record = ParseRecord::default();
        let Some(tree) = self.parser.parse(source, None) else {
            tracing::warn!("python parse produced no tree for '{path}'");
            return record;
        };
        self.walk(tree.root_node(), source, path, None, &mut record);
        record
    }

    fn language(&self) -> Language {
        Language::Python
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> ParseRecord {
        let mut parser = PythonParser::new().unwrap();
        parser.parse("pkg/mod.py", source)
    }

    #[test]
    fn extracts_functions_and_classes() {
        let record = parse(
            r#"
def top(a, b=1, *args, **kwargs):
    return a

class Widget:
    def render(self, surface: Canvas) -> str:
        return "ok"
"#,
        );

        let top = record.symbols.iter().find(|s| s.name == "top").unwrap();
        assert_eq!(top.kind, SymbolKind::Function);
        assert_eq!(
            top.parameters.as_deref().unwrap(),
            ["a", "b", "*args", "**kwargs"]
        );
        assert!(top.end_byte > top.start_byte);

        let widget = record.symbols.iter().find(|s| s.name == "Widget").unwrap();
        assert_eq!(widget.kind, SymbolKind::Class);

        let render = record.symbols.iter().find(|s| s.name == "render").unwrap();
        assert_eq!(render.kind, SymbolKind::Method);
        assert_eq!(render.parent_class.as_deref(), Some("Widget"));
        assert_eq!(render.return_type.as_deref(), Some("str"));
    }

    #[test]
    fn typed_parameter_produces_type_info() {
        let record = parse("def f(canvas: Canvas):\n    pass\n");
        let info = record
            .type_infos
            .iter()
            .find(|t| t.name == "canvas")
            .unwrap();
        assert_eq!(info.type_annotation.as_deref(), Some("Canvas"));
    }

    #[test]
    fn decorated_function_spans_decorator() {
        let source = "@cached\ndef slow():\n    pass\n";
        let record = parse(source);
        let slow = record.symbols.iter().find(|s| s.name == "slow").unwrap();
        assert_eq!(slow.start_line, 1);
        assert_eq!(slow.start_byte, 0);
    }

    #[test]
    fn extracts_imports_and_links() {
        let record = parse("import os\nfrom pkg.util import helper, Other as O\n");
        assert!(record.imports.iter().any(|i| i.module == "os"));
        let link = &record.import_links[0];
        assert_eq!(link.imported_module, "pkg.util");
        assert_eq!(link.imported_symbols, ["helper", "Other"]);
        assert_eq!(link.import_line, 2);
        assert!(link.definition_file.is_none());
    }

    #[test]
    fn relative_import_keeps_dots() {
        let record = parse("from . import local\nfrom ..base import Thing\n");
        assert_eq!(record.import_links[0].imported_module, ".");
        assert_eq!(record.import_links[1].imported_module, "..base");
    }

    #[test]
    fn extracts_plain_and_method_calls() {
        let record = parse("x = make()\nx.run(1)\nself.engine.start()\n");
        assert!(record.calls.iter().any(|c| c.callee == "make"));
        let run = record.method_calls.iter().find(|m| m.method == "run").unwrap();
        assert_eq!(run.receiver, "x");
        let start = record
            .method_calls
            .iter()
            .find(|m| m.method == "start")
            .unwrap();
        assert_eq!(start.receiver, "self.engine");
    }

    #[test]
    fn instantiation_sets_inferred_type() {
        let record = parse("worker = Worker()\nn = compute()\n");
        let info = record
            .type_infos
            .iter()
            .find(|t| t.name == "worker")
            .unwrap();
        assert_eq!(info.inferred_type.as_deref(), Some("Worker"));
        // Lowercase callee is a plain call, not a constructor.
        assert!(!record.type_infos.iter().any(|t| t.name == "n"));
    }

    #[test]
    fn module_level_assignment_is_variable_symbol() {
        let record = parse("LIMIT = 10\ndef f():\n    local = 1\n");
        let limit = record.symbols.iter().find(|s| s.name == "LIMIT").unwrap();
        assert_eq!(limit.kind, SymbolKind::Variable);
        assert!(!record.symbols.iter().any(|s| s.name == "local"));
    }

    #[test]
    fn broken_source_is_not_fatal() {
        let record = parse("def broken(:\n");
        // Still returns a record; extraction is best-effort.
        let _ = record.symbols.len();
    }
}
