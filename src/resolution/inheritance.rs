//! Inheritance extraction.
//!
//! Re-parses each file that declares classes and pulls out base-class
//! lists (Python `argument_list`, JS/TS `extends_clause` and
//! `implements_clause`), then resolves every base against the index:
//! same file, import table, same package, or unresolved external.

use crate::error::Result;
use crate::parsing::{Language, node_text};
use crate::storage::{SqliteStore, SymbolFilter};
use crate::types::{ReferenceKind, SymbolKind, SymbolReference, confidence};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tree_sitter::Node;

pub struct InheritanceResolver<'a> {
    store: &'a SqliteStore,
    project_root: PathBuf,
}

struct ClassBases {
    class_name: String,
    file_path: String,
    line: u32,
    bases: Vec<String>,
}

impl<'a> InheritanceResolver<'a> {
    pub fn new(store: &'a SqliteStore, project_root: &Path) -> Self {
        Self {
            store,
            project_root: project_root.to_path_buf(),
        }
    }

    /// Extract and store inherits references for every indexed class.
    /// Returns the number of references written.
    pub fn resolve_all(&self) -> Result<usize> {
        let classes = self.store.query_symbols(&SymbolFilter {
            kind: Some(SymbolKind::Class),
            ..Default::default()
        })?;

        // Group by file so each file is read and parsed once.
        let mut by_file: HashMap<String, Vec<(String, u32)>> = HashMap::new();
        for class in classes {
            by_file
                .entry(class.file_path.clone())
                .or_default()
                .push((class.name, class.start_line));
        }

        let mut relations = Vec::new();
        for (file_path, classes) in by_file {
            relations.extend(self.extract_file(&file_path, &classes));
        }

        let mut references = Vec::new();
        for relation in relations {
            for base in &relation.bases {
                references.push(self.resolve_base(&relation, base)?);
            }
        }

        let count = references.len();
        if count > 0 {
            self.store
                .transaction(|batch| batch.write_symbol_references_batch(&references))?;
        }
        Ok(count)
    }

    fn extract_file(&self, file_path: &str, classes: &[(String, u32)]) -> Vec<ClassBases> {
        let absolute = self.project_root.join(file_path);
        let Some(language) = Language::from_path(&absolute) else {
            return Vec::new();
        };
        let Ok(source) = std::fs::read_to_string(&absolute) else {
            tracing::debug!("inheritance: cannot read '{file_path}'");
            return Vec::new();
        };

        let mut parser = tree_sitter::Parser::new();
        if parser.set_language(&language.grammar()).is_err() {
            return Vec::new();
        }
        let Some(tree) = parser.parse(&source, None) else {
            return Vec::new();
        };

        let mut relations = Vec::new();
        for (class_name, start_line) in classes {
            let Some(node) = find_class_node(tree.root_node(), class_name, &source) else {
                continue;
            };
            let bases = match language {
                Language::Python => python_bases(node, &source),
                Language::JavaScript | Language::TypeScript => js_ts_bases(node, &source),
            };
            if !bases.is_empty() {
                relations.push(ClassBases {
                    class_name: class_name.clone(),
                    file_path: file_path.to_string(),
                    line: *start_line,
                    bases,
                });
            }
        }
        relations
    }

    fn resolve_base(&self, relation: &ClassBases, base: &str) -> Result<SymbolReference> {
        let base_name = crate::parsing::extract_base_type(base);

        // Same file.
        let same_file = self.store.query_symbols(&SymbolFilter {
            name: Some(&base_name),
            file_path: Some(&relation.file_path),
            kind: Some(SymbolKind::Class),
            ..Default::default()
        })?;
        if let Some(target) = same_file.first() {
            return Ok(self.reference(relation, &base_name, Some(target.file_path.clone()), confidence::INHERITS_SAME_FILE));
        }

        // Import table.
        for (_, link) in self.store.query_import_links()? {
            if link.importer_file == relation.file_path
                && link.definition_symbol.as_deref() == Some(base_name.as_str())
            {
                if let Some(definition_file) = link.definition_file {
                    return Ok(self.reference(
                        relation,
                        &base_name,
                        Some(definition_file),
                        confidence::INHERITS_IMPORTED,
                    ));
                }
            }
        }

        // Same package.
        let package_dir = Path::new(&relation.file_path)
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();
        let candidates = self.store.query_symbols(&SymbolFilter {
            name: Some(&base_name),
            kind: Some(SymbolKind::Class),
            ..Default::default()
        })?;
        if let Some(target) = candidates
            .iter()
            .filter(|c| c.file_path.starts_with(&package_dir))
            .min_by(|a, b| a.file_path.cmp(&b.file_path))
        {
            return Ok(self.reference(
                relation,
                &base_name,
                Some(target.file_path.clone()),
                confidence::INHERITS_IMPORTED,
            ));
        }

        // External.
        Ok(self.reference(relation, &base_name, None, confidence::INHERITS_EXTERNAL))
    }

    fn reference(
        &self,
        relation: &ClassBases,
        base_name: &str,
        target_file: Option<String>,
        confidence: f32,
    ) -> SymbolReference {
        SymbolReference {
            source_file: relation.file_path.clone(),
            source_line: relation.line,
            source_symbol: relation.class_name.clone(),
            reference_type: ReferenceKind::Inherits,
            target_file,
            target_symbol: Some(base_name.to_string()),
            target_type: Some("class".into()),
            confidence,
            resolution_method: Some("ast_extraction".into()),
        }
    }
}

/// Find the class declaration node with the given name.
fn find_class_node<'t>(root: Node<'t>, class_name: &str, source: &str) -> Option<Node<'t>> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if matches!(
            node.kind(),
            "class_definition" | "class_declaration" | "abstract_class_declaration"
        ) {
            let name = node
                .child_by_field_name("name")
                .map(|n| node_text(n, source))
                .unwrap_or("");
            if name == class_name {
                return Some(node);
            }
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            stack.push(child);
        }
    }
    None
}

/// Python: `class Foo(Base1, mod.Base2):` bases live in the superclasses
/// argument list.
fn python_bases(class_node: Node, source: &str) -> Vec<String> {
    let mut bases = Vec::new();
    let mut cursor = class_node.walk();
    for child in class_node.children(&mut cursor) {
        if child.kind() == "argument_list" {
            let mut arg_cursor = child.walk();
            for arg in child.children(&mut arg_cursor) {
                if matches!(arg.kind(), "identifier" | "attribute") {
                    bases.push(node_text(arg, source).to_string());
                }
            }
        }
    }
    bases
}

/// JS/TS: `class Foo extends Bar implements Baz`.
fn js_ts_bases(class_node: Node, source: &str) -> Vec<String> {
    let mut bases = Vec::new();
    let mut cursor = class_node.walk();
    for child in class_node.children(&mut cursor) {
        if child.kind() != "class_heritage" {
            continue;
        }
        let mut stack = vec![child];
        while let Some(node) = stack.pop() {
            match node.kind() {
                "extends_clause" | "implements_clause" => {
                    let mut inner = node.walk();
                    for token in node.children(&mut inner) {
                        if matches!(
                            token.kind(),
                            "identifier" | "member_expression" | "type_identifier"
                        ) {
                            bases.push(node_text(token, source).to_string());
                        }
                    }
                }
                // Plain JS puts the extended expression directly under the
                // heritage node.
                "identifier" | "member_expression" if node.parent() == Some(child) => {
                    bases.push(node_text(node, source).to_string());
                }
                _ => {
                    let mut inner = node.walk();
                    for grandchild in node.children(&mut inner) {
                        stack.push(grandchild);
                    }
                }
            }
        }
    }
    bases
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::indexing::IndexBuilder;
    use crate::scanner::ScanOptions;
    use crate::storage::IndexStore;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn build(repo: &Path) -> (TempDir, Arc<IndexStore>) {
        let index = TempDir::new().unwrap();
        let store = Arc::new(IndexStore::open(index.path(), 8).unwrap());
        let builder = IndexBuilder::new(Arc::new(Settings::default()), store.clone(), None);
        builder.build(repo, ScanOptions::default()).unwrap();
        (index, store)
    }

    #[test]
    fn python_same_file_inheritance_scores_full_confidence() {
        let repo = TempDir::new().unwrap();
        fs::write(
            repo.path().join("m.py"),
            "class Base:\n    pass\n\nclass Child(Base):\n    pass\n",
        )
        .unwrap();

        let (_index, store) = build(repo.path());
        let references = store
            .sqlite
            .query_symbol_references(Some("Base"), None)
            .unwrap();
        let inherits: Vec<_> = references
            .iter()
            .filter(|r| r.reference_type == ReferenceKind::Inherits)
            .collect();
        assert_eq!(inherits.len(), 1);
        assert_eq!(inherits[0].source_symbol, "Child");
        assert!((inherits[0].confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn imported_base_scores_ninety_five() {
        let repo = TempDir::new().unwrap();
        fs::write(repo.path().join("a.py"), "class A:\n    pass\n").unwrap();
        fs::write(
            repo.path().join("b.py"),
            "from a import A\n\nclass B(A):\n    pass\n",
        )
        .unwrap();

        let (_index, store) = build(repo.path());
        let references = store
            .sqlite
            .query_symbol_references(Some("A"), None)
            .unwrap();
        let inherits = references
            .iter()
            .find(|r| r.reference_type == ReferenceKind::Inherits)
            .unwrap();
        assert_eq!(inherits.source_symbol, "B");
        assert_eq!(inherits.target_file.as_deref(), Some("a.py"));
        assert!((inherits.confidence - 0.95).abs() < 1e-6);
    }

    #[test]
    fn unresolved_base_is_external_low_confidence() {
        let repo = TempDir::new().unwrap();
        fs::write(
            repo.path().join("m.py"),
            "class Model(torch.nn.Module):\n    pass\n",
        )
        .unwrap();

        let (_index, store) = build(repo.path());
        let references = store
            .sqlite
            .query_symbol_references(Some("Module"), None)
            .unwrap();
        assert_eq!(references.len(), 1);
        assert!(references[0].target_file.is_none());
        assert!((references[0].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn typescript_extends_and_implements() {
        let repo = TempDir::new().unwrap();
        fs::write(
            repo.path().join("shapes.ts"),
            "interface Shape { area(): number; }\nclass Base {}\nclass Circle extends Base implements Shape { area() { return 1; } }\n",
        )
        .unwrap();

        let (_index, store) = build(repo.path());
        let base_refs = store
            .sqlite
            .query_symbol_references(Some("Base"), None)
            .unwrap();
        assert!(base_refs.iter().any(|r| r.source_symbol == "Circle"));
        let shape_refs = store
            .sqlite
            .query_symbol_references(Some("Shape"), None)
            .unwrap();
        assert!(
            shape_refs
                .iter()
                .any(|r| r.reference_type == ReferenceKind::Inherits)
        );
    }
}
