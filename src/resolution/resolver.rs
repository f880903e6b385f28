//! Import resolution.
//!
//! Links `import_links` rows to the file and symbol that define each
//! imported name. Three strategies, tried in order: exact symbol lookup
//! constrained by the module path, module-path-to-file conversion
//! (including relative-import dot handling), and a single-candidate
//! fallback.

use crate::error::Result;
use crate::storage::{SqliteStore, SymbolFilter};
use crate::types::{ImportLink, Symbol};
use std::collections::HashMap;
use std::path::Path;

pub struct ImportResolver<'a> {
    store: &'a SqliteStore,
    symbols_by_name: HashMap<String, Vec<Symbol>>,
}

impl<'a> ImportResolver<'a> {
    pub fn new(store: &'a SqliteStore) -> Result<Self> {
        let mut symbols_by_name: HashMap<String, Vec<Symbol>> = HashMap::new();
        for symbol in store.query_symbols(&SymbolFilter::default())? {
            symbols_by_name
                .entry(symbol.name.clone())
                .or_default()
                .push(symbol);
        }
        Ok(Self {
            store,
            symbols_by_name,
        })
    }

    /// Resolve every unresolved link; returns how many got a definition.
    pub fn resolve_all(&self) -> Result<usize> {
        let mut resolved = 0;
        for (link_id, link) in self.store.query_import_links()? {
            if link.definition_file.is_some() {
                continue;
            }
            for symbol_name in &link.imported_symbols {
                if symbol_name == "*" {
                    continue;
                }
                if let Some((file, symbol)) = self.resolve_one(&link, symbol_name) {
                    self.store.resolve_import_link(link_id, &file, &symbol)?;
                    resolved += 1;
                    break;
                }
            }
        }
        Ok(resolved)
    }

    fn resolve_one(&self, link: &ImportLink, symbol_name: &str) -> Option<(String, String)> {
        let candidates = self.symbols_by_name.get(symbol_name)?;
        if candidates.is_empty() {
            return None;
        }

        let expected = module_to_path(&link.imported_module, &link.importer_file);

        for candidate in candidates {
            if path_matches_module(&candidate.file_path, expected.as_deref()) {
                return Some((candidate.file_path.clone(), candidate.name.clone()));
            }
        }

        // Single candidate anywhere in the project is a safe-enough guess.
        if candidates.len() == 1 {
            return Some((candidates[0].file_path.clone(), candidates[0].name.clone()));
        }

        None
    }
}

/// Convert a module string to the file path it most likely names.
///
/// Handles Python dotted modules (`pkg.util` -> `pkg/util.py`), Python
/// relative imports (`..base` walks up from the importer), and JS/TS
/// relative specifiers (`./shape` -> sibling file, extension open).
pub fn module_to_path(module: &str, importer_file: &str) -> Option<String> {
    if module.is_empty() {
        return None;
    }

    let importer_dir = Path::new(importer_file).parent().unwrap_or(Path::new(""));

    // JS/TS style: './x' or '../x'.
    if module.starts_with("./") || module.starts_with("../") {
        let joined = importer_dir.join(module);
        return Some(normalize(&joined));
    }

    // Python relative: leading dots without slashes.
    if module.starts_with('.') {
        let dots = module.chars().take_while(|c| *c == '.').count();
        let remaining = &module[dots..];
        let mut dir = importer_dir.to_path_buf();
        for _ in 1..dots {
            dir = dir.parent().map(Path::to_path_buf).unwrap_or_default();
        }
        let target = if remaining.is_empty() {
            dir.join("__init__.py")
        } else {
            dir.join(format!("{}.py", remaining.replace('.', "/")))
        };
        return Some(normalize(&target));
    }

    // Absolute dotted module.
    Some(format!("{}.py", module.replace('.', "/")))
}

/// Does a candidate symbol's file plausibly satisfy the expected module
/// path? Exact match, suffix match, or matching stem all count.
pub fn path_matches_module(candidate_path: &str, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return false;
    };
    let candidate = candidate_path.replace('\\', "/");
    let expected = expected.replace('\\', "/");

    if candidate == expected {
        return true;
    }
    if candidate.ends_with(&expected) {
        return true;
    }
    let candidate_stem = Path::new(&candidate).file_stem().and_then(|s| s.to_str());
    let expected_stem = Path::new(&expected).file_stem().and_then(|s| s.to_str());
    match (candidate_stem, expected_stem) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn normalize(path: &Path) -> String {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                parts.pop();
            }
            std::path::Component::CurDir => {}
            std::path::Component::Normal(p) => parts.push(p),
            _ => {}
        }
    }
    parts
        .iter()
        .map(|p| p.to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::IndexStore;
    use crate::types::{FileRecord, SymbolKind};
    use tempfile::TempDir;

    #[test]
    fn module_path_conversion() {
        assert_eq!(
            module_to_path("pkg.util", "main.py").as_deref(),
            Some("pkg/util.py")
        );
        assert_eq!(
            module_to_path(".sibling", "pkg/main.py").as_deref(),
            Some("pkg/sibling.py")
        );
        assert_eq!(
            module_to_path("..base", "pkg/sub/main.py").as_deref(),
            Some("pkg/base.py")
        );
        assert_eq!(
            module_to_path(".", "pkg/main.py").as_deref(),
            Some("pkg/__init__.py")
        );
        assert_eq!(
            module_to_path("./shape", "src/app.ts").as_deref(),
            Some("src/shape")
        );
        assert_eq!(
            module_to_path("../lib/util", "src/app/main.js").as_deref(),
            Some("src/lib/util")
        );
    }

    #[test]
    fn path_matching_tolerates_roots_and_extensions() {
        assert!(path_matches_module("pkg/util.py", Some("pkg/util.py")));
        assert!(path_matches_module("src/pkg/util.py", Some("pkg/util.py")));
        assert!(path_matches_module("src/shape.ts", Some("src/shape")));
        assert!(!path_matches_module("src/other.py", Some("pkg/util.py")));
    }

    #[test]
    fn resolves_direct_import_to_definition() {
        let temp = TempDir::new().unwrap();
        let store = IndexStore::open(temp.path(), 8).unwrap();

        store
            .sqlite
            .transaction(|batch| {
                batch.write_file(&FileRecord {
                    path: "a.py".into(),
                    abs_path: "/r/a.py".into(),
                    size: 10,
                    last_modified: 1.0,
                })?;
                batch.write_symbols_batch(&[crate::types::Symbol {
                    name: "A".into(),
                    kind: SymbolKind::Class,
                    file_path: "a.py".into(),
                    start_line: 1,
                    end_line: 2,
                    start_byte: 0,
                    end_byte: 20,
                    signature: Some("class A:".into()),
                    return_type: None,
                    parameters: None,
                    parent_class: None,
                }])?;
                batch.write_import_links_batch(&[ImportLink {
                    importer_file: "b.py".into(),
                    imported_module: "a".into(),
                    imported_symbols: vec!["A".into()],
                    import_line: 1,
                    definition_file: None,
                    definition_symbol: None,
                }])?;
                Ok(())
            })
            .unwrap();

        let resolver = ImportResolver::new(&store.sqlite).unwrap();
        assert_eq!(resolver.resolve_all().unwrap(), 1);

        let links = store.sqlite.query_import_links().unwrap();
        assert_eq!(links[0].1.definition_file.as_deref(), Some("a.py"));
        assert_eq!(links[0].1.definition_symbol.as_deref(), Some("A"));
    }
}
