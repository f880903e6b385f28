//! Method resolution order.
//!
//! Linearizes a class's inheritance chain by depth-first search over the
//! stored `inherits` references, depth-capped and cycle-safe. Computed on
//! demand; never materialized.

use crate::error::Result;
use crate::storage::{SqliteStore, SymbolFilter};
use crate::types::{Symbol, SymbolKind};
use serde::Serialize;
use std::collections::HashSet;

pub const MAX_MRO_DEPTH: usize = 50;

/// One entry in a linearized inheritance chain.
#[derive(Debug, Clone, Serialize)]
pub struct MroNode {
    pub class_name: String,
    pub file_path: Option<String>,
    pub base_classes: Vec<String>,
    pub depth: usize,
    pub confidence: f32,
}

pub struct MroCalculator<'a> {
    store: &'a SqliteStore,
}

impl<'a> MroCalculator<'a> {
    pub fn new(store: &'a SqliteStore) -> Self {
        Self { store }
    }

    /// Linearize `class_name`, self first, bases in declaration order,
    /// each class appearing once.
    pub fn compute_mro(&self, class_name: &str, file_path: Option<&str>) -> Result<Vec<MroNode>> {
        let mut visited = HashSet::new();
        self.build(class_name, file_path, 0, &mut visited)
    }

    fn build(
        &self,
        class_name: &str,
        file_path: Option<&str>,
        depth: usize,
        visited: &mut HashSet<String>,
    ) -> Result<Vec<MroNode>> {
        if depth > MAX_MRO_DEPTH {
            tracing::warn!("max MRO depth reached at {class_name}");
            return Ok(Vec::new());
        }
        let key = match file_path {
            Some(file) => format!("{class_name}:{file}"),
            None => class_name.to_string(),
        };
        if !visited.insert(key) {
            tracing::debug!("inheritance cycle detected at {class_name}");
            return Ok(Vec::new());
        }

        let bases = self.store.base_classes_of(class_name, file_path)?;

        let mut mro = vec![MroNode {
            class_name: class_name.to_string(),
            file_path: file_path.map(str::to_string),
            base_classes: bases.iter().map(|(name, _, _)| name.clone()).collect(),
            depth,
            confidence: 1.0,
        }];

        for (base_name, base_file, base_confidence) in bases {
            let base_mro = self.build(&base_name, base_file.as_deref(), depth + 1, &mut visited.clone())?;
            for mut node in base_mro {
                if !mro.iter().any(|n| n.class_name == node.class_name) {
                    node.confidence = node.confidence.min(base_confidence);
                    mro.push(node);
                }
            }
        }
        Ok(mro)
    }

    /// Locate `method` on the class itself, then along the MRO chain.
    pub fn find_method(
        &self,
        class_name: &str,
        file_path: Option<&str>,
        method: &str,
    ) -> Result<Option<Symbol>> {
        for node in self.compute_mro(class_name, file_path)? {
            let found = self.store.query_symbols(&SymbolFilter {
                name: Some(method),
                kind: Some(SymbolKind::Method),
                parent_class: Some(&node.class_name),
                ..Default::default()
            })?;
            if let Some(symbol) = found.into_iter().min_by(|a, b| a.file_path.cmp(&b.file_path)) {
                return Ok(Some(symbol));
            }
        }
        Ok(None)
    }

    /// All classes inheriting from `class_name`, directly or not.
    pub fn descendants(&self, class_name: &str) -> Result<Vec<String>> {
        let mut found = HashSet::new();
        let mut queue = vec![class_name.to_string()];
        let mut depth = 0;
        while !queue.is_empty() && depth <= MAX_MRO_DEPTH {
            let mut next = Vec::new();
            for class in queue {
                for (child, _file) in self.store.subclasses_of(&class)? {
                    if found.insert(child.clone()) {
                        next.push(child);
                    }
                }
            }
            queue = next;
            depth += 1;
        }
        let mut out: Vec<String> = found.into_iter().collect();
        out.sort();
        Ok(out)
    }

    /// Methods on `class_name` that shadow a method on a base class.
    pub fn overridden_methods(
        &self,
        class_name: &str,
        file_path: Option<&str>,
    ) -> Result<Vec<(String, String)>> {
        let mro = self.compute_mro(class_name, file_path)?;
        if mro.len() <= 1 {
            return Ok(Vec::new());
        }

        let own: HashSet<String> = self
            .store
            .query_symbols(&SymbolFilter {
                kind: Some(SymbolKind::Method),
                parent_class: Some(class_name),
                ..Default::default()
            })?
            .into_iter()
            .map(|s| s.name)
            .collect();

        let mut overrides = Vec::new();
        for node in &mro[1..] {
            for method in self.store.query_symbols(&SymbolFilter {
                kind: Some(SymbolKind::Method),
                parent_class: Some(&node.class_name),
                ..Default::default()
            })? {
                if own.contains(&method.name) {
                    overrides.push((method.name, node.class_name.clone()));
                }
            }
        }
        overrides.sort();
        overrides.dedup();
        Ok(overrides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::IndexStore;
    use crate::types::{ReferenceKind, SymbolReference};
    use tempfile::TempDir;

    fn inherits(child: &str, child_file: &str, base: &str, base_file: Option<&str>) -> SymbolReference {
        SymbolReference {
            source_file: child_file.into(),
            source_line: 1,
            source_symbol: child.into(),
            reference_type: ReferenceKind::Inherits,
            target_file: base_file.map(str::to_string),
            target_symbol: Some(base.into()),
            target_type: Some("class".into()),
            confidence: 0.95,
            resolution_method: Some("ast_extraction".into()),
        }
    }

    fn store_with(references: Vec<SymbolReference>) -> (TempDir, IndexStore) {
        let temp = TempDir::new().unwrap();
        let store = IndexStore::open(temp.path(), 8).unwrap();
        store
            .sqlite
            .transaction(|batch| batch.write_symbol_references_batch(&references))
            .unwrap();
        (temp, store)
    }

    #[test]
    fn linear_chain_linearizes_in_order() {
        let (_temp, store) = store_with(vec![
            inherits("C", "c.py", "B", Some("b.py")),
            inherits("B", "b.py", "A", Some("a.py")),
        ]);
        let mro = MroCalculator::new(&store.sqlite)
            .compute_mro("C", Some("c.py"))
            .unwrap();
        let names: Vec<_> = mro.iter().map(|n| n.class_name.as_str()).collect();
        assert_eq!(names, ["C", "B", "A"]);
        assert_eq!(mro[2].depth, 2);
    }

    #[test]
    fn diamond_inheritance_lists_each_class_once() {
        let (_temp, store) = store_with(vec![
            inherits("D", "d.py", "B", Some("b.py")),
            inherits("D", "d.py", "C", Some("c.py")),
            inherits("B", "b.py", "A", Some("a.py")),
            inherits("C", "c.py", "A", Some("a.py")),
        ]);
        let mro = MroCalculator::new(&store.sqlite)
            .compute_mro("D", Some("d.py"))
            .unwrap();
        let names: Vec<_> = mro.iter().map(|n| n.class_name.as_str()).collect();
        assert_eq!(names.iter().filter(|n| **n == "A").count(), 1);
        assert_eq!(names[0], "D");
    }

    #[test]
    fn cyclic_inheritance_terminates() {
        let (_temp, store) = store_with(vec![
            inherits("A", "a.py", "B", Some("b.py")),
            inherits("B", "b.py", "A", Some("a.py")),
        ]);
        let mro = MroCalculator::new(&store.sqlite)
            .compute_mro("A", Some("a.py"))
            .unwrap();
        // Terminates and keeps each class at most once.
        let names: Vec<_> = mro.iter().map(|n| n.class_name.as_str()).collect();
        assert!(names.len() <= 2);
        assert_eq!(names[0], "A");
    }

    #[test]
    fn descendants_walks_downward() {
        let (_temp, store) = store_with(vec![
            inherits("B", "b.py", "A", Some("a.py")),
            inherits("C", "c.py", "B", Some("b.py")),
        ]);
        let descendants = MroCalculator::new(&store.sqlite).descendants("A").unwrap();
        assert_eq!(descendants, ["B", "C"]);
    }
}
