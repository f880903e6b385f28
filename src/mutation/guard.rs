//! Reference guard.
//!
//! Blocks destructive edits to symbols that are referenced from other
//! files, unless forced. The block message lists the referents so the
//! caller can update them first.

use crate::error::{CerberusError, Result};
use crate::storage::SqliteStore;

/// Referents shown inline in the block message.
const MAX_LISTED: usize = 5;

pub struct SymbolGuard<'a> {
    store: &'a SqliteStore,
}

impl<'a> SymbolGuard<'a> {
    pub fn new(store: &'a SqliteStore) -> Self {
        Self { store }
    }

    /// Return the external reference sites for a symbol (outside its own
    /// file). Empty means the edit is safe.
    pub fn external_references(
        &self,
        symbol_name: &str,
        file_path: &str,
    ) -> Result<Vec<String>> {
        let references = self.store.query_symbol_references(Some(symbol_name), None)?;
        let mut sites: Vec<String> = references
            .into_iter()
            .filter(|r| r.source_file != file_path)
            .map(|r| format!("{}:{}", r.source_file, r.source_line))
            .collect();
        sites.sort();
        sites.dedup();
        Ok(sites)
    }

    /// Check whether a destructive operation may proceed.
    ///
    /// `force` bypasses the guard entirely.
    pub fn check(&self, symbol_name: &str, file_path: &str, force: bool) -> Result<()> {
        if force {
            tracing::info!("reference guard bypassed with --force for '{symbol_name}'");
            return Ok(());
        }

        let referents = self.external_references(symbol_name, file_path)?;
        if referents.is_empty() {
            return Ok(());
        }

        let mut message = format!(
            "[SAFETY BLOCK] Symbol '{symbol_name}' is referenced in {} location(s). \
             Use --force to override.\nReferences:\n",
            referents.len()
        );
        for (index, site) in referents.iter().take(MAX_LISTED).enumerate() {
            message.push_str(&format!("  {}. {site}\n", index + 1));
        }
        if referents.len() > MAX_LISTED {
            message.push_str(&format!(
                "  ... and {} more location(s)\n",
                referents.len() - MAX_LISTED
            ));
        }

        Err(CerberusError::Guard { message, referents })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::IndexStore;
    use crate::types::{ReferenceKind, SymbolReference};
    use tempfile::TempDir;

    fn store_with_reference(source_file: &str, target: &str) -> (TempDir, IndexStore) {
        let temp = TempDir::new().unwrap();
        let store = IndexStore::open(temp.path(), 8).unwrap();
        store
            .sqlite
            .transaction(|batch| {
                batch.write_symbol_references_batch(&[SymbolReference {
                    source_file: source_file.into(),
                    source_line: 3,
                    source_symbol: "B".into(),
                    reference_type: ReferenceKind::Inherits,
                    target_file: Some("a.py".into()),
                    target_symbol: Some(target.into()),
                    target_type: Some("class".into()),
                    confidence: 0.95,
                    resolution_method: None,
                }])
            })
            .unwrap();
        (temp, store)
    }

    #[test]
    fn external_reference_blocks_without_force() {
        let (_temp, store) = store_with_reference("b.py", "A");
        let guard = SymbolGuard::new(&store.sqlite);

        let err = guard.check("A", "a.py", false).unwrap_err();
        match err {
            CerberusError::Guard { message, referents } => {
                assert!(message.contains("SAFETY BLOCK"));
                assert_eq!(referents, ["b.py:3"]);
            }
            other => panic!("expected guard error, got {other:?}"),
        }
    }

    #[test]
    fn force_bypasses_the_guard() {
        let (_temp, store) = store_with_reference("b.py", "A");
        let guard = SymbolGuard::new(&store.sqlite);
        guard.check("A", "a.py", true).unwrap();
    }

    #[test]
    fn self_references_do_not_block() {
        let (_temp, store) = store_with_reference("a.py", "A");
        let guard = SymbolGuard::new(&store.sqlite);
        guard.check("A", "a.py", false).unwrap();
    }

    #[test]
    fn unreferenced_symbol_is_free_to_edit() {
        let (_temp, store) = store_with_reference("b.py", "A");
        let guard = SymbolGuard::new(&store.sqlite);
        guard.check("Unrelated", "a.py", false).unwrap();
    }
}
