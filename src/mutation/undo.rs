//! Persistent undo history.
//!
//! Every successful mutation records a transaction holding the full
//! pre-write contents of each touched file. Applying a transaction's
//! reverse patches restores those bytes exactly. The history directory is
//! append-only.

use crate::error::{CerberusError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReversePatch {
    pub file_path: String,
    pub original_content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoTransaction {
    #[serde(default)]
    pub transaction_id: String,
    pub timestamp: String,
    pub operation_type: String,
    pub files: Vec<String>,
    pub reverse_patches: Vec<ReversePatch>,
}

pub struct UndoStack {
    history_dir: PathBuf,
}

impl UndoStack {
    pub fn new(history_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&history_dir)?;
        Ok(Self { history_dir })
    }

    /// Record a transaction; returns its content-derived id.
    pub fn record(
        &self,
        operation_type: &str,
        reverse_patches: Vec<ReversePatch>,
    ) -> Result<String> {
        let transaction = UndoTransaction {
            transaction_id: String::new(),
            timestamp: chrono::Local::now().to_rfc3339(),
            operation_type: operation_type.to_string(),
            files: reverse_patches.iter().map(|p| p.file_path.clone()).collect(),
            reverse_patches,
        };

        let transaction_id = transaction_id_for(&transaction);
        let path = self.history_dir.join(format!("{transaction_id}.json"));
        let json = serde_json::to_string_pretty(&transaction)?;
        std::fs::write(&path, json).map_err(|e| CerberusError::FileWrite {
            path,
            source: e,
        })?;
        tracing::info!("recorded undo transaction {transaction_id} ({operation_type})");
        Ok(transaction_id)
    }

    /// Most recent transactions first.
    pub fn history(&self, limit: usize) -> Result<Vec<UndoTransaction>> {
        let mut entries: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(&self.history_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                let mtime = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(std::time::UNIX_EPOCH);
                entries.push((mtime, path));
            }
        }
        entries.sort_by(|a, b| b.0.cmp(&a.0));

        let mut transactions = Vec::new();
        for (_, path) in entries.into_iter().take(limit) {
            match self.read_transaction(&path) {
                Ok(transaction) => transactions.push(transaction),
                Err(e) => tracing::warn!("unreadable undo transaction {}: {e}", path.display()),
            }
        }
        Ok(transactions)
    }

    pub fn get(&self, transaction_id: &str) -> Result<Option<UndoTransaction>> {
        let path = self.history_dir.join(format!("{transaction_id}.json"));
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(self.read_transaction(&path)?))
    }

    /// Write each file's recorded original contents back over the current
    /// file. Returns the restored paths.
    pub fn apply_reverse_patches(
        &self,
        transaction_id: &str,
        project_root: &Path,
    ) -> Result<Vec<String>> {
        let Some(transaction) = self.get(transaction_id)? else {
            return Err(CerberusError::General(format!(
                "undo transaction '{transaction_id}' not found"
            )));
        };

        let mut restored = Vec::new();
        for patch in &transaction.reverse_patches {
            let target = project_root.join(&patch.file_path);
            std::fs::write(&target, &patch.original_content).map_err(|e| {
                CerberusError::FileWrite {
                    path: target.clone(),
                    source: e,
                }
            })?;
            restored.push(patch.file_path.clone());
            tracing::info!("reverted {}", patch.file_path);
        }
        Ok(restored)
    }

    /// Delete old transactions, keeping the newest `keep_last`.
    pub fn clear_history(&self, keep_last: usize) -> Result<usize> {
        let history = self.history(usize::MAX)?;
        let mut deleted = 0usize;
        for transaction in history.into_iter().skip(keep_last) {
            let path = self
                .history_dir
                .join(format!("{}.json", transaction.transaction_id));
            if std::fs::remove_file(path).is_ok() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    fn read_transaction(&self, path: &Path) -> Result<UndoTransaction> {
        let raw = std::fs::read_to_string(path)?;
        let mut transaction: UndoTransaction = serde_json::from_str(&raw)?;
        transaction.transaction_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(transaction)
    }
}

/// Content-derived id: sha256 of the sorted-serialized transaction.
fn transaction_id_for(transaction: &UndoTransaction) -> String {
    let canonical = serde_json::to_string(transaction).unwrap_or_default();
    Sha256::digest(canonical.as_bytes())
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect()
}
