//! Git-diff-driven incremental updates.
//!
//! Detects what changed since the commit recorded in the index, maps
//! changed line ranges onto affected symbols, and surgically replaces the
//! rows of exactly the files that moved. The store reflects the change in
//! full once `apply` returns; no half-updated file state is observable.

use crate::config::Settings;
use crate::error::Result;
use crate::resolution;
use crate::scanner::Scanner;
use crate::storage::{IndexStore, SymbolFilter};
use crate::types::{ChangeType, FileChange, LineRange, ModifiedFile};
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Affected fraction above which a full rebuild is the better deal.
pub const FULL_REBUILD_THRESHOLD: f32 = 0.3;

/// Callers flagged for re-evaluation, at most.
const MAX_AFFECTED_CALLERS: usize = 10;

#[derive(Debug, Default, Clone, Serialize)]
pub struct IncrementalUpdateResult {
    pub updated_symbols: Vec<String>,
    pub removed_files: Vec<String>,
    pub affected_callers: Vec<String>,
    pub files_reparsed: usize,
    pub elapsed_secs: f64,
    pub strategy: String,
    pub full_rebuild_recommended: bool,
}

fn run_git(project: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(project)
        .output()
        .ok()?;
    if !output.status.success() {
        tracing::debug!(
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr).trim()
        );
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).to_string())
}

/// HEAD commit hash, if the project is a git repository.
pub fn current_commit(project: &Path) -> Option<String> {
    run_git(project, &["rev-parse", "HEAD"]).map(|s| s.trim().to_string())
}

pub fn git_root(project: &Path) -> Option<PathBuf> {
    run_git(project, &["rev-parse", "--show-toplevel"]).map(|s| PathBuf::from(s.trim()))
}

/// Unified diff (zero context) between `from_commit` (or HEAD) and the
/// working tree.
pub fn git_diff(project: &Path, from_commit: Option<&str>) -> Option<String> {
    match from_commit {
        Some(commit) => run_git(project, &["diff", commit, "--unified=0"]),
        None => run_git(project, &["diff", "HEAD", "--unified=0"]),
    }
}

/// Files git does not track yet (they count as added).
pub fn untracked_files(project: &Path) -> Vec<String> {
    run_git(project, &["ls-files", "--others", "--exclude-standard"])
        .map(|out| out.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
        .unwrap_or_default()
}

/// Parse unified diff output into added / modified / deleted buckets.
pub fn parse_git_diff(diff_output: &str) -> FileChange {
    let mut change = FileChange {
        timestamp: now_seconds(),
        ..Default::default()
    };

    let header = Regex::new(r"(?m)^a/(.*?) b/(.*)$").unwrap();
    for section in diff_output.split("diff --git ") {
        if section.trim().is_empty() {
            continue;
        }
        let Some(paths) = header.captures(section) else {
            continue;
        };
        let old_path = paths.get(1).unwrap().as_str().to_string();
        let new_path = paths.get(2).unwrap().as_str().to_string();

        if Regex::new(r"(?m)^deleted file mode").unwrap().is_match(section) {
            change.deleted.push(old_path);
            continue;
        }
        if Regex::new(r"(?m)^new file mode").unwrap().is_match(section) {
            change.added.push(new_path);
            continue;
        }

        let changed_lines = parse_line_ranges(section);
        if !changed_lines.is_empty() {
            change.modified.push(ModifiedFile {
                path: new_path,
                changed_lines,
                affected_symbols: Vec::new(),
            });
        }
    }
    change
}

/// Extract changed line ranges from `@@ -a,b +c,d @@` hunk headers.
pub fn parse_line_ranges(diff_section: &str) -> Vec<LineRange> {
    let hunk = Regex::new(r"@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").unwrap();
    let mut ranges = Vec::new();
    for captures in hunk.captures_iter(diff_section) {
        let old_start: u32 = captures[1].parse().unwrap_or(0);
        let old_count: u32 = captures
            .get(2)
            .map(|m| m.as_str().parse().unwrap_or(1))
            .unwrap_or(1);
        let new_start: u32 = captures[3].parse().unwrap_or(0);
        let new_count: u32 = captures
            .get(4)
            .map(|m| m.as_str().parse().unwrap_or(1))
            .unwrap_or(1);

        let range = if old_count == 0 && new_count > 0 {
            LineRange {
                start: new_start,
                end: new_start + new_count - 1,
                change_type: ChangeType::Added,
            }
        } else if old_count > 0 && new_count == 0 {
            LineRange {
                start: old_start,
                end: old_start + old_count - 1,
                change_type: ChangeType::Deleted,
            }
        } else {
            LineRange {
                start: new_start,
                end: new_start + new_count.max(1) - 1,
                change_type: ChangeType::Modified,
            }
        };
        ranges.push(range);
    }
    ranges
}

/// Diff the working tree against the commit the index was built at.
pub fn detect_changes(store: &IndexStore, project: &Path) -> Result<FileChange> {
    let from_commit = store.sqlite.get_metadata("git_commit")?;
    let diff = git_diff(project, from_commit.as_deref()).unwrap_or_default();
    let mut change = parse_git_diff(&diff);

    for untracked in untracked_files(project) {
        if !change.added.contains(&untracked) {
            change.added.push(untracked);
        }
    }
    Ok(change)
}

pub struct IncrementalUpdater {
    settings: Arc<Settings>,
    store: Arc<IndexStore>,
}

impl IncrementalUpdater {
    pub fn new(settings: Arc<Settings>, store: Arc<IndexStore>) -> Self {
        Self { settings, store }
    }

    /// Apply a change set surgically: delete rows for removed files, parse
    /// and insert added files, replace rows for modified files.
    pub fn apply(&self, project: &Path, changes: &FileChange) -> Result<IncrementalUpdateResult> {
        let started = Instant::now();
        let mut result = IncrementalUpdateResult {
            strategy: "surgical".into(),
            ..Default::default()
        };

        if changes.is_empty() {
            result.strategy = "noop".into();
            result.elapsed_secs = started.elapsed().as_secs_f64();
            return Ok(result);
        }

        let total_files = self.store.sqlite.get_stats()?.total_files.max(1);
        let affected_ratio = changes.affected_count() as f32 / total_files as f32;
        if affected_ratio > FULL_REBUILD_THRESHOLD {
            tracing::warn!(
                "{:.0}% of files changed; a full rebuild would be cheaper (proceeding surgically)",
                affected_ratio * 100.0
            );
            result.full_rebuild_recommended = true;
        }

        let scanner = Scanner::new(self.settings.clone());

        for deleted in &changes.deleted {
            self.remove_file(deleted)?;
            result.removed_files.push(deleted.clone());
        }

        for added in &changes.added {
            if let Some(count) = self.replace_file(&scanner, project, added, &mut result)? {
                tracing::debug!("indexed new file '{added}' ({count} symbols)");
            }
        }

        for modified in &changes.modified {
            // Affected set is informational: the whole file is re-parsed
            // either way, since new symbols may exist outside old ranges.
            let affected = self.affected_symbols(modified)?;
            if !affected.is_empty() {
                tracing::debug!(
                    "re-parsing '{}' ({} symbols affected)",
                    modified.path,
                    affected.len()
                );
                let remaining =
                    MAX_AFFECTED_CALLERS.saturating_sub(result.affected_callers.len());
                result
                    .affected_callers
                    .extend(self.callers_of(&affected)?.into_iter().take(remaining));
            }
            self.replace_file(&scanner, project, &modified.path, &mut result)?;
        }

        if let Some(commit) = current_commit(project) {
            self.store.sqlite.set_metadata("git_commit", &commit)?;
        }
        self.store.vectors.lock().save()?;

        // Derived references describe the new rows now.
        resolution::run_pipeline(&self.store.sqlite, project)?;

        result.elapsed_secs = started.elapsed().as_secs_f64();
        tracing::info!(
            "incremental update: {} reparsed, {} removed in {:.2}s",
            result.files_reparsed,
            result.removed_files.len(),
            result.elapsed_secs
        );
        Ok(result)
    }

    /// Symbols in the prior index whose span overlaps a changed range.
    fn affected_symbols(&self, modified: &ModifiedFile) -> Result<Vec<String>> {
        let symbols = self.store.sqlite.query_symbols(&SymbolFilter {
            file_path: Some(&modified.path),
            ..Default::default()
        })?;
        Ok(symbols
            .into_iter()
            .filter(|symbol| {
                modified
                    .changed_lines
                    .iter()
                    .any(|range| range.overlaps(symbol.start_line, symbol.end_line))
            })
            .map(|symbol| symbol.name)
            .collect())
    }

    fn callers_of(&self, symbols: &[String]) -> Result<Vec<String>> {
        let mut callers = Vec::new();
        for symbol in symbols {
            for call in self.store.sqlite.query_calls(None)? {
                if call.callee == *symbol && !callers.contains(&call.caller_file) {
                    callers.push(call.caller_file);
                }
            }
        }
        Ok(callers)
    }

    fn remove_file(&self, path: &str) -> Result<()> {
        let vector_ids = self.store.sqlite.embedding_ids_for_file(path)?;
        self.store
            .sqlite
            .transaction(|batch| batch.delete_file_rows(path))?;
        if !vector_ids.is_empty() {
            let remaining = self.store.vectors.lock().remove_vectors(&vector_ids);
            self.store.sqlite.renumber_embeddings(&remaining)?;
        }
        Ok(())
    }

    /// Delete-then-insert for one file, inside one transaction.
    fn replace_file(
        &self,
        scanner: &Scanner,
        project: &Path,
        relative: &str,
        result: &mut IncrementalUpdateResult,
    ) -> Result<Option<usize>> {
        if !project.join(relative).exists() {
            tracing::warn!("file '{relative}' does not exist, skipping");
            return Ok(None);
        }
        // Stale vectors for this file go away with the rows.
        let vector_ids = self.store.sqlite.embedding_ids_for_file(relative)?;
        if !vector_ids.is_empty() {
            let remaining = self.store.vectors.lock().remove_vectors(&vector_ids);
            self.store.sqlite.renumber_embeddings(&remaining)?;
        }

        let Some(scanned) = scanner.scan_file(project, relative) else {
            // Unparseable file: drop its stale rows and move on.
            self.store
                .sqlite
                .transaction(|batch| batch.delete_file_rows(relative))?;
            return Ok(None);
        };

        let count = scanned.record.symbols.len();
        self.store.sqlite.transaction(|batch| {
            batch.delete_file_rows(relative)?;
            batch.write_file(&scanned.file)?;
            batch.write_symbols_batch(&scanned.record.symbols)?;
            batch.write_imports_batch(&scanned.record.imports)?;
            batch.write_calls_batch(&scanned.record.calls)?;
            batch.write_type_infos_batch(&scanned.record.type_infos)?;
            batch.write_import_links_batch(&scanned.record.import_links)?;
            batch.write_method_calls_batch(&scanned.record.method_calls)?;
            Ok(())
        })?;

        result.files_reparsed += 1;
        result
            .updated_symbols
            .extend(scanned.record.symbols.iter().map(|s| s.name.clone()));
        Ok(Some(count))
    }
}

fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const SAMPLE_DIFF: &str = "\
diff --git a/b.py b/b.py
index 111..222 100644
--- a/b.py
+++ b/b.py
@@ -15,3 +15,5 @@ class B:
-old
+new
+new2
diff --git a/new.py b/new.py
new file mode 100644
--- /dev/null
+++ b/new.py
@@ -0,0 +1,2 @@
+x = 1
+y = 2
diff --git a/gone.py b/gone.py
deleted file mode 100644
--- a/gone.py
+++ /dev/null
@@ -1,3 +0,0 @@
-a
-b
-c
";

    #[test]
    fn parses_added_modified_deleted() {
        let change = parse_git_diff(SAMPLE_DIFF);
        assert_eq!(change.added, ["new.py"]);
        assert_eq!(change.deleted, ["gone.py"]);
        assert_eq!(change.modified.len(), 1);
        assert_eq!(change.modified[0].path, "b.py");
        let range = &change.modified[0].changed_lines[0];
        assert_eq!(range.start, 15);
        assert_eq!(range.end, 19);
        assert_eq!(range.change_type, ChangeType::Modified);
    }

    #[test]
    fn hunk_without_counts_defaults_to_one_line() {
        let ranges = parse_line_ranges("@@ -7 +7 @@\n-x\n+y\n");
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].start, 7);
        assert_eq!(ranges[0].end, 7);
    }

    #[test]
    fn pure_addition_and_deletion_hunks() {
        let ranges = parse_line_ranges("@@ -10,0 +11,3 @@\n@@ -20,2 +21,0 @@\n");
        assert_eq!(ranges[0].change_type, ChangeType::Added);
        assert_eq!(ranges[0].start, 11);
        assert_eq!(ranges[0].end, 13);
        assert_eq!(ranges[1].change_type, ChangeType::Deleted);
        assert_eq!(ranges[1].start, 20);
        assert_eq!(ranges[1].end, 21);
    }

    fn build_index(repo: &Path) -> (TempDir, Arc<IndexStore>, Arc<Settings>) {
        let index = TempDir::new().unwrap();
        let settings = Arc::new(Settings::default());
        let store = Arc::new(IndexStore::open(index.path(), 8).unwrap());
        let builder = crate::indexing::IndexBuilder::new(settings.clone(), store.clone(), None);
        builder
            .build(repo, crate::scanner::ScanOptions::default())
            .unwrap();
        (index, store, settings)
    }

    #[test]
    fn modified_file_is_reparsed_and_replaced() {
        let repo = TempDir::new().unwrap();
        fs::write(repo.path().join("a.py"), "def one():\n    pass\n").unwrap();
        fs::write(repo.path().join("b.py"), "def two():\n    pass\n").unwrap();
        let (_index, store, settings) = build_index(repo.path());

        fs::write(
            repo.path().join("b.py"),
            "def two():\n    pass\n\ndef three():\n    pass\n",
        )
        .unwrap();

        let changes = FileChange {
            modified: vec![ModifiedFile {
                path: "b.py".into(),
                changed_lines: vec![LineRange {
                    start: 3,
                    end: 4,
                    change_type: ChangeType::Added,
                }],
                affected_symbols: Vec::new(),
            }],
            ..Default::default()
        };

        let updater = IncrementalUpdater::new(settings, store.clone());
        let result = updater.apply(repo.path(), &changes).unwrap();

        assert_eq!(result.files_reparsed, 1);
        assert!(result.updated_symbols.contains(&"three".to_string()));

        let symbols = store
            .sqlite
            .query_symbols(&SymbolFilter {
                file_path: Some("b.py"),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(symbols.len(), 2);
    }

    #[test]
    fn deleted_file_rows_are_removed() {
        let repo = TempDir::new().unwrap();
        fs::write(repo.path().join("a.py"), "def one():\n    pass\n").unwrap();
        fs::write(repo.path().join("b.py"), "def two():\n    pass\n").unwrap();
        let (_index, store, settings) = build_index(repo.path());

        fs::remove_file(repo.path().join("b.py")).unwrap();
        let changes = FileChange {
            deleted: vec!["b.py".into()],
            ..Default::default()
        };

        let updater = IncrementalUpdater::new(settings, store.clone());
        let result = updater.apply(repo.path(), &changes).unwrap();
        assert_eq!(result.removed_files, ["b.py"]);

        let symbols = store
            .sqlite
            .query_symbols(&SymbolFilter {
                file_path: Some("b.py"),
                ..Default::default()
            })
            .unwrap();
        assert!(symbols.is_empty());
        assert_eq!(store.sqlite.get_stats().unwrap().total_files, 1);
    }

    #[test]
    fn large_change_sets_recommend_full_rebuild() {
        let repo = TempDir::new().unwrap();
        fs::write(repo.path().join("a.py"), "def one():\n    pass\n").unwrap();
        let (_index, store, settings) = build_index(repo.path());

        let changes = FileChange {
            modified: vec![ModifiedFile {
                path: "a.py".into(),
                changed_lines: vec![LineRange {
                    start: 1,
                    end: 2,
                    change_type: ChangeType::Modified,
                }],
                affected_symbols: Vec::new(),
            }],
            ..Default::default()
        };

        let updater = IncrementalUpdater::new(settings, store);
        let result = updater.apply(repo.path(), &changes).unwrap();
        assert!(result.full_rebuild_recommended);
        assert_eq!(result.strategy, "surgical");
    }

    #[test]
    fn applying_same_changes_twice_is_idempotent() {
        let repo = TempDir::new().unwrap();
        fs::write(repo.path().join("a.py"), "def one():\n    pass\n").unwrap();
        fs::write(repo.path().join("b.py"), "def two():\n    pass\n").unwrap();
        let (_index, store, settings) = build_index(repo.path());

        let changes = FileChange {
            modified: vec![ModifiedFile {
                path: "b.py".into(),
                changed_lines: vec![LineRange {
                    start: 1,
                    end: 1,
                    change_type: ChangeType::Modified,
                }],
                affected_symbols: Vec::new(),
            }],
            ..Default::default()
        };

        let updater = IncrementalUpdater::new(settings, store.clone());
        updater.apply(repo.path(), &changes).unwrap();
        let first = store.sqlite.get_stats().unwrap();
        updater.apply(repo.path(), &changes).unwrap();
        let second = store.sqlite.get_stats().unwrap();

        assert_eq!(first.total_files, second.total_files);
        assert_eq!(first.total_symbols, second.total_symbols);
    }
}
