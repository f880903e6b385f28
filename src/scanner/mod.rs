//! Streaming repository scanner.
//!
//! Walks a repository root honoring .gitignore plus configured ignore
//! patterns, skips oversized files, and yields one parsed file at a time.
//! Nothing is accumulated; the consumer decides how to batch.

use crate::config::Settings;
use crate::parsing::{self, Language};
use crate::types::FileRecord;
use ignore::WalkBuilder;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// One file's worth of scan output.
#[derive(Debug)]
pub struct ScannedFile {
    pub file: FileRecord,
    pub record: parsing::ParseRecord,
    /// Source text, retained so consumers can build snippets without a
    /// second read.
    pub source: String,
}

/// Scan behavior knobs beyond the static settings.
#[derive(Debug, Default)]
pub struct ScanOptions {
    /// Skip files whose mtime matches the previous scan.
    pub incremental: bool,
    /// `path -> last_modified` from the prior index.
    pub previous_files: HashMap<String, f64>,
    /// Overrides `scanner.max_file_bytes` when set.
    pub max_bytes: Option<u64>,
    /// Restrict the scan to these relative paths (empty = everything).
    pub only_paths: Vec<String>,
}

/// Walks a repository and produces a lazy stream of parse records.
pub struct Scanner {
    settings: Arc<Settings>,
}

impl Scanner {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }

    /// Stream parse records for every indexable file under `root`.
    ///
    /// Files that fail to read or parse are skipped with a diagnostic.
    pub fn scan<'a>(
        &'a self,
        root: &'a Path,
        options: ScanOptions,
    ) -> impl Iterator<Item = ScannedFile> + 'a {
        let max_bytes = options.max_bytes.unwrap_or(self.settings.scanner.max_file_bytes);
        let only: Option<std::collections::HashSet<String>> = if options.only_paths.is_empty() {
            None
        } else {
            Some(options.only_paths.iter().cloned().collect())
        };

        self.walk(root).filter_map(move |path| {
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");

            if let Some(only) = &only {
                if !only.contains(&relative) {
                    return None;
                }
            }

            let metadata = match std::fs::metadata(&path) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!("could not stat '{relative}': {e}");
                    return None;
                }
            };

            if metadata.len() > max_bytes {
                tracing::debug!(
                    "skipping '{relative}' ({} > {max_bytes} bytes)",
                    metadata.len()
                );
                return None;
            }

            let last_modified = mtime_seconds(&metadata);

            if options.incremental {
                if let Some(prev) = options.previous_files.get(&relative) {
                    if (prev - last_modified).abs() < 0.01 {
                        tracing::debug!("skipping unchanged file '{relative}'");
                        return None;
                    }
                }
            }

            let source = match std::fs::read_to_string(&path) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("could not read '{relative}': {e}");
                    return None;
                }
            };

            let record = parsing::parse_source(&path, &source)?;

            let file = FileRecord {
                path: relative,
                abs_path: path
                    .canonicalize()
                    .unwrap_or_else(|_| path.clone())
                    .to_string_lossy()
                    .to_string(),
                size: metadata.len(),
                last_modified,
            };

            // Parsers see the on-disk path; records carry repo-relative paths.
            let mut record = record;
            rewrite_paths(&mut record, &file.path);

            Some(ScannedFile {
                file,
                record,
                source,
            })
        })
    }

    /// Parse a single file into a scan record, applying the same path
    /// normalization as a full scan.
    pub fn scan_file(&self, root: &Path, relative: &str) -> Option<ScannedFile> {
        let path = root.join(relative);
        let metadata = std::fs::metadata(&path).ok()?;
        let source = std::fs::read_to_string(&path).ok()?;
        let mut record = parsing::parse_source(&path, &source)?;
        rewrite_paths(&mut record, relative);
        Some(ScannedFile {
            file: FileRecord {
                path: relative.to_string(),
                abs_path: path
                    .canonicalize()
                    .unwrap_or(path)
                    .to_string_lossy()
                    .to_string(),
                size: metadata.len(),
                last_modified: mtime_seconds(&metadata),
            },
            record,
            source,
        })
    }

    fn walk(&self, root: &Path) -> impl Iterator<Item = PathBuf> + use<> {
        let mut builder = WalkBuilder::new(root);
        builder
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .follow_links(false)
            .require_git(false);

        let mut override_builder = ignore::overrides::OverrideBuilder::new(root);
        for pattern in &self.settings.scanner.ignore_patterns {
            if let Err(e) = override_builder.add(&format!("!{pattern}")) {
                tracing::warn!("invalid ignore pattern '{pattern}': {e}");
            }
        }
        if let Ok(overrides) = override_builder.build() {
            builder.overrides(overrides);
        }

        builder
            .build()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .filter_map(|entry| {
                let path = entry.path();
                Language::from_path(path).map(|_| path.to_path_buf())
            })
    }
}

fn mtime_seconds(metadata: &std::fs::Metadata) -> f64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn rewrite_paths(record: &mut parsing::ParseRecord, relative: &str) {
    for symbol in &mut record.symbols {
        symbol.file_path = relative.to_string();
    }
    for import in &mut record.imports {
        import.file_path = relative.to_string();
    }
    for call in &mut record.calls {
        call.caller_file = relative.to_string();
    }
    for call in &mut record.method_calls {
        call.caller_file = relative.to_string();
    }
    for info in &mut record.type_infos {
        info.file_path = relative.to_string();
    }
    for link in &mut record.import_links {
        link.importer_file = relative.to_string();
    }
}
