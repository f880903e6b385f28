//! Index builder.
//!
//! Drives scanner output into the store in fixed-size transactional
//! batches, optionally embedding snippets along the way, then hands off to
//! the resolution pipeline. Memory stays proportional to one batch.

use crate::config::Settings;
use crate::error::Result;
use crate::incremental;
use crate::resolution;
use crate::scanner::{ScanOptions, ScannedFile, Scanner};
use crate::semantic::{self, EmbeddingEngine};
use crate::storage::IndexStore;
use crate::types::EmbeddingMetadata;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Summary of one build or rebuild.
#[derive(Debug, Default, Clone, Serialize)]
pub struct BuildReport {
    pub files_indexed: usize,
    pub symbols_indexed: usize,
    pub embeddings_written: usize,
    pub scan_duration_secs: f64,
    pub resolution: resolution::ResolutionReport,
}

pub struct IndexBuilder {
    settings: Arc<Settings>,
    store: Arc<IndexStore>,
    embedder: Option<Arc<dyn EmbeddingEngine>>,
}

impl IndexBuilder {
    pub fn new(
        settings: Arc<Settings>,
        store: Arc<IndexStore>,
        embedder: Option<Arc<dyn EmbeddingEngine>>,
    ) -> Self {
        Self {
            settings,
            store,
            embedder,
        }
    }

    /// Build (or incrementally refresh) the index for `root`.
    pub fn build(&self, root: &Path, mut options: ScanOptions) -> Result<BuildReport> {
        let started = Instant::now();

        if options.incremental && options.previous_files.is_empty() {
            options.previous_files = self.store.sqlite.file_mtimes()?;
        }

        let scanner = Scanner::new(self.settings.clone());
        let batch_size = self.settings.scanner.batch_size.max(1);

        let mut report = BuildReport::default();
        let mut pending: Vec<ScannedFile> = Vec::with_capacity(batch_size);

        for scanned in scanner.scan(root, options) {
            pending.push(scanned);
            if pending.len() >= batch_size {
                self.flush_batch(&mut pending, &mut report)?;
            }
        }
        self.flush_batch(&mut pending, &mut report)?;

        report.scan_duration_secs = started.elapsed().as_secs_f64();

        self.store
            .sqlite
            .set_metadata("project_root", &root.to_string_lossy())?;
        self.store.sqlite.set_metadata(
            "scan_duration",
            &format!("{:.3}", report.scan_duration_secs),
        )?;
        if let Some(commit) = incremental::current_commit(root) {
            self.store.sqlite.set_metadata("git_commit", &commit)?;
        }

        self.store.vectors.lock().save()?;

        // Resolution runs over the committed store, never over the stream.
        report.resolution = resolution::run_pipeline(&self.store.sqlite, root)?;

        tracing::info!(
            "index build complete: {} files, {} symbols in {:.2}s",
            report.files_indexed,
            report.symbols_indexed,
            report.scan_duration_secs
        );
        Ok(report)
    }

    /// Write one batch inside a single transaction: files first, then
    /// symbols, then the dependent relations.
    fn flush_batch(&self, pending: &mut Vec<ScannedFile>, report: &mut BuildReport) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }
        let batch_files: Vec<ScannedFile> = std::mem::take(pending);

        // A rescan replaces rows wholesale, so vectors from the previous
        // parse of these files must go too or the two stores diverge.
        for scanned in &batch_files {
            let stale = self
                .store
                .sqlite
                .embedding_ids_for_file(&scanned.file.path)?;
            if !stale.is_empty() {
                let remaining = self.store.vectors.lock().remove_vectors(&stale);
                self.store.sqlite.renumber_embeddings(&remaining)?;
            }
        }

        // Embedding happens outside the transaction (it is pure), vector
        // assignment inside so metadata rows match the ids handed out.
        let mut embedded: Vec<(usize, Vec<String>, Vec<Vec<f32>>)> = Vec::new();
        if let Some(embedder) = &self.embedder {
            let padding = self.settings.embedding.snippet_padding;
            for (file_index, scanned) in batch_files.iter().enumerate() {
                let mut names = Vec::new();
                let mut texts = Vec::new();
                for symbol in &scanned.record.symbols {
                    let snippet = semantic::snippet_from_source(&scanned.source, symbol, padding);
                    names.push(symbol.name.clone());
                    texts.push(semantic::embedding_text(symbol, &snippet));
                }
                if texts.is_empty() {
                    continue;
                }
                let vectors = embedder
                    .embed_batch(&texts)
                    .map_err(|e| crate::error::CerberusError::General(e.to_string()))?;
                embedded.push((file_index, names, vectors));
            }
        }

        let mut vectors_guard = self.store.vectors.lock();
        let model_name = self
            .embedder
            .as_ref()
            .map(|e| e.model_name().to_string())
            .unwrap_or_default();

        self.store.sqlite.transaction(|batch| {
            for (file_index, scanned) in batch_files.iter().enumerate() {
                // Replace-wholesale: a rescan of a file first drops every
                // row associated with it.
                batch.delete_file_rows(&scanned.file.path)?;
                batch.write_file(&scanned.file)?;
                let symbol_ids = batch.write_symbols_batch(&scanned.record.symbols)?;
                batch.write_imports_batch(&scanned.record.imports)?;
                batch.write_calls_batch(&scanned.record.calls)?;
                batch.write_type_infos_batch(&scanned.record.type_infos)?;
                batch.write_import_links_batch(&scanned.record.import_links)?;
                batch.write_method_calls_batch(&scanned.record.method_calls)?;

                report.files_indexed += 1;
                report.symbols_indexed += scanned.record.symbols.len();

                if let Some((_, names, vectors)) = embedded
                    .iter()
                    .find(|(embedded_index, _, _)| *embedded_index == file_index)
                {
                    let vector_ids = vectors_guard.add_vectors_batch(&symbol_ids, vectors)?;
                    let rows: Vec<EmbeddingMetadata> = symbol_ids
                        .iter()
                        .zip(&vector_ids)
                        .zip(names)
                        .map(|((symbol_id, vector_id), name)| EmbeddingMetadata {
                            symbol_id: *symbol_id,
                            vector_store_id: *vector_id,
                            name: name.clone(),
                            file_path: scanned.file.path.clone(),
                            model: model_name.clone(),
                        })
                        .collect();
                    batch.write_embedding_metadata(&rows)?;
                    report.embeddings_written += rows.len();
                }
            }
            Ok(())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::HashEmbeddingEngine;
    use crate::storage::SymbolFilter;
    use std::fs;
    use tempfile::TempDir;

    fn settings_with_batch(batch: usize) -> Arc<Settings> {
        let mut settings = Settings::default();
        settings.scanner.batch_size = batch;
        settings.embedding.dimension = 32;
        Arc::new(settings)
    }

    fn write_fixture(root: &Path) {
        fs::write(
            root.join("a.py"),
            "class A:\n    def foo(self):\n        return 1\n",
        )
        .unwrap();
        fs::write(
            root.join("b.py"),
            "from a import A\n\nclass B(A):\n    pass\n",
        )
        .unwrap();
        fs::write(
            root.join("c.py"),
            "from b import B\n\nx = B()\nx.foo()\n",
        )
        .unwrap();
    }

    #[test]
    fn build_indexes_all_files_and_symbols() {
        let repo = TempDir::new().unwrap();
        let index = TempDir::new().unwrap();
        write_fixture(repo.path());

        let settings = settings_with_batch(2);
        let store = Arc::new(IndexStore::open(index.path(), 32).unwrap());
        let builder = IndexBuilder::new(settings, store.clone(), None);

        let report = builder.build(repo.path(), ScanOptions::default()).unwrap();
        assert_eq!(report.files_indexed, 3);
        assert!(report.symbols_indexed >= 4);

        let stats = store.sqlite.get_stats().unwrap();
        assert_eq!(stats.total_files, 3);

        assert_eq!(
            store
                .sqlite
                .get_metadata("project_root")
                .unwrap()
                .as_deref(),
            Some(repo.path().to_string_lossy().as_ref())
        );
    }

    #[test]
    fn build_with_embeddings_keeps_stores_in_step() {
        let repo = TempDir::new().unwrap();
        let index = TempDir::new().unwrap();
        write_fixture(repo.path());

        let settings = settings_with_batch(100);
        let store = Arc::new(IndexStore::open(index.path(), 32).unwrap());
        let embedder: Arc<dyn EmbeddingEngine> = Arc::new(HashEmbeddingEngine::new(32));
        let builder = IndexBuilder::new(settings, store.clone(), Some(embedder));

        let report = builder.build(repo.path(), ScanOptions::default()).unwrap();
        assert!(report.embeddings_written > 0);
        store.verify_integrity().unwrap();
    }

    #[test]
    fn rebuild_replaces_rows_instead_of_duplicating() {
        let repo = TempDir::new().unwrap();
        let index = TempDir::new().unwrap();
        write_fixture(repo.path());

        let settings = settings_with_batch(100);
        let store = Arc::new(IndexStore::open(index.path(), 32).unwrap());
        let builder = IndexBuilder::new(settings, store.clone(), None);

        builder.build(repo.path(), ScanOptions::default()).unwrap();
        let first = store
            .sqlite
            .query_symbols(&SymbolFilter::default())
            .unwrap()
            .len();

        builder.build(repo.path(), ScanOptions::default()).unwrap();
        let second = store
            .sqlite
            .query_symbols(&SymbolFilter::default())
            .unwrap()
            .len();
        assert_eq!(first, second);
    }

    #[test]
    fn resolution_produces_inheritance_reference() {
        let repo = TempDir::new().unwrap();
        let index = TempDir::new().unwrap();
        write_fixture(repo.path());

        let settings = settings_with_batch(100);
        let store = Arc::new(IndexStore::open(index.path(), 32).unwrap());
        let builder = IndexBuilder::new(settings, store.clone(), None);
        builder.build(repo.path(), ScanOptions::default()).unwrap();

        let references = store
            .sqlite
            .query_symbol_references(Some("A"), None)
            .unwrap();
        assert!(
            references
                .iter()
                .any(|r| r.reference_type == crate::types::ReferenceKind::Inherits
                    && r.source_symbol == "B"
                    && (r.confidence - 1.0).abs() < 0.06)
        );
    }
}
