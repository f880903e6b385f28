//! SQLite-backed relational store.
//!
//! One database file (`cerberus.db`) holds every relation in the data
//! model plus operational tables (cache, metrics, sessions, logs). Writes
//! are grouped into transactions by the caller through [`SqliteStore::transaction`];
//! a file and its rows are committed together, so readers never observe a
//! file without its symbols.

use crate::error::{CerberusError, Result};
use crate::types::{
    Call, DiffMetric, EmbeddingMetadata, FileRecord, Import, ImportLink, IndexStats, MethodCall,
    Symbol, SymbolKind, SymbolReference, TypeInfo,
};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const DB_FILE: &str = "cerberus.db";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    path TEXT PRIMARY KEY,
    abs_path TEXT NOT NULL,
    size INTEGER NOT NULL,
    last_modified REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS symbols (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    file_path TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    start_byte INTEGER NOT NULL DEFAULT 0,
    end_byte INTEGER NOT NULL DEFAULT 0,
    signature TEXT,
    return_type TEXT,
    parameters TEXT,
    parent_class TEXT
);
CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols(file_path);
CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);

CREATE TABLE IF NOT EXISTS imports (
    id INTEGER PRIMARY KEY,
    module TEXT NOT NULL,
    file_path TEXT NOT NULL,
    line INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_imports_file ON imports(file_path);

CREATE TABLE IF NOT EXISTS calls (
    id INTEGER PRIMARY KEY,
    caller_file TEXT NOT NULL,
    callee TEXT NOT NULL,
    line INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_calls_file ON calls(caller_file);
CREATE INDEX IF NOT EXISTS idx_calls_callee ON calls(callee);

CREATE TABLE IF NOT EXISTS type_infos (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    type_annotation TEXT,
    inferred_type TEXT,
    file_path TEXT NOT NULL,
    line INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_type_infos_file ON type_infos(file_path);

CREATE TABLE IF NOT EXISTS import_links (
    id INTEGER PRIMARY KEY,
    importer_file TEXT NOT NULL,
    imported_module TEXT NOT NULL,
    imported_symbols TEXT NOT NULL,
    import_line INTEGER NOT NULL,
    definition_file TEXT,
    definition_symbol TEXT
);
CREATE INDEX IF NOT EXISTS idx_import_links_importer ON import_links(importer_file);

CREATE TABLE IF NOT EXISTS method_calls (
    id INTEGER PRIMARY KEY,
    caller_file TEXT NOT NULL,
    line INTEGER NOT NULL,
    receiver TEXT NOT NULL,
    method TEXT NOT NULL,
    receiver_type TEXT
);
CREATE INDEX IF NOT EXISTS idx_method_calls_file ON method_calls(caller_file);

CREATE TABLE IF NOT EXISTS symbol_references (
    id INTEGER PRIMARY KEY,
    source_file TEXT NOT NULL,
    source_line INTEGER NOT NULL,
    source_symbol TEXT NOT NULL,
    reference_type TEXT NOT NULL,
    target_file TEXT,
    target_symbol TEXT,
    target_type TEXT,
    confidence REAL NOT NULL,
    resolution_method TEXT
);
CREATE INDEX IF NOT EXISTS idx_refs_source ON symbol_references(source_symbol);
CREATE INDEX IF NOT EXISTS idx_refs_target ON symbol_references(target_symbol);

CREATE TABLE IF NOT EXISTS embeddings_metadata (
    symbol_id INTEGER PRIMARY KEY,
    vector_store_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    file_path TEXT NOT NULL,
    model TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_embeddings_file ON embeddings_metadata(file_path);

CREATE TABLE IF NOT EXISTS blueprint_cache (
    cache_key TEXT PRIMARY KEY,
    blueprint_json TEXT NOT NULL,
    expires_at REAL NOT NULL,
    file_path TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_blueprint_file ON blueprint_cache(file_path);
CREATE INDEX IF NOT EXISTS idx_blueprint_expires ON blueprint_cache(expires_at);

CREATE TABLE IF NOT EXISTS diff_metrics (
    id INTEGER PRIMARY KEY,
    timestamp REAL NOT NULL,
    operation TEXT NOT NULL,
    file_path TEXT NOT NULL,
    lines_changed INTEGER NOT NULL,
    lines_total INTEGER NOT NULL,
    write_efficiency REAL NOT NULL,
    tokens_saved INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_diff_metrics_ts ON diff_metrics(timestamp);

CREATE TABLE IF NOT EXISTS prediction_log (
    id INTEGER PRIMARY KEY,
    timestamp REAL NOT NULL,
    edited_symbol TEXT NOT NULL,
    edited_file TEXT NOT NULL,
    predictions_count INTEGER NOT NULL,
    predicted_symbols TEXT NOT NULL,
    confidence_scores TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS action_log (
    id INTEGER PRIMARY KEY,
    timestamp REAL NOT NULL,
    action_type TEXT NOT NULL,
    target_symbol TEXT,
    target_file TEXT NOT NULL,
    command TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    created_at REAL NOT NULL,
    last_activity REAL NOT NULL,
    query_count INTEGER NOT NULL DEFAULT 0,
    context TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS session_activity (
    id INTEGER PRIMARY KEY,
    session_id TEXT NOT NULL,
    timestamp REAL NOT NULL,
    method TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const FTS_SCHEMA: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS symbols_fts USING fts5(
    name, signature, snippet, file_path UNINDEXED
);
"#;

/// Filter for symbol queries; `None` fields match everything.
#[derive(Debug, Default, Clone)]
pub struct SymbolFilter<'a> {
    pub name: Option<&'a str>,
    pub file_path: Option<&'a str>,
    pub kind: Option<SymbolKind>,
    pub parent_class: Option<&'a str>,
}

/// The relational half of the split store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    fts_enabled: bool,
}

impl SqliteStore {
    /// Open (creating if needed) the store under `index_dir`.
    pub fn open(index_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(index_dir).map_err(|e| CerberusError::Store {
            operation: "create index dir".into(),
            cause: e.to_string(),
        })?;
        let db_path = index_dir.join(DB_FILE);
        let conn = Connection::open(&db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        let fts_enabled = conn.execute_batch(FTS_SCHEMA).is_ok();
        if !fts_enabled {
            tracing::debug!("FTS5 unavailable; snippet search falls back to LIKE");
        }
        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
            fts_enabled,
        })
    }

    /// Open an existing store; errors if the database file is absent.
    pub fn open_existing(index_dir: &Path) -> Result<Self> {
        if !index_dir.join(DB_FILE).exists() {
            return Err(CerberusError::IndexMissing {
                path: index_dir.to_path_buf(),
            });
        }
        Self::open(index_dir)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn fts_enabled(&self) -> bool {
        self.fts_enabled
    }

    /// Run `f` inside a single transaction. Rolls back on error.
    pub fn transaction<T>(&self, f: impl FnOnce(&WriteBatch<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let out = {
            let batch = WriteBatch {
                conn: &tx,
                fts_enabled: self.fts_enabled,
            };
            f(&batch)?
        };
        tx.commit()?;
        Ok(out)
    }

    // --- metadata -----------------------------------------------------

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO metadata(key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    // --- files --------------------------------------------------------

    pub fn query_files(&self) -> Result<Vec<FileRecord>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT path, abs_path, size, last_modified FROM files ORDER BY path")?;
        let rows = stmt.query_map([], |row| {
            Ok(FileRecord {
                path: row.get(0)?,
                abs_path: row.get(1)?,
                size: row.get::<_, i64>(2)? as u64,
                last_modified: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// `path -> last_modified` for incremental scans.
    pub fn file_mtimes(&self) -> Result<HashMap<String, f64>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT path, last_modified FROM files")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<HashMap<_, _>>>()?)
    }

    pub fn get_file(&self, path: &str) -> Result<Option<FileRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT path, abs_path, size, last_modified FROM files WHERE path = ?1",
                params![path],
                |row| {
                    Ok(FileRecord {
                        path: row.get(0)?,
                        abs_path: row.get(1)?,
                        size: row.get::<_, i64>(2)? as u64,
                        last_modified: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    // --- symbols ------------------------------------------------------

    pub fn query_symbols(&self, filter: &SymbolFilter<'_>) -> Result<Vec<Symbol>> {
        let conn = self.conn.lock();
        let mut sql = String::from(
            "SELECT name, type, file_path, start_line, end_line, start_byte, end_byte,
                    signature, return_type, parameters, parent_class
             FROM symbols WHERE 1=1",
        );
        let mut args: Vec<String> = Vec::new();
        if let Some(name) = filter.name {
            sql.push_str(" AND name = ?");
            args.push(name.to_string());
        }
        if let Some(file) = filter.file_path {
            sql.push_str(" AND file_path = ?");
            args.push(file.to_string());
        }
        if let Some(kind) = filter.kind {
            sql.push_str(" AND type = ?");
            args.push(kind.as_str().to_string());
        }
        if let Some(parent) = filter.parent_class {
            sql.push_str(" AND parent_class = ?");
            args.push(parent.to_string());
        }
        sql.push_str(" ORDER BY file_path, start_line");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), row_to_symbol)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Stream every symbol without materializing the full set.
    pub fn for_each_symbol(&self, mut f: impl FnMut(i64, Symbol)) -> Result<()> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, type, file_path, start_line, end_line, start_byte, end_byte,
                    signature, return_type, parameters, parent_class
             FROM symbols ORDER BY id",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let symbol = Symbol {
                name: row.get(1)?,
                kind: parse_kind(row.get::<_, String>(2)?)?,
                file_path: row.get(3)?,
                start_line: row.get(4)?,
                end_line: row.get(5)?,
                start_byte: row.get::<_, i64>(6)? as usize,
                end_byte: row.get::<_, i64>(7)? as usize,
                signature: row.get(8)?,
                return_type: row.get(9)?,
                parameters: parse_parameters(row.get::<_, Option<String>>(10)?),
                parent_class: row.get(11)?,
            };
            f(id, symbol);
        }
        Ok(())
    }

    /// Name search: exact, prefix, then substring matches, in that order.
    pub fn search_symbol_names(&self, query: &str, limit: usize) -> Result<Vec<Symbol>> {
        let conn = self.conn.lock();
        let escaped = query.replace('%', "\\%").replace('_', "\\_");
        let mut stmt = conn.prepare(
            "SELECT name, type, file_path, start_line, end_line, start_byte, end_byte,
                    signature, return_type, parameters, parent_class
             FROM symbols
             WHERE name = ?1 OR name LIKE ?2 ESCAPE '\\' OR name LIKE ?3 ESCAPE '\\'
             ORDER BY CASE WHEN name = ?1 THEN 0 WHEN name LIKE ?2 ESCAPE '\\' THEN 1 ELSE 2 END,
                      name, file_path
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![query, format!("{escaped}%"), format!("%{escaped}%"), limit as i64],
            row_to_symbol,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Full-text search over symbol snippets when FTS5 is available.
    pub fn fts_search(&self, query: &str, limit: usize) -> Result<Vec<(Symbol, f64)>> {
        if !self.fts_enabled {
            return Ok(self
                .search_symbol_names(query, limit)?
                .into_iter()
                .map(|s| (s, 0.0))
                .collect());
        }
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT s.name, s.type, s.file_path, s.start_line, s.end_line, s.start_byte,
                    s.end_byte, s.signature, s.return_type, s.parameters, s.parent_class,
                    bm25(symbols_fts) AS rank
             FROM symbols_fts f
             JOIN symbols s ON s.name = f.name AND s.file_path = f.file_path
             WHERE symbols_fts MATCH ?1
             ORDER BY rank
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![query, limit as i64], |row| {
            Ok((row_to_symbol(row)?, row.get::<_, f64>(11)?))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // --- relations ----------------------------------------------------

    pub fn query_imports(&self, file: Option<&str>) -> Result<Vec<Import>> {
        let conn = self.conn.lock();
        let (sql, args) = match file {
            Some(f) => (
                "SELECT module, file_path, line FROM imports WHERE file_path = ?1 ORDER BY line",
                vec![f.to_string()],
            ),
            None => (
                "SELECT module, file_path, line FROM imports ORDER BY file_path, line",
                vec![],
            ),
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
            Ok(Import {
                module: row.get(0)?,
                file_path: row.get(1)?,
                line: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn query_calls(&self, file: Option<&str>) -> Result<Vec<Call>> {
        let conn = self.conn.lock();
        let (sql, args) = match file {
            Some(f) => (
                "SELECT caller_file, callee, line FROM calls WHERE caller_file = ?1 ORDER BY line",
                vec![f.to_string()],
            ),
            None => (
                "SELECT caller_file, callee, line FROM calls ORDER BY caller_file, line",
                vec![],
            ),
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
            Ok(Call {
                caller_file: row.get(0)?,
                callee: row.get(1)?,
                line: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn query_method_calls(&self) -> Result<Vec<MethodCall>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT caller_file, line, receiver, method, receiver_type
             FROM method_calls ORDER BY caller_file, line",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(MethodCall {
                caller_file: row.get(0)?,
                line: row.get(1)?,
                receiver: row.get(2)?,
                method: row.get(3)?,
                receiver_type: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn query_type_infos(&self, file: Option<&str>) -> Result<Vec<TypeInfo>> {
        let conn = self.conn.lock();
        let (sql, args) = match file {
            Some(f) => (
                "SELECT name, type_annotation, inferred_type, file_path, line
                 FROM type_infos WHERE file_path = ?1 ORDER BY line",
                vec![f.to_string()],
            ),
            None => (
                "SELECT name, type_annotation, inferred_type, file_path, line
                 FROM type_infos ORDER BY file_path, line",
                vec![],
            ),
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
            Ok(TypeInfo {
                name: row.get(0)?,
                type_annotation: row.get(1)?,
                inferred_type: row.get(2)?,
                file_path: row.get(3)?,
                line: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn query_import_links(&self) -> Result<Vec<(i64, ImportLink)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, importer_file, imported_module, imported_symbols, import_line,
                    definition_file, definition_symbol
             FROM import_links ORDER BY importer_file, import_line",
        )?;
        let rows = stmt.query_map([], |row| {
            let symbols_json: String = row.get(3)?;
            Ok((
                row.get::<_, i64>(0)?,
                ImportLink {
                    importer_file: row.get(1)?,
                    imported_module: row.get(2)?,
                    imported_symbols: serde_json::from_str(&symbols_json).unwrap_or_default(),
                    import_line: row.get(4)?,
                    definition_file: row.get(5)?,
                    definition_symbol: row.get(6)?,
                },
            ))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn resolve_import_link(
        &self,
        link_id: i64,
        definition_file: &str,
        definition_symbol: &str,
    ) -> Result<()> {
        self.conn.lock().execute(
            "UPDATE import_links SET definition_file = ?1, definition_symbol = ?2 WHERE id = ?3",
            params![definition_file, definition_symbol, link_id],
        )?;
        Ok(())
    }

    pub fn query_symbol_references(
        &self,
        target_symbol: Option<&str>,
        source_file: Option<&str>,
    ) -> Result<Vec<SymbolReference>> {
        let conn = self.conn.lock();
        let mut sql = String::from(
            "SELECT source_file, source_line, source_symbol, reference_type, target_file,
                    target_symbol, target_type, confidence, resolution_method
             FROM symbol_references WHERE 1=1",
        );
        let mut args: Vec<String> = Vec::new();
        if let Some(target) = target_symbol {
            sql.push_str(" AND target_symbol = ?");
            args.push(target.to_string());
        }
        if let Some(source) = source_file {
            sql.push_str(" AND source_file = ?");
            args.push(source.to_string());
        }
        sql.push_str(" ORDER BY source_file, source_line");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), row_to_reference)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Base classes of `class_name`, highest confidence first.
    pub fn base_classes_of(
        &self,
        class_name: &str,
        file_path: Option<&str>,
    ) -> Result<Vec<(String, Option<String>, f32)>> {
        let conn = self.conn.lock();
        let mut sql = String::from(
            "SELECT target_symbol, target_file, confidence FROM symbol_references
             WHERE source_symbol = ? AND reference_type = 'inherits'",
        );
        let mut args: Vec<String> = vec![class_name.to_string()];
        if let Some(file) = file_path {
            sql.push_str(" AND source_file = ?");
            args.push(file.to_string());
        }
        sql.push_str(" ORDER BY confidence DESC");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
            Ok((
                row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                row.get(1)?,
                row.get::<_, f64>(2)? as f32,
            ))
        })?;
        Ok(rows
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .filter(|(name, _, _)| !name.is_empty())
            .collect())
    }

    /// Classes that directly inherit from `class_name`.
    pub fn subclasses_of(&self, class_name: &str) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT source_symbol, source_file FROM symbol_references
             WHERE target_symbol = ?1 AND reference_type = 'inherits'",
        )?;
        let rows = stmt.query_map(params![class_name], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Drop derived references before the resolution pipeline rebuilds them.
    pub fn clear_symbol_references(&self) -> Result<usize> {
        let count = self
            .conn
            .lock()
            .execute("DELETE FROM symbol_references", [])?;
        Ok(count)
    }

    /// Method-call references that only resolved to the class, not the
    /// method; candidates for MRO refinement.
    pub fn heuristic_method_call_refs(&self) -> Result<Vec<(i64, SymbolReference)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, source_file, source_line, source_symbol, reference_type, target_file,
                    target_symbol, target_type, confidence, resolution_method
             FROM symbol_references
             WHERE reference_type = 'method_call' AND resolution_method = 'heuristic'",
        )?;
        let rows = stmt.query_map([], |row| {
            let kind: String = row.get(4)?;
            Ok((
                row.get::<_, i64>(0)?,
                SymbolReference {
                    source_file: row.get(1)?,
                    source_line: row.get(2)?,
                    source_symbol: row.get(3)?,
                    reference_type: crate::types::ReferenceKind::parse(&kind).ok_or_else(|| {
                        rusqlite::Error::FromSqlConversionFailure(
                            4,
                            rusqlite::types::Type::Text,
                            format!("unknown reference type '{kind}'").into(),
                        )
                    })?,
                    target_file: row.get(5)?,
                    target_symbol: row.get(6)?,
                    target_type: row.get(7)?,
                    confidence: row.get::<_, f64>(8)? as f32,
                    resolution_method: row.get(9)?,
                },
            ))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Retarget one reference in place after a better resolution is found.
    pub fn update_reference(
        &self,
        id: i64,
        target_file: &str,
        target_symbol: &str,
        confidence: f32,
        resolution_method: &str,
    ) -> Result<()> {
        self.conn.lock().execute(
            "UPDATE symbol_references
             SET target_file = ?1, target_symbol = ?2, confidence = ?3, resolution_method = ?4
             WHERE id = ?5",
            params![target_file, target_symbol, confidence as f64, resolution_method, id],
        )?;
        Ok(())
    }

    // --- embeddings metadata -----------------------------------------

    pub fn query_embeddings_metadata(&self) -> Result<Vec<EmbeddingMetadata>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT symbol_id, vector_store_id, name, file_path, model
             FROM embeddings_metadata ORDER BY vector_store_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(EmbeddingMetadata {
                symbol_id: row.get(0)?,
                vector_store_id: row.get(1)?,
                name: row.get(2)?,
                file_path: row.get(3)?,
                model: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Vector ids whose symbols live in `file_path`.
    pub fn embedding_ids_for_file(&self, file_path: &str) -> Result<Vec<i64>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT vector_store_id FROM embeddings_metadata WHERE file_path = ?1",
        )?;
        let rows = stmt.query_map(params![file_path], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Replace all embedding-metadata rows with renumbered vector ids after
    /// a vector store rebuild.
    pub fn renumber_embeddings(&self, remaining: &[(i64, i64)]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut keep = tx.prepare(
                "UPDATE embeddings_metadata SET vector_store_id = ?2 WHERE symbol_id = ?1",
            )?;
            for (symbol_id, new_vector_id) in remaining {
                keep.execute(params![symbol_id, new_vector_id])?;
            }
        }
        let keep_ids: Vec<String> = remaining.iter().map(|(s, _)| s.to_string()).collect();
        if keep_ids.is_empty() {
            tx.execute("DELETE FROM embeddings_metadata", [])?;
        } else {
            tx.execute(
                &format!(
                    "DELETE FROM embeddings_metadata WHERE symbol_id NOT IN ({})",
                    keep_ids.join(",")
                ),
                [],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Check split-store agreement: metadata rows must be dense and match
    /// the vector count.
    pub fn verify_embedding_integrity(&self, vector_count: usize) -> Result<()> {
        let metadata = self.query_embeddings_metadata()?;
        if metadata.len() != vector_count {
            return Err(CerberusError::Integrity {
                reason: format!(
                    "embeddings_metadata has {} rows but vector store holds {} vectors",
                    metadata.len(),
                    vector_count
                ),
            });
        }
        for (expected, row) in metadata.iter().enumerate() {
            if row.vector_store_id != expected as i64 {
                return Err(CerberusError::Integrity {
                    reason: format!(
                        "vector ids are not dense: expected {expected}, found {}",
                        row.vector_store_id
                    ),
                });
            }
        }
        Ok(())
    }

    // --- blueprint cache ---------------------------------------------

    pub fn cache_get(&self, cache_key: &str) -> Result<Option<(String, f64)>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT blueprint_json, expires_at FROM blueprint_cache WHERE cache_key = ?1",
                params![cache_key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row)
    }

    pub fn cache_put(
        &self,
        cache_key: &str,
        blueprint_json: &str,
        expires_at: f64,
        file_path: &str,
    ) -> Result<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO blueprint_cache(cache_key, blueprint_json, expires_at, file_path)
             VALUES (?1, ?2, ?3, ?4)",
            params![cache_key, blueprint_json, expires_at, file_path],
        )?;
        Ok(())
    }

    pub fn cache_delete(&self, cache_key: &str) -> Result<()> {
        self.conn.lock().execute(
            "DELETE FROM blueprint_cache WHERE cache_key = ?1",
            params![cache_key],
        )?;
        Ok(())
    }

    /// Remove every cached blueprint for a file, regardless of flags.
    pub fn cache_invalidate(&self, file_path: &str) -> Result<usize> {
        let count = self.conn.lock().execute(
            "DELETE FROM blueprint_cache WHERE file_path = ?1",
            params![file_path],
        )?;
        Ok(count)
    }

    pub fn cache_cleanup_expired(&self, now: f64) -> Result<usize> {
        let count = self.conn.lock().execute(
            "DELETE FROM blueprint_cache WHERE expires_at < ?1",
            params![now],
        )?;
        Ok(count)
    }

    // --- ledger tables ------------------------------------------------

    pub fn record_diff_metric(&self, metric: &DiffMetric) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO diff_metrics(timestamp, operation, file_path, lines_changed,
                                      lines_total, write_efficiency, tokens_saved)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                metric.timestamp,
                metric.operation,
                metric.file_path,
                metric.lines_changed,
                metric.lines_total,
                metric.write_efficiency as f64,
                metric.tokens_saved
            ],
        )?;
        Ok(())
    }

    pub fn query_diff_metrics(&self, limit: usize) -> Result<Vec<DiffMetric>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT timestamp, operation, file_path, lines_changed, lines_total,
                    write_efficiency, tokens_saved
             FROM diff_metrics ORDER BY timestamp DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(DiffMetric {
                timestamp: row.get(0)?,
                operation: row.get(1)?,
                file_path: row.get(2)?,
                lines_changed: row.get(3)?,
                lines_total: row.get(4)?,
                write_efficiency: row.get::<_, f64>(5)? as f32,
                tokens_saved: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn record_action(
        &self,
        timestamp: f64,
        action_type: &str,
        target_symbol: Option<&str>,
        target_file: &str,
        command: &str,
    ) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO action_log(timestamp, action_type, target_symbol, target_file, command)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![timestamp, action_type, target_symbol, target_file, command],
        )?;
        Ok(())
    }

    pub fn record_prediction(
        &self,
        timestamp: f64,
        edited_symbol: &str,
        edited_file: &str,
        predicted: &[(String, f32)],
    ) -> Result<()> {
        let symbols: Vec<&str> = predicted.iter().map(|(s, _)| s.as_str()).collect();
        let scores: Vec<f32> = predicted.iter().map(|(_, c)| *c).collect();
        self.conn.lock().execute(
            "INSERT INTO prediction_log(timestamp, edited_symbol, edited_file,
                                        predictions_count, predicted_symbols, confidence_scores)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                timestamp,
                edited_symbol,
                edited_file,
                predicted.len() as i64,
                serde_json::to_string(&symbols)?,
                serde_json::to_string(&scores)?
            ],
        )?;
        Ok(())
    }

    // --- sessions -----------------------------------------------------

    pub fn upsert_session(
        &self,
        session_id: &str,
        created_at: f64,
        last_activity: f64,
        query_count: u64,
        context: &str,
    ) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO sessions(session_id, created_at, last_activity, query_count, context)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(session_id) DO UPDATE SET
                 last_activity = excluded.last_activity,
                 query_count = excluded.query_count,
                 context = excluded.context",
            params![session_id, created_at, last_activity, query_count as i64, context],
        )?;
        Ok(())
    }

    pub fn delete_session(&self, session_id: &str) -> Result<()> {
        self.conn.lock().execute(
            "DELETE FROM sessions WHERE session_id = ?1",
            params![session_id],
        )?;
        Ok(())
    }

    pub fn record_session_activity(
        &self,
        session_id: &str,
        timestamp: f64,
        method: &str,
    ) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO session_activity(session_id, timestamp, method) VALUES (?1, ?2, ?3)",
            params![session_id, timestamp, method],
        )?;
        Ok(())
    }

    // --- stats --------------------------------------------------------

    pub fn get_stats(&self) -> Result<IndexStats> {
        let conn = self.conn.lock();
        let total_files: usize =
            conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        let total_symbols: usize =
            conn.query_row("SELECT COUNT(*) FROM symbols", [], |row| row.get(0))?;

        let mut symbol_kinds = HashMap::new();
        let mut stmt = conn.prepare("SELECT type, COUNT(*) FROM symbols GROUP BY type")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, usize>(1)?))
        })?;
        for row in rows {
            let (kind, count) = row?;
            symbol_kinds.insert(kind, count);
        }

        Ok(IndexStats {
            total_files,
            total_symbols,
            symbol_kinds,
            average_symbols_per_file: if total_files > 0 {
                total_symbols as f32 / total_files as f32
            } else {
                0.0
            },
        })
    }
}

/// Write handle valid for the duration of one transaction.
pub struct WriteBatch<'a> {
    conn: &'a Connection,
    fts_enabled: bool,
}

impl WriteBatch<'_> {
    pub fn write_file(&self, file: &FileRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO files(path, abs_path, size, last_modified) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(path) DO UPDATE SET
                 abs_path = excluded.abs_path,
                 size = excluded.size,
                 last_modified = excluded.last_modified",
            params![file.path, file.abs_path, file.size as i64, file.last_modified],
        )?;
        Ok(())
    }

    /// Insert symbols, returning their row ids in input order.
    pub fn write_symbols_batch(&self, symbols: &[Symbol]) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO symbols(name, type, file_path, start_line, end_line, start_byte,
                                 end_byte, signature, return_type, parameters, parent_class)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )?;
        let mut ids = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            stmt.execute(params![
                symbol.name,
                symbol.kind.as_str(),
                symbol.file_path,
                symbol.start_line,
                symbol.end_line,
                symbol.start_byte as i64,
                symbol.end_byte as i64,
                symbol.signature,
                symbol.return_type,
                symbol
                    .parameters
                    .as_ref()
                    .map(|p| serde_json::to_string(p).unwrap_or_default()),
                symbol.parent_class,
            ])?;
            ids.push(self.conn.last_insert_rowid());
        }
        if self.fts_enabled {
            let mut fts = self.conn.prepare_cached(
                "INSERT INTO symbols_fts(name, signature, snippet, file_path)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for symbol in symbols {
                fts.execute(params![
                    symbol.name,
                    symbol.signature.as_deref().unwrap_or(""),
                    "",
                    symbol.file_path,
                ])?;
            }
        }
        Ok(ids)
    }

    pub fn write_imports_batch(&self, imports: &[Import]) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached("INSERT INTO imports(module, file_path, line) VALUES (?1, ?2, ?3)")?;
        for import in imports {
            stmt.execute(params![import.module, import.file_path, import.line])?;
        }
        Ok(())
    }

    pub fn write_calls_batch(&self, calls: &[Call]) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO calls(caller_file, callee, line) VALUES (?1, ?2, ?3)",
        )?;
        for call in calls {
            stmt.execute(params![call.caller_file, call.callee, call.line])?;
        }
        Ok(())
    }

    pub fn write_type_infos_batch(&self, infos: &[TypeInfo]) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO type_infos(name, type_annotation, inferred_type, file_path, line)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for info in infos {
            stmt.execute(params![
                info.name,
                info.type_annotation,
                info.inferred_type,
                info.file_path,
                info.line
            ])?;
        }
        Ok(())
    }

    pub fn write_import_links_batch(&self, links: &[ImportLink]) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO import_links(importer_file, imported_module, imported_symbols,
                                      import_line, definition_file, definition_symbol)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for link in links {
            stmt.execute(params![
                link.importer_file,
                link.imported_module,
                serde_json::to_string(&link.imported_symbols)?,
                link.import_line,
                link.definition_file,
                link.definition_symbol
            ])?;
        }
        Ok(())
    }

    pub fn write_method_calls_batch(&self, calls: &[MethodCall]) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO method_calls(caller_file, line, receiver, method, receiver_type)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for call in calls {
            stmt.execute(params![
                call.caller_file,
                call.line,
                call.receiver,
                call.method,
                call.receiver_type
            ])?;
        }
        Ok(())
    }

    pub fn write_symbol_references_batch(&self, references: &[SymbolReference]) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO symbol_references(source_file, source_line, source_symbol,
                                           reference_type, target_file, target_symbol,
                                           target_type, confidence, resolution_method)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        for reference in references {
            stmt.execute(params![
                reference.source_file,
                reference.source_line,
                reference.source_symbol,
                reference.reference_type.as_str(),
                reference.target_file,
                reference.target_symbol,
                reference.target_type,
                reference.confidence as f64,
                reference.resolution_method
            ])?;
        }
        Ok(())
    }

    pub fn write_embedding_metadata(&self, rows: &[EmbeddingMetadata]) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT OR REPLACE INTO embeddings_metadata(symbol_id, vector_store_id, name,
                                                        file_path, model)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for row in rows {
            stmt.execute(params![
                row.symbol_id,
                row.vector_store_id,
                row.name,
                row.file_path,
                row.model
            ])?;
        }
        Ok(())
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO metadata(key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Remove every row associated with a file, in one shot.
    pub fn delete_file_rows(&self, path: &str) -> Result<()> {
        for sql in [
            "DELETE FROM symbols WHERE file_path = ?1",
            "DELETE FROM imports WHERE file_path = ?1",
            "DELETE FROM calls WHERE caller_file = ?1",
            "DELETE FROM type_infos WHERE file_path = ?1",
            "DELETE FROM import_links WHERE importer_file = ?1",
            "DELETE FROM method_calls WHERE caller_file = ?1",
            "DELETE FROM symbol_references WHERE source_file = ?1",
            "DELETE FROM embeddings_metadata WHERE file_path = ?1",
            "DELETE FROM files WHERE path = ?1",
        ] {
            self.conn.execute(sql, params![path])?;
        }
        if self.fts_enabled {
            self.conn
                .execute("DELETE FROM symbols_fts WHERE file_path = ?1", params![path])?;
        }
        Ok(())
    }
}

fn row_to_symbol(row: &rusqlite::Row<'_>) -> rusqlite::Result<Symbol> {
    Ok(Symbol {
        name: row.get(0)?,
        kind: parse_kind(row.get::<_, String>(1)?)?,
        file_path: row.get(2)?,
        start_line: row.get(3)?,
        end_line: row.get(4)?,
        start_byte: row.get::<_, i64>(5)? as usize,
        end_byte: row.get::<_, i64>(6)? as usize,
        signature: row.get(7)?,
        return_type: row.get(8)?,
        parameters: parse_parameters(row.get::<_, Option<String>>(9)?),
        parent_class: row.get(10)?,
    })
}

fn row_to_reference(row: &rusqlite::Row<'_>) -> rusqlite::Result<SymbolReference> {
    let kind: String = row.get(3)?;
    Ok(SymbolReference {
        source_file: row.get(0)?,
        source_line: row.get(1)?,
        source_symbol: row.get(2)?,
        reference_type: crate::types::ReferenceKind::parse(&kind).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("unknown reference type '{kind}'").into(),
            )
        })?,
        target_file: row.get(4)?,
        target_symbol: row.get(5)?,
        target_type: row.get(6)?,
        confidence: row.get::<_, f64>(7)? as f32,
        resolution_method: row.get(8)?,
    })
}

fn parse_kind(kind: String) -> rusqlite::Result<SymbolKind> {
    SymbolKind::parse(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown symbol type '{kind}'").into(),
        )
    })
}

fn parse_parameters(raw: Option<String>) -> Option<Vec<String>> {
    raw.and_then(|json| serde_json::from_str(&json).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn symbol(name: &str, file: &str, line: u32) -> Symbol {
        Symbol {
            name: name.into(),
            kind: SymbolKind::Function,
            file_path: file.into(),
            start_line: line,
            end_line: line + 4,
            start_byte: 0,
            end_byte: 100,
            signature: Some(format!("def {name}():")),
            return_type: None,
            parameters: Some(vec!["a".into()]),
            parent_class: None,
        }
    }

    fn file(path: &str) -> FileRecord {
        FileRecord {
            path: path.into(),
            abs_path: format!("/repo/{path}"),
            size: 100,
            last_modified: 1000.0,
        }
    }

    fn store() -> (TempDir, SqliteStore) {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::open(temp.path()).unwrap();
        (temp, store)
    }

    #[test]
    fn open_existing_requires_database() {
        let temp = TempDir::new().unwrap();
        let err = SqliteStore::open_existing(temp.path()).unwrap_err();
        assert!(matches!(err, CerberusError::IndexMissing { .. }));
    }

    #[test]
    fn transaction_writes_file_with_symbols_atomically() {
        let (_temp, store) = store();
        store
            .transaction(|batch| {
                batch.write_file(&file("a.py"))?;
                batch.write_symbols_batch(&[symbol("f", "a.py", 1), symbol("g", "a.py", 10)])?;
                Ok(())
            })
            .unwrap();

        let symbols = store.query_symbols(&SymbolFilter::default()).unwrap();
        assert_eq!(symbols.len(), 2);
        assert_eq!(store.query_files().unwrap().len(), 1);
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let (_temp, store) = store();
        let result: Result<()> = store.transaction(|batch| {
            batch.write_file(&file("a.py"))?;
            batch.write_symbols_batch(&[symbol("f", "a.py", 1)])?;
            Err(CerberusError::General("boom".into()))
        });
        assert!(result.is_err());
        assert!(store.query_files().unwrap().is_empty());
        assert!(store.query_symbols(&SymbolFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn delete_file_rows_removes_everything() {
        let (_temp, store) = store();
        store
            .transaction(|batch| {
                batch.write_file(&file("a.py"))?;
                batch.write_symbols_batch(&[symbol("f", "a.py", 1)])?;
                batch.write_imports_batch(&[Import {
                    module: "os".into(),
                    file_path: "a.py".into(),
                    line: 1,
                }])?;
                batch.write_calls_batch(&[Call {
                    caller_file: "a.py".into(),
                    callee: "g".into(),
                    line: 3,
                }])?;
                Ok(())
            })
            .unwrap();

        store
            .transaction(|batch| batch.delete_file_rows("a.py"))
            .unwrap();

        assert!(store.query_files().unwrap().is_empty());
        assert!(store.query_symbols(&SymbolFilter::default()).unwrap().is_empty());
        assert!(store.query_imports(None).unwrap().is_empty());
        assert!(store.query_calls(None).unwrap().is_empty());
    }

    #[test]
    fn name_search_orders_exact_prefix_substring() {
        let (_temp, store) = store();
        store
            .transaction(|batch| {
                batch.write_file(&file("a.py"))?;
                batch.write_symbols_batch(&[
                    symbol("parse", "a.py", 1),
                    symbol("parse_file", "a.py", 10),
                    symbol("reparse", "a.py", 20),
                ])?;
                Ok(())
            })
            .unwrap();

        let results = store.search_symbol_names("parse", 10).unwrap();
        let names: Vec<_> = results.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["parse", "parse_file", "reparse"]);
    }

    #[test]
    fn metadata_round_trip() {
        let (_temp, store) = store();
        store.set_metadata("git_commit", "abc123").unwrap();
        assert_eq!(
            store.get_metadata("git_commit").unwrap().as_deref(),
            Some("abc123")
        );
        store.set_metadata("git_commit", "def456").unwrap();
        assert_eq!(
            store.get_metadata("git_commit").unwrap().as_deref(),
            Some("def456")
        );
        assert!(store.get_metadata("missing").unwrap().is_none());
    }

    #[test]
    fn import_link_resolution_persists() {
        let (_temp, store) = store();
        store
            .transaction(|batch| {
                batch.write_import_links_batch(&[ImportLink {
                    importer_file: "b.py".into(),
                    imported_module: "a".into(),
                    imported_symbols: vec!["A".into()],
                    import_line: 1,
                    definition_file: None,
                    definition_symbol: None,
                }])
            })
            .unwrap();

        let links = store.query_import_links().unwrap();
        assert_eq!(links.len(), 1);
        let (id, link) = &links[0];
        assert!(link.definition_file.is_none());

        store.resolve_import_link(*id, "a.py", "A").unwrap();
        let links = store.query_import_links().unwrap();
        assert_eq!(links[0].1.definition_file.as_deref(), Some("a.py"));
    }

    #[test]
    fn blueprint_cache_round_trip_and_invalidation() {
        let (_temp, store) = store();
        store
            .cache_put("k1", "{\"nodes\":[]}", 9e12, "src/a.py")
            .unwrap();
        store
            .cache_put("k2", "{\"nodes\":[]}", 9e12, "src/a.py")
            .unwrap();
        assert!(store.cache_get("k1").unwrap().is_some());

        let removed = store.cache_invalidate("src/a.py").unwrap();
        assert_eq!(removed, 2);
        assert!(store.cache_get("k1").unwrap().is_none());
        assert!(store.cache_get("k2").unwrap().is_none());
    }

    #[test]
    fn embedding_integrity_detects_divergence() {
        let (_temp, store) = store();
        store
            .transaction(|batch| {
                batch.write_embedding_metadata(&[EmbeddingMetadata {
                    symbol_id: 1,
                    vector_store_id: 0,
                    name: "f".into(),
                    file_path: "a.py".into(),
                    model: "all-MiniLM-L6-v2".into(),
                }])
            })
            .unwrap();

        assert!(store.verify_embedding_integrity(1).is_ok());
        let err = store.verify_embedding_integrity(2).unwrap_err();
        assert!(matches!(err, CerberusError::Integrity { .. }));
    }

    #[test]
    fn stats_counts_by_kind() {
        let (_temp, store) = store();
        store
            .transaction(|batch| {
                batch.write_file(&file("a.py"))?;
                let mut class_symbol = symbol("C", "a.py", 1);
                class_symbol.kind = SymbolKind::Class;
                batch.write_symbols_batch(&[class_symbol, symbol("f", "a.py", 5)])?;
                Ok(())
            })
            .unwrap();

        let stats = store.get_stats().unwrap();
        assert_eq!(stats.total_files, 1);
        assert_eq!(stats.total_symbols, 2);
        assert_eq!(stats.symbol_kinds.get("class"), Some(&1));
        assert!((stats.average_symbols_per_file - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn diff_metric_ledger_is_append_only() {
        let (_temp, store) = store();
        for i in 0..3 {
            store
                .record_diff_metric(&DiffMetric {
                    timestamp: 1000.0 + i as f64,
                    operation: "edit".into(),
                    file_path: "a.py".into(),
                    lines_changed: 4,
                    lines_total: 100,
                    write_efficiency: 0.04,
                    tokens_saved: 240,
                })
                .unwrap();
        }
        let metrics = store.query_diff_metrics(10).unwrap();
        assert_eq!(metrics.len(), 3);
        // Most recent first.
        assert!(metrics[0].timestamp > metrics[2].timestamp);
    }
}
