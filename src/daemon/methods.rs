//! RPC method registry.
//!
//! Maps JSON-RPC method names onto the store and retrieval components.
//! Wire formats use stable field names; unknown symbols and files come
//! back as structured results, not transport errors.

use super::rpc;
use super::sessions::SessionManager;
use crate::config::Settings;
use crate::retrieval::{HybridRetriever, HybridSearchResult, SearchMode, read_range};
use crate::semantic::EmbeddingEngine;
use crate::storage::{IndexStore, SymbolFilter};
use crate::types::Symbol;
use crate::watcher::AccessTracker;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;

pub const METHOD_NAMES: &[&str] = &[
    "get_symbol",
    "find_symbol",
    "search",
    "hybrid_search",
    "read_file",
    "read_range",
    "index_stats",
    "create_session",
    "close_session",
    "list_methods",
];

pub struct MethodRegistry {
    settings: Arc<Settings>,
    store: Arc<IndexStore>,
    embedder: Option<Arc<dyn EmbeddingEngine>>,
    project_root: PathBuf,
    sessions: Arc<SessionManager>,
    /// Per-file access counts feeding hot-blueprint regeneration.
    access: Arc<AccessTracker>,
}

type MethodError = (i64, String);

impl MethodRegistry {
    pub fn new(
        settings: Arc<Settings>,
        store: Arc<IndexStore>,
        embedder: Option<Arc<dyn EmbeddingEngine>>,
        project_root: PathBuf,
        sessions: Arc<SessionManager>,
        access: Arc<AccessTracker>,
    ) -> Self {
        Self {
            settings,
            store,
            embedder,
            project_root,
            sessions,
            access,
        }
    }

    /// Dispatch one call; errors map onto JSON-RPC error codes.
    pub fn dispatch(&self, method: &str, params: Option<&Value>) -> Result<Value, MethodError> {
        let params = params.cloned().unwrap_or_else(|| json!({}));

        // Session-tagged requests bump their session's activity.
        if let Some(session_id) = params.get("session_id").and_then(Value::as_str) {
            self.sessions.touch(session_id, Some(method));
        }

        match method {
            "get_symbol" | "find_symbol" => self.get_symbol(&params),
            "search" | "hybrid_search" => self.search(&params),
            "read_file" => self.read_file(&params),
            "read_range" => self.read_range(&params),
            "index_stats" => self.index_stats(),
            "create_session" => self.create_session(&params),
            "close_session" => self.close_session(&params),
            "list_methods" => Ok(json!({
                "methods": METHOD_NAMES,
                "count": METHOD_NAMES.len(),
            })),
            unknown => Err((
                rpc::METHOD_NOT_FOUND,
                format!("Method not found: {unknown}"),
            )),
        }
    }

    fn get_symbol(&self, params: &Value) -> Result<Value, MethodError> {
        let name = require_str(params, "name")?;
        let file_filter = params.get("file").and_then(Value::as_str);

        let mut matches = self
            .store
            .sqlite
            .query_symbols(&SymbolFilter {
                name: Some(name),
                ..Default::default()
            })
            .map_err(internal)?;
        if let Some(filter) = file_filter {
            matches.retain(|s| s.file_path.contains(filter));
        }

        for symbol in &matches {
            self.access.record(&symbol.file_path);
        }

        if matches.is_empty() {
            // Prefix/substring name search gives the caller something to
            // correct toward.
            let similar = self
                .store
                .sqlite
                .search_symbol_names(name, 5)
                .map_err(internal)?;
            return Ok(json!({
                "found": false,
                "symbol": name,
                "matches": [],
                "similar": similar.iter().map(symbol_to_wire).collect::<Vec<_>>(),
            }));
        }
        Ok(json!({
            "found": true,
            "symbol": name,
            "primary": symbol_to_wire(&matches[0]),
            "matches": matches.iter().map(symbol_to_wire).collect::<Vec<_>>(),
            "count": matches.len(),
        }))
    }

    fn search(&self, params: &Value) -> Result<Value, MethodError> {
        let query = require_str(params, "query")?;
        let mode = params
            .get("mode")
            .and_then(Value::as_str)
            .unwrap_or(&self.settings.retrieval.default_mode)
            .to_string();
        let mode = SearchMode::parse(&mode)
            .ok_or_else(|| (rpc::INVALID_PARAMS, format!("unknown mode '{mode}'")))?;
        let top_k = params
            .get("top_k")
            .and_then(Value::as_u64)
            .unwrap_or(self.settings.retrieval.final_top_k as u64) as usize;

        let retriever = HybridRetriever::new(
            self.settings.clone(),
            self.store.clone(),
            self.embedder.clone(),
        );
        let results = retriever.search(query, mode, top_k).map_err(internal)?;

        Ok(json!({
            "query": query,
            "mode": mode,
            "count": results.len(),
            "results": results.iter().map(search_result_to_wire).collect::<Vec<_>>(),
        }))
    }

    fn read_file(&self, params: &Value) -> Result<Value, MethodError> {
        let file = require_str(params, "file")?;
        self.access.record(file);
        let path = self.project_root.join(file);
        if !path.exists() {
            return Ok(json!({
                "found": false,
                "file": file,
                "error": "File not found",
            }));
        }

        if let Some(lines) = params.get("lines").and_then(Value::as_array) {
            if lines.len() != 2 {
                return Err((
                    rpc::INVALID_PARAMS,
                    "lines must be [start, end]".to_string(),
                ));
            }
            let start = lines[0].as_u64().unwrap_or(1) as u32;
            let end = lines[1].as_u64().unwrap_or(start as u64) as u32;
            let snippet = read_range(&path, start, end, 0, false);
            return Ok(json!({
                "found": true,
                "file": file,
                "line_start": snippet.start_line,
                "line_end": snippet.end_line,
                "content": snippet.content,
            }));
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| (rpc::FILE_NOT_FOUND, e.to_string()))?;
        Ok(json!({
            "found": true,
            "file": file,
            "content": content,
        }))
    }

    fn read_range(&self, params: &Value) -> Result<Value, MethodError> {
        let file = require_str(params, "file")?;
        self.access.record(file);
        let start = params
            .get("start")
            .and_then(Value::as_u64)
            .ok_or_else(|| missing("start"))? as u32;
        let end = params
            .get("end")
            .and_then(Value::as_u64)
            .ok_or_else(|| missing("end"))? as u32;
        let padding = params.get("padding").and_then(Value::as_u64).unwrap_or(0) as u32;
        let skeleton = params
            .get("skeleton")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let path = self.project_root.join(file);
        if !path.exists() {
            return Ok(json!({
                "found": false,
                "file": file,
                "error": "File not found",
            }));
        }
        let snippet = read_range(&path, start, end, padding, skeleton);
        Ok(json!({
            "found": true,
            "file": file,
            "line_start": snippet.start_line,
            "line_end": snippet.end_line,
            "content": snippet.content,
        }))
    }

    fn index_stats(&self) -> Result<Value, MethodError> {
        let stats = self.store.sqlite.get_stats().map_err(|e| {
            (rpc::INDEX_ERROR, e.to_string())
        })?;
        Ok(json!({
            "total_files": stats.total_files,
            "total_symbols": stats.total_symbols,
            "symbol_kinds": stats.symbol_kinds,
            "average_symbols_per_file": stats.average_symbols_per_file,
        }))
    }

    fn create_session(&self, params: &Value) -> Result<Value, MethodError> {
        let session_id = params
            .get("agent_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("session-{}", std::process::id()));
        let session = self.sessions.create(&session_id);
        Ok(json!({
            "session_id": session.session_id,
            "created_at": session.created_at,
        }))
    }

    fn close_session(&self, params: &Value) -> Result<Value, MethodError> {
        let session_id = require_str(params, "session_id")?;
        let closed = self.sessions.close(session_id);
        Ok(json!({
            "session_id": session_id,
            "closed": closed,
        }))
    }
}

fn symbol_to_wire(symbol: &Symbol) -> Value {
    let mut wire = json!({
        "name": symbol.name,
        "type": symbol.kind.as_str(),
        "file": symbol.file_path,
        "line_start": symbol.start_line,
        "line_end": symbol.end_line,
    });
    if let Some(signature) = &symbol.signature {
        wire["signature"] = json!(signature);
    }
    if let Some(parent) = &symbol.parent_class {
        wire["parent_class"] = json!(parent);
    }
    if let Some(return_type) = &symbol.return_type {
        wire["return_type"] = json!(return_type);
    }
    if let Some(parameters) = &symbol.parameters {
        wire["parameters"] = json!(parameters);
    }
    wire
}

fn search_result_to_wire(result: &HybridSearchResult) -> Value {
    json!({
        "rank": result.rank,
        "score": result.hybrid_score,
        "symbol": result.symbol.name,
        "type": result.symbol.kind.as_str(),
        "file": result.symbol.file_path,
        "line_start": result.symbol.start_line,
        "line_end": result.symbol.end_line,
        "match_type": result.match_type.as_str(),
    })
}

fn require_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, MethodError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| missing(key))
}

fn missing(key: &str) -> MethodError {
    (
        rpc::INVALID_PARAMS,
        format!("Missing required parameter: {key}"),
    )
}

fn internal(e: crate::error::CerberusError) -> MethodError {
    (rpc::INTERNAL_ERROR, e.to_string())
}
