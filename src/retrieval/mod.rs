//! Hybrid retrieval.
//!
//! Keyword (BM25), semantic (vector), and balanced modes, plus an auto
//! mode that inspects the query shape. Fusion defaults to reciprocal rank
//! fusion; balanced mode uses configured weights.

mod bm25;
mod fusion;

pub use bm25::{Bm25Hit, Bm25Index, tokenize};
pub use fusion::{RRF_K, reciprocal_rank_fusion, weighted_score_fusion};

use crate::config::Settings;
use crate::error::{CerberusError, Result};
use crate::semantic::{self, EmbeddingEngine};
use crate::storage::{IndexStore, SymbolFilter};
use crate::types::{Snippet, Symbol};
use regex::Regex;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Keyword,
    Semantic,
    Balanced,
    Auto,
}

impl SearchMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "keyword" => Some(Self::Keyword),
            "semantic" => Some(Self::Semantic),
            "balanced" => Some(Self::Balanced),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Keyword,
    Semantic,
    Both,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Semantic => "semantic",
            Self::Both => "both",
        }
    }
}

/// A symbol scored by one retrieval method, pre-fusion.
#[derive(Debug, Clone)]
pub struct ScoredSymbol {
    pub symbol: Symbol,
    pub snippet: Snippet,
    pub score: f32,
}

/// A fused search result.
#[derive(Debug, Clone, Serialize)]
pub struct HybridSearchResult {
    pub symbol: Symbol,
    pub snippet: Snippet,
    pub bm25_score: f32,
    pub vector_score: f32,
    pub hybrid_score: f32,
    pub rank: usize,
    pub match_type: MatchType,
}

/// Decide whether a query looks like an identifier or natural language.
pub fn detect_query_type(query: &str) -> SearchMode {
    // Identifier shapes mean the user knows the name.
    let exact_patterns = [
        r"^[A-Z][a-z]+[A-Z]", // CamelCase
        r"^[a-z]+_[a-z]+",    // snake_case
        r"^[A-Z_]+$",         // SCREAMING_SNAKE_CASE
    ];
    for pattern in exact_patterns {
        if Regex::new(pattern).unwrap().is_match(query) {
            return SearchMode::Keyword;
        }
    }

    let semantic_words = Regex::new(
        r"(?i)\b(how|what|where|when|why|find|search|get|code|logic|implementation)\b",
    )
    .unwrap();
    if semantic_words.is_match(query) {
        return SearchMode::Semantic;
    }

    if query.split_whitespace().count() <= 3 {
        SearchMode::Keyword
    } else {
        SearchMode::Semantic
    }
}

pub struct HybridRetriever {
    settings: Arc<Settings>,
    store: Arc<IndexStore>,
    embedder: Option<Arc<dyn EmbeddingEngine>>,
}

impl HybridRetriever {
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

    /// Run a search in the requested mode; `Auto` detects from the query.
    pub fn search(
        &self,
        query: &str,
        mode: SearchMode,
        top_k: usize,
    ) -> Result<Vec<HybridSearchResult>> {
        let mode = match mode {
            SearchMode::Auto => detect_query_type(query),
            other => other,
        };
        let per_method = self.settings.retrieval.top_k_per_method.max(top_k);

        let results = match mode {
            SearchMode::Keyword => {
                let hits = self.keyword_candidates(query, per_method)?;
                reciprocal_rank_fusion(hits, Vec::new())
            }
            SearchMode::Semantic => {
                let hits = self.semantic_candidates(query, per_method)?;
                reciprocal_rank_fusion(Vec::new(), hits)
            }
            SearchMode::Balanced => {
                let keyword = self.keyword_candidates(query, per_method)?;
                let vector = self.semantic_candidates(query, per_method)?;
                weighted_score_fusion(
                    keyword,
                    vector,
                    self.settings.retrieval.keyword_weight,
                    self.settings.retrieval.semantic_weight,
                )
            }
            SearchMode::Auto => unreachable!(),
        };

        Ok(results.into_iter().take(top_k).collect())
    }

    /// Keyword + semantic, fused with RRF regardless of detection.
    pub fn search_hybrid(&self, query: &str, top_k: usize) -> Result<Vec<HybridSearchResult>> {
        let per_method = self.settings.retrieval.top_k_per_method.max(top_k);
        let keyword = self.keyword_candidates(query, per_method)?;
        let vector = self.semantic_candidates(query, per_method)?;
        let fused = reciprocal_rank_fusion(keyword, vector);
        Ok(fused.into_iter().take(top_k).collect())
    }

    fn keyword_candidates(&self, query: &str, top_k: usize) -> Result<Vec<ScoredSymbol>> {
        let project_root = self
            .store
            .sqlite
            .get_metadata("project_root")?
            .unwrap_or_default();
        let root = Path::new(&project_root);
        let padding = self.settings.embedding.snippet_padding;

        // FTS over names and signatures narrows the candidate pool before
        // snippet scoring; a dry FTS result falls back to the full set so
        // snippet-only term matches are never lost.
        let fts_query = tokenize(query).join(" ");
        let mut symbols: Vec<Symbol> = if fts_query.is_empty() {
            Vec::new()
        } else {
            self.store
                .sqlite
                .fts_search(&fts_query, top_k * 10)?
                .into_iter()
                .map(|(symbol, _)| symbol)
                .collect()
        };
        if symbols.is_empty() {
            symbols = self.store.sqlite.query_symbols(&SymbolFilter::default())?;
        }

        let mut entries = Vec::new();
        for symbol in symbols {
            let snippet = semantic::snippet_for_symbol(root, &symbol, padding);
            let snippet = if snippet.content.is_empty() {
                // Fall back to name + signature so an index outliving its
                // sources still answers keyword queries.
                Snippet {
                    file_path: symbol.file_path.clone(),
                    start_line: symbol.start_line,
                    end_line: symbol.end_line,
                    content: format!(
                        "{} {}",
                        symbol.name,
                        symbol.signature.as_deref().unwrap_or("")
                    ),
                }
            } else {
                snippet
            };
            entries.push((symbol, snippet));
        }

        let index = Bm25Index::build(entries);
        Ok(index
            .search(query, top_k)
            .into_iter()
            .map(|hit| ScoredSymbol {
                symbol: hit.symbol,
                snippet: hit.snippet,
                score: hit.score,
            })
            .collect())
    }

    fn semantic_candidates(&self, query: &str, top_k: usize) -> Result<Vec<ScoredSymbol>> {
        let Some(embedder) = &self.embedder else {
            return Ok(Vec::new());
        };
        let vectors_guard = self.store.vectors.lock();
        if vectors_guard.is_empty() {
            return Ok(Vec::new());
        }

        let query_vectors = embedder
            .embed_batch(&[query.to_string()])
            .map_err(|e| CerberusError::General(e.to_string()))?;
        let Some(query_vector) = query_vectors.into_iter().next() else {
            return Ok(Vec::new());
        };

        let min_similarity = self.settings.retrieval.min_similarity;
        let raw = vectors_guard.search(&query_vector, top_k);

        // Map vector ids back to symbols through the metadata table.
        let metadata = self.store.sqlite.query_embeddings_metadata()?;
        let project_root = self
            .store
            .sqlite
            .get_metadata("project_root")?
            .unwrap_or_default();
        let root = Path::new(&project_root);
        let padding = self.settings.embedding.snippet_padding;

        let mut out = Vec::new();
        for (score, vector_id) in raw {
            if score < min_similarity {
                continue;
            }
            let Some(row) = metadata.iter().find(|m| m.vector_store_id == vector_id) else {
                continue;
            };
            let found = self.store.sqlite.query_symbols(&SymbolFilter {
                name: Some(&row.name),
                file_path: Some(&row.file_path),
                ..Default::default()
            })?;
            let Some(symbol) = found.into_iter().next() else {
                continue;
            };
            let snippet = semantic::snippet_for_symbol(root, &symbol, padding);
            out.push(ScoredSymbol {
                symbol,
                snippet,
                score,
            });
        }
        Ok(out)
    }
}

/// Read a line range with context padding; optionally skeletonized down to
/// signatures and comment lines.
pub fn read_range(
    file_path: &Path,
    start_line: u32,
    end_line: u32,
    padding: u32,
    skeleton: bool,
) -> Snippet {
    let display = file_path.to_string_lossy().to_string();
    let Ok(raw) = std::fs::read_to_string(file_path) else {
        tracing::warn!("file '{display}' not found when reading range");
        return Snippet {
            file_path: display,
            start_line,
            end_line,
            content: String::new(),
        };
    };

    if skeleton {
        let content = skeletonize(&raw);
        let line_count = content.lines().count() as u32;
        return Snippet {
            file_path: display,
            start_line: 1,
            end_line: line_count,
            content,
        };
    }

    let lines: Vec<&str> = raw.lines().collect();
    if lines.is_empty() {
        return Snippet {
            file_path: display,
            start_line: 0,
            end_line: 0,
            content: String::new(),
        };
    }
    let start = (start_line.saturating_sub(1).saturating_sub(padding) as usize).min(lines.len() - 1);
    let end = ((end_line.saturating_sub(1) + padding) as usize)
        .min(lines.len() - 1)
        .max(start);
    Snippet {
        file_path: display,
        start_line: start as u32 + 1,
        end_line: end as u32 + 1,
        content: lines[start..=end].join("\n"),
    }
}

/// Keep only signature and comment lines.
pub fn skeletonize(content: &str) -> String {
    let signature = Regex::new(
        r"(?x)^\s*(
            def\s | class\s |
            (export\s+)?(async\s+)?function\s |
            (export\s+)?class\s |
            (export\s+)?interface\s |
            (export\s+)?enum\s
        )",
    )
    .unwrap();
    let comment = Regex::new(r#"^\s*("""|'''|//|\#)"#).unwrap();

    content
        .lines()
        .filter(|line| signature.is_match(line) || comment.is_match(line))
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

/// ~4 characters per token, floor of 1.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() / 4).max(1)
}
