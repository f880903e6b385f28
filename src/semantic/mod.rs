//! Embedding generation for semantic search.
//!
//! Wraps fastembed behind a small trait so the index builder and the
//! retriever share one engine, and tests can swap in a deterministic one.

use crate::types::{Snippet, Symbol};
use parking_lot::Mutex;
use std::path::Path;

pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

#[derive(Debug, thiserror::Error)]
pub enum SemanticError {
    #[error("Failed to initialize embedding model: {0}")]
    ModelInit(String),

    #[error("Failed to generate embedding: {0}")]
    Embedding(String),
}

/// Anything that can turn snippet text into vectors.
pub trait EmbeddingEngine: Send + Sync {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SemanticError>;
    fn dimension(&self) -> usize;
    fn model_name(&self) -> &str;
}

/// fastembed-backed engine. The model is behind a mutex because fastembed
/// requires `&mut` for inference.
pub struct FastEmbedEngine {
    model: Mutex<fastembed::TextEmbedding>,
    dimension: usize,
    name: String,
}

impl FastEmbedEngine {
    pub fn new() -> Result<Self, SemanticError> {
        let mut model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed::EmbeddingModel::AllMiniLML6V2)
                .with_show_download_progress(false),
        )
        .map_err(|e| SemanticError::ModelInit(e.to_string()))?;

        // Probe the model once to learn its output dimension.
        let probe = model
            .embed(vec!["probe"], None)
            .map_err(|e| SemanticError::Embedding(e.to_string()))?;
        let dimension = probe.first().map(|v| v.len()).unwrap_or(0);
        if dimension == 0 {
            return Err(SemanticError::ModelInit(
                "model produced an empty embedding".to_string(),
            ));
        }

        Ok(Self {
            model: Mutex::new(model),
            dimension,
            name: DEFAULT_MODEL.to_string(),
        })
    }
}

impl EmbeddingEngine for FastEmbedEngine {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SemanticError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.model
            .lock()
            .embed(texts.to_vec(), None)
            .map_err(|e| SemanticError::Embedding(e.to_string()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

/// Deterministic engine for tests: hashes tokens into a fixed-size space.
/// Similar text yields similar vectors, which is all the tests need.
pub struct HashEmbeddingEngine {
    dimension: usize,
}

impl HashEmbeddingEngine {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl EmbeddingEngine for HashEmbeddingEngine {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SemanticError> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; self.dimension];
                for token in text.split(|c: char| !c.is_alphanumeric() && c != '_') {
                    if token.is_empty() {
                        continue;
                    }
                    let mut hash: u64 = 1469598103934665603;
                    for byte in token.to_lowercase().bytes() {
                        hash ^= byte as u64;
                        hash = hash.wrapping_mul(1099511628211);
                    }
                    vector[(hash % self.dimension as u64) as usize] += 1.0;
                }
                vector
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "hash-test"
    }
}

/// Read the code around a symbol for embedding or display.
///
/// Pads `padding` lines on each side, clamped to the file.
pub fn snippet_for_symbol(root: &Path, symbol: &Symbol, padding: u32) -> Snippet {
    let path = root.join(&symbol.file_path);
    let content = std::fs::read_to_string(&path).unwrap_or_default();
    snippet_from_source(&content, symbol, padding)
}

pub fn snippet_from_source(source: &str, symbol: &Symbol, padding: u32) -> Snippet {
    let lines: Vec<&str> = source.lines().collect();
    if lines.is_empty() {
        return Snippet {
            file_path: symbol.file_path.clone(),
            start_line: symbol.start_line,
            end_line: symbol.end_line,
            content: String::new(),
        };
    }
    let start =
        (symbol.start_line.saturating_sub(1).saturating_sub(padding) as usize).min(lines.len() - 1);
    let end = ((symbol.end_line.saturating_sub(1) + padding) as usize)
        .min(lines.len() - 1)
        .max(start);
    Snippet {
        file_path: symbol.file_path.clone(),
        start_line: start as u32 + 1,
        end_line: end as u32 + 1,
        content: lines[start..=end].join("\n"),
    }
}

/// Text fed to the embedding model for one symbol.
pub fn embedding_text(symbol: &Symbol, snippet: &Snippet) -> String {
    let mut text = String::new();
    text.push_str(&symbol.name);
    if let Some(signature) = &symbol.signature {
        text.push('\n');
        text.push_str(signature);
    }
    if !snippet.content.is_empty() {
        text.push('\n');
        text.push_str(&snippet.content);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SymbolKind;

    fn symbol(start: u32, end: u32) -> Symbol {
        Symbol {
            name: "f".into(),
            kind: SymbolKind::Function,
            file_path: "a.py".into(),
            start_line: start,
            end_line: end,
            start_byte: 0,
            end_byte: 0,
            signature: Some("def f():".into()),
            return_type: None,
            parameters: None,
            parent_class: None,
        }
    }

    #[test]
    fn snippet_pads_and_clamps() {
        let source = "l1\nl2\nl3\nl4\nl5\nl6\nl7";
        let snip = snippet_from_source(source, &symbol(3, 4), 2);
        assert_eq!(snip.start_line, 1);
        assert_eq!(snip.end_line, 6);
        assert!(snip.content.starts_with("l1"));
        assert!(snip.content.ends_with("l6"));

        let snip = snippet_from_source(source, &symbol(6, 7), 5);
        assert_eq!(snip.end_line, 7);
    }

    #[test]
    fn hash_engine_is_deterministic_and_similarity_ranked() {
        let engine = HashEmbeddingEngine::new(64);
        let vectors = engine
            .embed_batch(&[
                "parse file symbols".into(),
                "parse file symbols".into(),
                "database connection pool".into(),
            ])
            .unwrap();
        assert_eq!(vectors[0], vectors[1]);
        assert_ne!(vectors[0], vectors[2]);
    }

    #[test]
    fn embedding_text_includes_name_and_signature() {
        let snip = Snippet {
            file_path: "a.py".into(),
            start_line: 1,
            end_line: 1,
            content: "def f():".into(),
        };
        let text = embedding_text(&symbol(1, 1), &snip);
        assert!(text.contains('f'));
        assert!(text.contains("def f():"));
    }
}
