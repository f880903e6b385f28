//! Okapi BM25 keyword scoring over symbol snippets.

use crate::types::{Snippet, Symbol};
use std::collections::HashMap;

pub const K1: f32 = 1.5;
pub const B: f32 = 0.75;

/// A scored keyword hit.
#[derive(Debug, Clone)]
pub struct Bm25Hit {
    pub symbol: Symbol,
    pub snippet: Snippet,
    /// Softly normalized into [0, 1].
    pub score: f32,
}

/// Lowercased word tokens: runs of `[A-Za-z0-9_]`.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            current.push(c.to_ascii_lowercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

struct Document {
    symbol: Symbol,
    snippet: Snippet,
    term_freq: HashMap<String, u32>,
    length: usize,
}

/// In-memory BM25 index over one search's candidate documents.
pub struct Bm25Index {
    documents: Vec<Document>,
    idf: HashMap<String, f32>,
    avg_doc_length: f32,
    k1: f32,
    b: f32,
}

impl Bm25Index {
    pub fn build(entries: Vec<(Symbol, Snippet)>) -> Self {
        let doc_count = entries.len();
        let mut documents = Vec::with_capacity(doc_count);
        let mut doc_freq: HashMap<String, u32> = HashMap::new();
        let mut total_length = 0usize;

        for (symbol, snippet) in entries {
            let tokens = tokenize(&snippet.content);
            total_length += tokens.len();
            let mut term_freq: HashMap<String, u32> = HashMap::new();
            for token in tokens.iter() {
                *term_freq.entry(token.clone()).or_default() += 1;
            }
            for term in term_freq.keys() {
                *doc_freq.entry(term.clone()).or_default() += 1;
            }
            documents.push(Document {
                symbol,
                snippet,
                length: tokens.len(),
                term_freq,
            });
        }

        // IDF = ln((N - df + 0.5) / (df + 0.5) + 1), precomputed.
        let idf = doc_freq
            .into_iter()
            .map(|(term, df)| {
                let numerator = doc_count as f32 - df as f32 + 0.5;
                let denominator = df as f32 + 0.5;
                (term, (numerator / denominator + 1.0).ln())
            })
            .collect();

        Self {
            documents,
            idf,
            avg_doc_length: if doc_count > 0 {
                total_length as f32 / doc_count as f32
            } else {
                0.0
            },
            k1: K1,
            b: B,
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Score every document against the query; top-k, best first.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<Bm25Hit> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(f32, usize)> = Vec::new();
        for (index, document) in self.documents.iter().enumerate() {
            let mut score = 0.0;
            for term in &query_tokens {
                score += self.term_score(term, document);
            }
            if score > 0.0 {
                scored.push((score, index));
            }
        }
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .take(top_k)
            .map(|(raw, index)| {
                let document = &self.documents[index];
                Bm25Hit {
                    symbol: document.symbol.clone(),
                    snippet: document.snippet.clone(),
                    // BM25 is unbounded; divide by 10 and clamp.
                    score: (raw / 10.0).min(1.0),
                }
            })
            .collect()
    }

    fn term_score(&self, term: &str, document: &Document) -> f32 {
        let Some(idf) = self.idf.get(term) else {
            return 0.0;
        };
        let tf = *document.term_freq.get(term).unwrap_or(&0) as f32;
        if tf == 0.0 {
            return 0.0;
        }
        let length_norm = 1.0 - self.b + self.b * (document.length as f32 / self.avg_doc_length);
        idf * (tf * (self.k1 + 1.0)) / (tf + self.k1 * length_norm)
    }
}
