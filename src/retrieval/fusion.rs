//! Rank fusion for hybrid retrieval.
//!
//! Default is Reciprocal Rank Fusion with k = 60; weighted score fusion is
//! the alternative for the balanced mode. Both deduplicate by the stable
//! symbol id `file:name:start_line`.

use super::{HybridSearchResult, MatchType, ScoredSymbol};
use std::collections::HashMap;

pub const RRF_K: f32 = 60.0;

struct FusionSlot {
    entry: ScoredSymbol,
    bm25_score: f32,
    vector_score: f32,
    bm25_rank: Option<usize>,
    vector_rank: Option<usize>,
}

/// RRF: score(d) = sum over sources of 1 / (k + rank_in_source).
pub fn reciprocal_rank_fusion(
    bm25_results: Vec<ScoredSymbol>,
    vector_results: Vec<ScoredSymbol>,
) -> Vec<HybridSearchResult> {
    let mut slots: HashMap<String, FusionSlot> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for (rank, entry) in bm25_results.into_iter().enumerate() {
        let id = entry.symbol.stable_id();
        let score = entry.score;
        slots
            .entry(id.clone())
            .and_modify(|slot| {
                slot.bm25_score = score;
                slot.bm25_rank = Some(rank + 1);
            })
            .or_insert_with(|| {
                order.push(id);
                FusionSlot {
                    entry,
                    bm25_score: score,
                    vector_score: 0.0,
                    bm25_rank: Some(rank + 1),
                    vector_rank: None,
                }
            });
    }

    for (rank, entry) in vector_results.into_iter().enumerate() {
        let id = entry.symbol.stable_id();
        let score = entry.score;
        slots
            .entry(id.clone())
            .and_modify(|slot| {
                slot.vector_score = score;
                slot.vector_rank = Some(rank + 1);
            })
            .or_insert_with(|| {
                order.push(id);
                FusionSlot {
                    entry,
                    bm25_score: 0.0,
                    vector_score: score,
                    bm25_rank: None,
                    vector_rank: Some(rank + 1),
                }
            });
    }

    let mut fused: Vec<(f32, FusionSlot)> = order
        .into_iter()
        .filter_map(|id| slots.remove(&id))
        .map(|slot| {
            let mut score = 0.0;
            if let Some(rank) = slot.bm25_rank {
                score += 1.0 / (RRF_K + rank as f32);
            }
            if let Some(rank) = slot.vector_rank {
                score += 1.0 / (RRF_K + rank as f32);
            }
            (score, slot)
        })
        .collect();

    fused.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    fused
        .into_iter()
        .enumerate()
        .map(|(index, (score, slot))| {
            let match_type = match (slot.bm25_rank, slot.vector_rank) {
                (Some(_), Some(_)) => MatchType::Both,
                (Some(_), None) => MatchType::Keyword,
                _ => MatchType::Semantic,
            };
            HybridSearchResult {
                symbol: slot.entry.symbol,
                snippet: slot.entry.snippet,
                bm25_score: slot.bm25_score,
                vector_score: slot.vector_score,
                hybrid_score: score,
                rank: index + 1,
                match_type,
            }
        })
        .collect()
}

/// hybrid = keyword_weight * bm25 + semantic_weight * vector.
pub fn weighted_score_fusion(
    bm25_results: Vec<ScoredSymbol>,
    vector_results: Vec<ScoredSymbol>,
    keyword_weight: f32,
    semantic_weight: f32,
) -> Vec<HybridSearchResult> {
    let mut slots: HashMap<String, FusionSlot> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for entry in bm25_results {
        let id = entry.symbol.stable_id();
        let score = entry.score;
        slots
            .entry(id.clone())
            .and_modify(|slot| {
                slot.bm25_score = score;
                slot.bm25_rank = Some(0);
            })
            .or_insert_with(|| {
                order.push(id);
                FusionSlot {
                    entry,
                    bm25_score: score,
                    vector_score: 0.0,
                    bm25_rank: Some(0),
                    vector_rank: None,
                }
            });
    }
    for entry in vector_results {
        let id = entry.symbol.stable_id();
        let score = entry.score;
        slots
            .entry(id.clone())
            .and_modify(|slot| {
                slot.vector_score = score;
                slot.vector_rank = Some(0);
            })
            .or_insert_with(|| {
                order.push(id);
                FusionSlot {
                    entry,
                    bm25_score: 0.0,
                    vector_score: score,
                    bm25_rank: None,
                    vector_rank: Some(0),
                }
            });
    }

    let mut fused: Vec<(f32, FusionSlot)> = order
        .into_iter()
        .filter_map(|id| slots.remove(&id))
        .map(|slot| {
            let score = keyword_weight * slot.bm25_score + semantic_weight * slot.vector_score;
            (score, slot)
        })
        .collect();
    fused.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    fused
        .into_iter()
        .enumerate()
        .map(|(index, (score, slot))| {
            let match_type = match (slot.bm25_score > 0.0, slot.vector_score > 0.0) {
                (true, true) => MatchType::Both,
                (true, false) => MatchType::Keyword,
                _ => MatchType::Semantic,
            };
            HybridSearchResult {
                symbol: slot.entry.symbol,
                snippet: slot.entry.snippet,
                bm25_score: slot.bm25_score,
                vector_score: slot.vector_score,
                hybrid_score: score,
                rank: index + 1,
                match_type,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Snippet, Symbol, SymbolKind};

    fn scored(name: &str, line: u32, score: f32) -> ScoredSymbol {
        ScoredSymbol {
            symbol: Symbol {
                name: name.into(),
                kind: SymbolKind::Function,
                file_path: "a.py".into(),
                start_line: line,
                end_line: line + 2,
                start_byte: 0,
                end_byte: 0,
                signature: None,
                return_type: None,
                parameters: None,
                parent_class: None,
            },
            snippet: Snippet {
                file_path: "a.py".into(),
                start_line: line,
                end_line: line + 2,
                content: String::new(),
            },
            score,
        }
    }

    #[test]
    fn rrf_deduplicates_and_tags_both() {
        let fused = reciprocal_rank_fusion(
            vec![scored("foo", 1, 0.8), scored("bar", 5, 0.4)],
            vec![scored("foo", 1, 0.9)],
        );
        assert_eq!(fused.len(), 2);
        let foo = fused.iter().find(|r| r.symbol.name == "foo").unwrap();
        assert_eq!(foo.match_type, MatchType::Both);
        assert_eq!(foo.rank, 1);
        // rank 1 in both lists: 2 / 61.
        assert!((foo.hybrid_score - 2.0 / 61.0).abs() < 1e-6);

        let bar = fused.iter().find(|r| r.symbol.name == "bar").unwrap();
        assert_eq!(bar.match_type, MatchType::Keyword);
    }

    #[test]
    fn rrf_never_returns_duplicate_stable_ids() {
        let fused = reciprocal_rank_fusion(
            vec![scored("foo", 1, 0.8), scored("foo", 1, 0.7)],
            vec![scored("foo", 1, 0.9)],
        );
        assert_eq!(fused.len(), 1);
    }

    #[test]
    fn weighted_fusion_respects_weights() {
        let fused = weighted_score_fusion(
            vec![scored("kw", 1, 1.0)],
            vec![scored("sem", 5, 1.0)],
            0.9,
            0.1,
        );
        assert_eq!(fused[0].symbol.name, "kw");
        assert!((fused[0].hybrid_score - 0.9).abs() < 1e-6);
        assert_eq!(fused[1].match_type, MatchType::Semantic);
    }
}
