//! Auto-hydration: pick dependency files worth inlining.
//!
//! Internal files referenced at least three times from the primary
//! blueprint get mini-blueprints, greedily by reference count, until the
//! token budget runs out (estimated at 40 tokens per symbol).

use super::{Blueprint, BlueprintNode};
use std::collections::HashMap;

pub const HYDRATION_MIN_REFERENCES: usize = 3;
pub const HYDRATION_TOKEN_BUDGET: usize = 2000;
pub const TOKENS_PER_SYMBOL: usize = 40;
pub const MAX_HYDRATED_FILES: usize = 5;

const EXTERNAL_MARKERS: &[&str] = &[
    "site-packages",
    "dist-packages",
    "node_modules",
    ".venv",
    "venv/",
    "__pycache__",
];

/// Count cross-file dependency targets referenced from a blueprint.
pub fn count_file_references(blueprint: &Blueprint) -> HashMap<String, usize> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    fn visit(node: &BlueprintNode, own_file: &str, counts: &mut HashMap<String, usize>) {
        for dependency in &node.overlay.dependencies {
            if let Some(target_file) = &dependency.target_file {
                if target_file != own_file {
                    *counts.entry(target_file.clone()).or_default() += 1;
                }
            }
        }
        for child in &node.children {
            visit(child, own_file, counts);
        }
    }
    for node in &blueprint.nodes {
        visit(node, &blueprint.file_path, &mut counts);
    }
    counts
}

/// Internal project file, as opposed to vendored or stdlib trees.
pub fn is_internal_file(path: &str) -> bool {
    let lowered = path.to_lowercase();
    !EXTERNAL_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Greedy selection under the token budget, highest reference count first.
/// `symbol_count_of` supplies the per-file cost estimate.
pub fn select_hydration_targets(
    counts: &HashMap<String, usize>,
    primary_file: &str,
    mut symbol_count_of: impl FnMut(&str) -> usize,
) -> Vec<(String, usize)> {
    let mut candidates: Vec<(&String, &usize)> = counts
        .iter()
        .filter(|(file, count)| {
            **count >= HYDRATION_MIN_REFERENCES
                && file.as_str() != primary_file
                && is_internal_file(file)
        })
        .collect();
    // Most referenced first; ties break on path for determinism.
    candidates.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));

    let mut selected = Vec::new();
    let mut spent_tokens = 0usize;
    for (file, count) in candidates.into_iter().take(MAX_HYDRATED_FILES) {
        let cost = symbol_count_of(file) * TOKENS_PER_SYMBOL;
        if spent_tokens + cost > HYDRATION_TOKEN_BUDGET {
            tracing::debug!(
                "hydration skipping '{file}': {spent_tokens} + {cost} exceeds {HYDRATION_TOKEN_BUDGET}"
            );
            break;
        }
        spent_tokens += cost;
        selected.push((file.clone(), *count));
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pairs: &[(&str, usize)]) -> HashMap<String, usize> {
        pairs.iter().map(|(f, c)| (f.to_string(), *c)).collect()
    }

    #[test]
    fn under_threshold_files_are_skipped() {
        let counts = counts(&[("b.py", 2), ("c.py", 5)]);
        let selected = select_hydration_targets(&counts, "a.py", |_| 5);
        assert_eq!(selected, [("c.py".to_string(), 5)]);
    }

    #[test]
    fn vendored_trees_are_never_hydrated() {
        let counts = counts(&[("node_modules/lib/index.js", 9), ("src/util.py", 4)]);
        let selected = select_hydration_targets(&counts, "a.py", |_| 5);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].0, "src/util.py");
    }

    #[test]
    fn budget_caps_selection() {
        let counts = counts(&[("big.py", 9), ("small.py", 4)]);
        // big.py alone costs 45 * 40 = 1800 tokens; small.py would push
        // past 2000.
        let selected = select_hydration_targets(&counts, "a.py", |file| {
            if file == "big.py" { 45 } else { 10 }
        });
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].0, "big.py");
    }

    #[test]
    fn ordered_by_reference_count() {
        let counts = counts(&[("x.py", 3), ("y.py", 8), ("z.py", 5)]);
        let selected = select_hydration_targets(&counts, "a.py", |_| 1);
        let files: Vec<_> = selected.iter().map(|(f, _)| f.as_str()).collect();
        assert_eq!(files, ["y.py", "z.py", "x.py"]);
    }
}
