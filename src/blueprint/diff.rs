//! Structural diff annotations against a git ref.
//!
//! Parses the file as it existed at the ref (via `git show`) and compares
//! symbol sets: nodes gain added/modified markers, and symbols that
//! disappeared are reported at the blueprint level.

use super::BlueprintNode;
use crate::parsing;
use crate::types::Symbol;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffAnnotation {
    Added,
    Modified,
    Unchanged,
}

/// Symbols present at the ref, keyed for comparison.
fn symbols_at_ref(project_root: &Path, file_path: &str, git_ref: &str) -> Option<Vec<Symbol>> {
    let output = Command::new("git")
        .args(["show", &format!("{git_ref}:{file_path}")])
        .current_dir(project_root)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let source = String::from_utf8_lossy(&output.stdout).to_string();
    parsing::parse_source(Path::new(file_path), &source).map(|record| record.symbols)
}

/// Annotate each node as added, modified, or unchanged relative to the
/// ref's version of the file. Best-effort; no git means no annotations.
pub fn apply_diff_annotations(
    project_root: &Path,
    file_path: &str,
    git_ref: &str,
    nodes: &mut [BlueprintNode],
) {
    let Some(old_symbols) = symbols_at_ref(project_root, file_path, git_ref) else {
        return;
    };
    annotate_nodes(nodes, &old_symbols);
}

fn annotate_nodes(nodes: &mut [BlueprintNode], old_symbols: &[Symbol]) {
    for node in nodes {
        let old = old_symbols.iter().find(|s| s.name == node.name);
        node.overlay.diff = Some(match old {
            None => DiffAnnotation::Added,
            Some(old_symbol) => {
                let same_signature = old_symbol.signature.as_deref()
                    == node.signature.as_deref();
                let same_span = old_symbol.line_count()
                    == node.end_line.saturating_sub(node.start_line) + 1;
                if same_signature && same_span {
                    DiffAnnotation::Unchanged
                } else {
                    DiffAnnotation::Modified
                }
            }
        });
        annotate_nodes(&mut node.children, old_symbols);
    }
}

/// Symbols that existed at the ref but are gone now.
pub fn removed_symbols(project_root: &Path, file_path: &str, git_ref: &str) -> Vec<String> {
    let Some(old_symbols) = symbols_at_ref(project_root, file_path, git_ref) else {
        return Vec::new();
    };
    let current = parsing_current(project_root, file_path);
    old_symbols
        .iter()
        .filter(|old| !current.iter().any(|c| c == &old.name))
        .map(|old| old.name.clone())
        .collect()
}

fn parsing_current(project_root: &Path, file_path: &str) -> Vec<String> {
    let absolute = project_root.join(file_path);
    let Ok(source) = std::fs::read_to_string(&absolute) else {
        return Vec::new();
    };
    parsing::parse_source(&absolute, &source)
        .map(|record| record.symbols.into_iter().map(|s| s.name).collect())
        .unwrap_or_default()
}

/// Annotate a full node list against a ref; exposed for callers that hold
/// the old symbol list already.
pub fn annotate_against_ref(nodes: &mut [BlueprintNode], old_symbols: &[Symbol]) {
    annotate_nodes(nodes, old_symbols);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::build_tree;
    use crate::types::SymbolKind;

    fn symbol(name: &str, signature: &str, start: u32, end: u32) -> Symbol {
        Symbol {
            name: name.into(),
            kind: SymbolKind::Function,
            file_path: "a.py".into(),
            start_line: start,
            end_line: end,
            start_byte: 0,
            end_byte: 0,
            signature: Some(signature.into()),
            return_type: None,
            parameters: None,
            parent_class: None,
        }
    }

    #[test]
    fn annotations_cover_added_modified_unchanged() {
        let old = vec![
            symbol("kept", "def kept():", 1, 3),
            symbol("reshaped", "def reshaped(a):", 5, 8),
        ];
        let current = vec![
            symbol("kept", "def kept():", 1, 3),
            symbol("reshaped", "def reshaped(a, b):", 5, 9),
            symbol("fresh", "def fresh():", 11, 12),
        ];
        let mut nodes = build_tree(&current);
        annotate_against_ref(&mut nodes, &old);

        let by_name = |name: &str| {
            nodes
                .iter()
                .find(|n| n.name == name)
                .unwrap()
                .overlay
                .diff
                .unwrap()
        };
        assert_eq!(by_name("kept"), DiffAnnotation::Unchanged);
        assert_eq!(by_name("reshaped"), DiffAnnotation::Modified);
        assert_eq!(by_name("fresh"), DiffAnnotation::Added);
    }
}
