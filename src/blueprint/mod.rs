//! Blueprint generation.
//!
//! A blueprint is a hierarchical summary of one file's symbols (top-level
//! symbols, with methods nested under their class), optionally enriched
//! with overlays: dependencies, complexity, git churn, coverage, a
//! composite stability score, and cycle membership. Heavily-referenced
//! internal files can be auto-hydrated as mini-blueprints. Results are
//! cached in the store keyed by `(path, mtime, flags)`.

mod cache;
mod churn;
mod complexity;
mod coverage;
mod cycles;
mod diff;
mod hydration;
mod stability;

pub use cache::BlueprintCache;
pub use churn::{ChurnAnalyzer, ChurnMetrics};
pub use complexity::{ComplexityAnalyzer, ComplexityLevel, ComplexityMetrics};
pub use coverage::{CoverageMetrics, CoverageReport};
pub use cycles::detect_file_cycles;
pub use diff::{DiffAnnotation, annotate_against_ref};
pub use hydration::{HYDRATION_MIN_REFERENCES, HYDRATION_TOKEN_BUDGET, select_hydration_targets};
pub use stability::{StabilityLevel, StabilityScore, score_stability};

use crate::error::Result;
use crate::storage::{IndexStore, SymbolFilter};
use crate::types::{ReferenceKind, Symbol, SymbolKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Which overlays to compute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlueprintFlags {
    pub deps: bool,
    pub complexity: bool,
    pub churn: bool,
    pub coverage: Option<PathBuf>,
    pub stability: bool,
    pub cycles: bool,
    pub hydrate: bool,
    pub diff_ref: Option<String>,
}

impl BlueprintFlags {
    /// Stable serialization of the flag set, used in cache keys.
    pub fn canonical(&self) -> String {
        let mut parts: BTreeMap<&str, String> = BTreeMap::new();
        parts.insert("deps", self.deps.to_string());
        parts.insert("complexity", self.complexity.to_string());
        parts.insert("churn", self.churn.to_string());
        parts.insert(
            "coverage",
            self.coverage
                .as_ref()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default(),
        );
        parts.insert("stability", self.stability.to_string());
        parts.insert("cycles", self.cycles.to_string());
        parts.insert("hydrate", self.hydrate.to_string());
        parts.insert("diff", self.diff_ref.clone().unwrap_or_default());
        parts
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// A cross-file dependency attached to a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyInfo {
    pub target_symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_file: Option<String>,
    pub reference_type: ReferenceKind,
    pub confidence: f32,
}

/// Per-node overlay data; everything optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeOverlay {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<DependencyInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complexity: Option<ComplexityMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub churn: Option<ChurnMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<CoverageMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stability: Option<StabilityScore>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub in_cycle: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<DiffAnnotation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueprintNode {
    pub name: String,
    pub kind: SymbolKind,
    pub start_line: u32,
    pub end_line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<BlueprintNode>,
    #[serde(default)]
    pub overlay: NodeOverlay,
}

/// A hydrated dependency: symbol tree only, no overlays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiniBlueprint {
    pub file_path: String,
    pub reference_count: usize,
    pub nodes: Vec<BlueprintNode>,
    pub estimated_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blueprint {
    pub file_path: String,
    pub generated_at: f64,
    pub nodes: Vec<BlueprintNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hydrated: Vec<MiniBlueprint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed_symbols: Vec<String>,
    #[serde(default)]
    pub cached: bool,
}

impl Blueprint {
    pub fn symbol_count(&self) -> usize {
        fn count(nodes: &[BlueprintNode]) -> usize {
            nodes.len() + nodes.iter().map(|n| count(&n.children)).sum::<usize>()
        }
        count(&self.nodes)
    }
}

/// Directory-level rollup of per-file blueprints.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BlueprintAggregate {
    pub directory: String,
    pub file_count: usize,
    pub symbol_count: usize,
    pub symbols_by_kind: BTreeMap<String, usize>,
    pub risk_distribution: BTreeMap<String, usize>,
}

pub struct BlueprintEngine {
    store: Arc<IndexStore>,
    project_root: PathBuf,
    cache: BlueprintCache,
}

impl BlueprintEngine {
    pub fn new(store: Arc<IndexStore>, project_root: &Path) -> Self {
        let cache = BlueprintCache::new(store.clone());
        Self {
            store,
            project_root: project_root.to_path_buf(),
            cache,
        }
    }

    pub fn cache(&self) -> &BlueprintCache {
        &self.cache
    }

    /// Generate (or fetch from cache) the blueprint for one file.
    pub fn generate(&self, file_path: &str, flags: &BlueprintFlags) -> Result<Blueprint> {
        if let Some(cached) = self.cache.get(&self.project_root, file_path, flags)? {
            return Ok(cached);
        }

        let mut blueprint = self.generate_uncached(file_path, flags)?;
        self.cache
            .put(&self.project_root, file_path, flags, &blueprint)?;
        blueprint.cached = false;
        Ok(blueprint)
    }

    fn generate_uncached(&self, file_path: &str, flags: &BlueprintFlags) -> Result<Blueprint> {
        let symbols = self.store.sqlite.query_symbols(&SymbolFilter {
            file_path: Some(file_path),
            ..Default::default()
        })?;

        let mut nodes = build_tree(&symbols);

        if flags.deps || flags.hydrate || flags.stability {
            self.attach_dependencies(file_path, &mut nodes)?;
        }
        if flags.complexity || flags.stability {
            let analyzer = ComplexityAnalyzer::new(&self.project_root);
            for node in &mut nodes {
                attach_complexity(&analyzer, file_path, node);
            }
        }
        if flags.churn || flags.stability {
            let analyzer = ChurnAnalyzer::new(&self.project_root);
            for node in &mut nodes {
                attach_churn(&analyzer, file_path, node);
            }
        }
        if let Some(report_path) = &flags.coverage {
            if let Some(report) = CoverageReport::load(report_path) {
                for node in &mut nodes {
                    attach_coverage(&report, file_path, node);
                }
            }
        }
        if flags.stability {
            for node in &mut nodes {
                attach_stability(node);
            }
        }
        if flags.cycles {
            let cyclic_files = detect_file_cycles(&self.store.sqlite)?;
            let in_cycle = cyclic_files.iter().any(|cycle| {
                cycle.iter().any(|f| f == file_path)
            });
            if in_cycle {
                for node in &mut nodes {
                    mark_cycle(node);
                }
            }
        }
        if let Some(git_ref) = &flags.diff_ref {
            diff::apply_diff_annotations(&self.project_root, file_path, git_ref, &mut nodes);
        }

        let mut blueprint = Blueprint {
            file_path: file_path.to_string(),
            generated_at: now_seconds(),
            nodes,
            hydrated: Vec::new(),
            removed_symbols: Vec::new(),
            cached: false,
        };

        if let Some(git_ref) = &flags.diff_ref {
            blueprint.removed_symbols =
                diff::removed_symbols(&self.project_root, file_path, git_ref);
        }

        if flags.hydrate {
            blueprint.hydrated = self.hydrate(&blueprint)?;
        }

        Ok(blueprint)
    }

    fn attach_dependencies(&self, file_path: &str, nodes: &mut [BlueprintNode]) -> Result<()> {
        let references = self
            .store
            .sqlite
            .query_symbol_references(None, Some(file_path))?;
        for node in nodes {
            let mut dependencies: Vec<DependencyInfo> = references
                .iter()
                .filter(|r| {
                    (r.source_line >= node.start_line && r.source_line <= node.end_line)
                        || r.source_symbol == node.name
                })
                .filter_map(|r| {
                    r.target_symbol.as_ref().map(|target| DependencyInfo {
                        target_symbol: target.clone(),
                        target_file: r.target_file.clone(),
                        reference_type: r.reference_type,
                        confidence: r.confidence,
                    })
                })
                .collect();
            dependencies.dedup_by(|a, b| {
                a.target_symbol == b.target_symbol && a.reference_type == b.reference_type
            });
            node.overlay.dependencies = dependencies;

            // Children inherit from the same reference pool by their own spans.
            self.attach_child_dependencies(&references, &mut node.children);
        }
        Ok(())
    }

    fn attach_child_dependencies(
        &self,
        references: &[crate::types::SymbolReference],
        children: &mut [BlueprintNode],
    ) {
        for child in children {
            child.overlay.dependencies = references
                .iter()
                .filter(|r| {
                    r.source_line >= child.start_line && r.source_line <= child.end_line
                })
                .filter_map(|r| {
                    r.target_symbol.as_ref().map(|target| DependencyInfo {
                        target_symbol: target.clone(),
                        target_file: r.target_file.clone(),
                        reference_type: r.reference_type,
                        confidence: r.confidence,
                    })
                })
                .collect();
        }
    }

    /// Pick heavily-referenced internal files and include their symbol
    /// trees, greedily, within the token budget.
    fn hydrate(&self, blueprint: &Blueprint) -> Result<Vec<MiniBlueprint>> {
        let counts = hydration::count_file_references(blueprint);
        let targets = select_hydration_targets(&counts, blueprint.file_path.as_str(), |file| {
            self.estimate_symbol_count(file).unwrap_or(10)
        });

        let mut minis = Vec::new();
        for (file, reference_count) in targets {
            let symbols = self.store.sqlite.query_symbols(&SymbolFilter {
                file_path: Some(&file),
                ..Default::default()
            })?;
            if symbols.is_empty() {
                continue;
            }
            let estimated_tokens = symbols.len() * hydration::TOKENS_PER_SYMBOL;
            minis.push(MiniBlueprint {
                file_path: file,
                reference_count,
                nodes: build_tree(&symbols),
                estimated_tokens,
            });
        }
        Ok(minis)
    }

    fn estimate_symbol_count(&self, file: &str) -> Result<usize> {
        Ok(self
            .store
            .sqlite
            .query_symbols(&SymbolFilter {
                file_path: Some(file),
                ..Default::default()
            })?
            .len())
    }

    /// Roll up blueprints for every indexed file under a directory.
    pub fn aggregate(&self, directory: &str, flags: &BlueprintFlags) -> Result<BlueprintAggregate> {
        let mut aggregate = BlueprintAggregate {
            directory: directory.to_string(),
            ..Default::default()
        };
        let prefix = if directory.is_empty() || directory == "." {
            String::new()
        } else {
            format!("{}/", directory.trim_end_matches('/'))
        };

        for file in self.store.sqlite.query_files()? {
            if !prefix.is_empty() && !file.path.starts_with(&prefix) {
                continue;
            }
            let blueprint = self.generate(&file.path, flags)?;
            aggregate.file_count += 1;
            aggregate.symbol_count += blueprint.symbol_count();
            for node in &blueprint.nodes {
                tally(&mut aggregate, node);
            }
        }
        Ok(aggregate)
    }
}

fn tally(aggregate: &mut BlueprintAggregate, node: &BlueprintNode) {
    *aggregate
        .symbols_by_kind
        .entry(node.kind.as_str().to_string())
        .or_default() += 1;
    if let Some(stability) = &node.overlay.stability {
        *aggregate
            .risk_distribution
            .entry(stability.level.label().to_string())
            .or_default() += 1;
    }
    for child in &node.children {
        tally(aggregate, child);
    }
}

/// Arrange flat symbols into top-level nodes with methods nested under
/// their class.
pub fn build_tree(symbols: &[Symbol]) -> Vec<BlueprintNode> {
    let mut top_level: Vec<BlueprintNode> = Vec::new();
    let mut methods: Vec<&Symbol> = Vec::new();

    for symbol in symbols {
        if symbol.kind == SymbolKind::Method && symbol.parent_class.is_some() {
            methods.push(symbol);
        } else {
            top_level.push(node_from(symbol));
        }
    }

    for method in methods {
        let parent = method.parent_class.as_deref().unwrap_or_default();
        match top_level
            .iter_mut()
            .find(|n| n.kind == SymbolKind::Class && n.name == parent)
        {
            Some(class_node) => class_node.children.push(node_from(method)),
            // Orphan method (class not indexed): keep it visible at top level.
            None => top_level.push(node_from(method)),
        }
    }

    for node in &mut top_level {
        node.children.sort_by_key(|c| c.start_line);
    }
    top_level.sort_by_key(|n| n.start_line);
    top_level
}

fn node_from(symbol: &Symbol) -> BlueprintNode {
    BlueprintNode {
        name: symbol.name.clone(),
        kind: symbol.kind,
        start_line: symbol.start_line,
        end_line: symbol.end_line,
        signature: symbol.signature.clone(),
        children: Vec::new(),
        overlay: NodeOverlay::default(),
    }
}

fn attach_complexity(analyzer: &ComplexityAnalyzer, file_path: &str, node: &mut BlueprintNode) {
    node.overlay.complexity = analyzer.analyze(file_path, node.start_line, node.end_line);
    for child in &mut node.children {
        attach_complexity(analyzer, file_path, child);
    }
}

fn attach_churn(analyzer: &ChurnAnalyzer, file_path: &str, node: &mut BlueprintNode) {
    node.overlay.churn = analyzer.analyze(file_path, node.start_line, node.end_line);
    for child in &mut node.children {
        attach_churn(analyzer, file_path, child);
    }
}

fn attach_coverage(report: &CoverageReport, file_path: &str, node: &mut BlueprintNode) {
    node.overlay.coverage = report.for_range(file_path, node.start_line, node.end_line);
    for child in &mut node.children {
        attach_coverage(report, file_path, child);
    }
}

fn attach_stability(node: &mut BlueprintNode) {
    node.overlay.stability = score_stability(
        node.overlay.complexity.as_ref(),
        node.overlay.churn.as_ref(),
        node.overlay.coverage.as_ref(),
        node.overlay.dependencies.len(),
    );
    for child in &mut node.children {
        attach_stability(child);
    }
}

fn mark_cycle(node: &mut BlueprintNode) {
    node.overlay.in_cycle = true;
    for child in &mut node.children {
        mark_cycle(child);
    }
}

pub(crate) fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(name: &str, kind: SymbolKind, start: u32, parent: Option<&str>) -> Symbol {
        Symbol {
            name: name.into(),
            kind,
            file_path: "a.py".into(),
            start_line: start,
            end_line: start + 5,
            start_byte: 0,
            end_byte: 0,
            signature: Some(format!("{name}()")),
            return_type: None,
            parameters: None,
            parent_class: parent.map(str::to_string),
        }
    }

    #[test]
    fn tree_nests_methods_under_their_class() {
        let symbols = vec![
            symbol("Widget", SymbolKind::Class, 1, None),
            symbol("render", SymbolKind::Method, 2, Some("Widget")),
            symbol("helper", SymbolKind::Function, 20, None),
        ];
        let tree = build_tree(&symbols);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].name, "Widget");
        assert_eq!(tree[0].children.len(), 1);
        assert_eq!(tree[0].children[0].name, "render");
        assert_eq!(tree[1].name, "helper");
    }

    #[test]
    fn orphan_methods_stay_visible() {
        let symbols = vec![symbol("lost", SymbolKind::Method, 5, Some("Gone"))];
        let tree = build_tree(&symbols);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].name, "lost");
    }

    #[test]
    fn flags_canonical_is_order_stable() {
        let a = BlueprintFlags {
            deps: true,
            stability: true,
            ..Default::default()
        };
        let b = BlueprintFlags {
            stability: true,
            deps: true,
            ..Default::default()
        };
        assert_eq!(a.canonical(), b.canonical());
        assert_ne!(a.canonical(), BlueprintFlags::default().canonical());
    }

    #[test]
    fn blueprint_counts_nested_symbols() {
        let symbols = vec![
            symbol("Widget", SymbolKind::Class, 1, None),
            symbol("render", SymbolKind::Method, 2, Some("Widget")),
        ];
        let blueprint = Blueprint {
            file_path: "a.py".into(),
            generated_at: 0.0,
            nodes: build_tree(&symbols),
            hydrated: Vec::new(),
            removed_symbols: Vec::new(),
            cached: false,
        };
        assert_eq!(blueprint.symbol_count(), 2);
    }
}
