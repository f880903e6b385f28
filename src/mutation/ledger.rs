//! Diff generation and the write-efficiency ledger.
//!
//! Mutations are contiguous splices, so the line diff reduces to a common
//! prefix/suffix computation, which makes the unified diff exact. Large
//! diffs are truncated with all removed lines kept.

use crate::error::Result;
use crate::retrieval::estimate_tokens;
use crate::storage::SqliteStore;
use crate::types::DiffMetric;
use serde::Serialize;

/// A computed line-level change between two file versions.
#[derive(Debug)]
pub struct LineDiff {
    pub removed: Vec<String>,
    pub added: Vec<String>,
    /// 1-indexed first changed line in the old version.
    pub old_start: u32,
    /// 1-indexed first changed line in the new version.
    pub new_start: u32,
}

impl LineDiff {
    pub fn lines_changed(&self) -> u32 {
        self.removed.len().max(self.added.len()) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

/// Diff two versions that differ in one contiguous region.
pub fn compute_line_diff(original: &str, modified: &str) -> LineDiff {
    let old_lines: Vec<&str> = original.lines().collect();
    let new_lines: Vec<&str> = modified.lines().collect();

    let mut prefix = 0usize;
    while prefix < old_lines.len()
        && prefix < new_lines.len()
        && old_lines[prefix] == new_lines[prefix]
    {
        prefix += 1;
    }

    let mut suffix = 0usize;
    while suffix < old_lines.len().saturating_sub(prefix)
        && suffix < new_lines.len().saturating_sub(prefix)
        && old_lines[old_lines.len() - 1 - suffix] == new_lines[new_lines.len() - 1 - suffix]
    {
        suffix += 1;
    }

    LineDiff {
        removed: old_lines[prefix..old_lines.len() - suffix]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        added: new_lines[prefix..new_lines.len() - suffix]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        old_start: prefix as u32 + 1,
        new_start: prefix as u32 + 1,
    }
}

/// Render a unified diff for one contiguous change, truncating large
/// output: headers and all `-` lines are always kept; `+` lines fill the
/// remaining budget, with a note about what was dropped.
pub fn unified_diff(
    file_path: &str,
    original: &str,
    modified: &str,
    max_lines: usize,
) -> String {
    let diff = compute_line_diff(original, modified);
    if diff.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    out.push_str(&format!("--- a/{file_path}\n"));
    out.push_str(&format!("+++ b/{file_path}\n"));
    out.push_str(&format!(
        "@@ -{},{} +{},{} @@\n",
        diff.old_start,
        diff.removed.len(),
        diff.new_start,
        diff.added.len()
    ));

    let header_lines = 3usize;
    for line in &diff.removed {
        out.push_str(&format!("-{line}\n"));
    }

    let used = header_lines + diff.removed.len();
    let budget = max_lines.saturating_sub(used);
    if diff.added.len() <= budget {
        for line in &diff.added {
            out.push_str(&format!("+{line}\n"));
        }
    } else {
        for line in diff.added.iter().take(budget.saturating_sub(1)) {
            out.push_str(&format!("+{line}\n"));
        }
        out.push_str(&format!(
            "[... {} added lines truncated for brevity ...]\n",
            diff.added.len() - budget.saturating_sub(1)
        ));
    }
    out
}

/// Summary over the diff_metrics table.
#[derive(Debug, Default, Clone, Serialize)]
pub struct EfficiencyReport {
    pub total_operations: usize,
    pub total_lines_changed: u64,
    pub total_tokens_saved: i64,
    pub average_write_efficiency: f32,
    pub operations_by_type: std::collections::BTreeMap<String, usize>,
}

pub struct DiffLedger<'a> {
    store: &'a SqliteStore,
}

impl<'a> DiffLedger<'a> {
    pub fn new(store: &'a SqliteStore) -> Self {
        Self { store }
    }

    /// Append one metric row for a completed mutation.
    pub fn record(
        &self,
        operation: &str,
        file_path: &str,
        lines_changed: u32,
        lines_total: u32,
        original: &str,
        new_code: &str,
    ) -> Result<DiffMetric> {
        let write_efficiency = if lines_total > 0 {
            lines_changed as f32 / lines_total as f32
        } else {
            0.0
        };
        // Tokens saved relative to rewriting the whole file.
        let tokens_saved =
            estimate_tokens(original) as i64 - estimate_tokens(new_code) as i64;
        let metric = DiffMetric {
            timestamp: now_seconds(),
            operation: operation.to_string(),
            file_path: file_path.to_string(),
            lines_changed,
            lines_total,
            write_efficiency,
            tokens_saved: tokens_saved.max(0),
        };
        self.store.record_diff_metric(&metric)?;
        Ok(metric)
    }

    pub fn report(&self, limit: usize) -> Result<EfficiencyReport> {
        let metrics = self.store.query_diff_metrics(limit)?;
        let mut report = EfficiencyReport {
            total_operations: metrics.len(),
            ..Default::default()
        };
        let mut efficiency_sum = 0.0f32;
        for metric in &metrics {
            report.total_lines_changed += metric.lines_changed as u64;
            report.total_tokens_saved += metric.tokens_saved;
            efficiency_sum += metric.write_efficiency;
            *report
                .operations_by_type
                .entry(metric.operation.clone())
                .or_default() += 1;
        }
        if !metrics.is_empty() {
            report.average_write_efficiency = efficiency_sum / metrics.len() as f32;
        }
        Ok(report)
    }
}

fn now_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
