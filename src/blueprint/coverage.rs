//! Coverage overlay from an external coverage JSON report.
//!
//! Consumes the coverage.py JSON schema, and only this subset of it:
//! `files.<path>.summary.percent_covered`, `files.<path>.executed_lines`,
//! and `files.<path>.missing_lines`. Anything else in the report is
//! ignored.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageMetrics {
    /// Percent of the symbol's executable lines that ran.
    pub percent: f32,
    pub covered_lines: u32,
    pub missing_lines: u32,
}

#[derive(Debug, Deserialize)]
struct RawReport {
    #[serde(default)]
    files: HashMap<String, RawFile>,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    #[serde(default)]
    executed_lines: Vec<u32>,
    #[serde(default)]
    missing_lines: Vec<u32>,
    #[serde(default)]
    summary: RawSummary,
}

#[derive(Debug, Default, Deserialize)]
struct RawSummary {
    #[serde(default)]
    percent_covered: f32,
}

/// A parsed coverage report, queryable by file path and line range.
pub struct CoverageReport {
    files: HashMap<String, RawFile>,
}

impl CoverageReport {
    /// Load a coverage.py JSON report; None on any read or parse failure.
    pub fn load(path: &Path) -> Option<Self> {
        let raw = std::fs::read_to_string(path).ok()?;
        let report: RawReport = serde_json::from_str(&raw).ok()?;
        Some(Self {
            files: report.files,
        })
    }

    #[cfg(test)]
    pub fn from_json(json: &str) -> Option<Self> {
        let report: RawReport = serde_json::from_str(json).ok()?;
        Some(Self {
            files: report.files,
        })
    }

    /// Whole-file coverage percent, if the report knows the file.
    pub fn file_percent(&self, file_path: &str) -> Option<f32> {
        self.lookup(file_path).map(|f| f.summary.percent_covered)
    }

    /// Coverage restricted to `[start, end]` for one file.
    pub fn for_range(&self, file_path: &str, start: u32, end: u32) -> Option<CoverageMetrics> {
        let file = self.lookup(file_path)?;
        let covered = file
            .executed_lines
            .iter()
            .filter(|l| **l >= start && **l <= end)
            .count() as u32;
        let missing = file
            .missing_lines
            .iter()
            .filter(|l| **l >= start && **l <= end)
            .count() as u32;
        let total = covered + missing;
        let percent = if total > 0 {
            covered as f32 / total as f32 * 100.0
        } else {
            // Range has no executable lines; fall back to the file summary.
            file.summary.percent_covered
        };
        Some(CoverageMetrics {
            percent,
            covered_lines: covered,
            missing_lines: missing,
        })
    }

    /// Report paths may be absolute or repo-relative; match by suffix.
    fn lookup(&self, file_path: &str) -> Option<&RawFile> {
        if let Some(found) = self.files.get(file_path) {
            return Some(found);
        }
        self.files
            .iter()
            .find(|(key, _)| key.ends_with(file_path) || file_path.ends_with(key.as_str()))
            .map(|(_, file)| file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"{
        "meta": {"version": "7.4"},
        "files": {
            "src/a.py": {
                "executed_lines": [1, 2, 3, 10, 11],
                "missing_lines": [12, 13],
                "summary": {"percent_covered": 71.4}
            }
        },
        "totals": {"percent_covered": 71.4}
    }"#;

    #[test]
    fn range_coverage_intersects_lines() {
        let report = CoverageReport::from_json(REPORT).unwrap();
        let metrics = report.for_range("src/a.py", 10, 13).unwrap();
        assert_eq!(metrics.covered_lines, 2);
        assert_eq!(metrics.missing_lines, 2);
        assert!((metrics.percent - 50.0).abs() < 1e-4);
    }

    #[test]
    fn range_without_executable_lines_uses_file_summary() {
        let report = CoverageReport::from_json(REPORT).unwrap();
        let metrics = report.for_range("src/a.py", 100, 120).unwrap();
        assert!((metrics.percent - 71.4).abs() < 1e-4);
    }

    #[test]
    fn path_matching_is_suffix_tolerant() {
        let report = CoverageReport::from_json(REPORT).unwrap();
        assert!(report.file_percent("a.py").is_some());
        assert!(report.file_percent("/repo/src/a.py").is_some());
        assert!(report.file_percent("other.py").is_none());
    }

    #[test]
    fn malformed_report_is_none() {
        assert!(CoverageReport::from_json("not json").is_none());
    }
}
