//! Regex-based complexity metrics for a symbol's line range.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComplexityLevel {
    Low,
    Medium,
    High,
}

impl ComplexityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexityMetrics {
    /// Non-empty, non-comment lines.
    pub lines: u32,
    pub branches: u32,
    /// Cyclomatic complexity: branches + 1.
    pub complexity: u32,
    /// Maximum nesting depth relative to the symbol's base indent.
    pub nesting: u32,
    pub level: ComplexityLevel,
}

impl ComplexityMetrics {
    pub fn level_for(complexity: u32, lines: u32) -> ComplexityLevel {
        if complexity > 10 || lines > 100 {
            ComplexityLevel::High
        } else if complexity > 5 || lines > 50 {
            ComplexityLevel::Medium
        } else {
            ComplexityLevel::Low
        }
    }
}

fn branch_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            \bif\s | \belif\s | \belse\b | \bfor\s | \bwhile\s |
            \bexcept\b | \btry\b | \bcatch\b | \bcase\s |
            \band\b | \bor\b | && | \|\| | \?\s
        ",
        )
        .unwrap()
    })
}

pub struct ComplexityAnalyzer {
    project_root: PathBuf,
}

impl ComplexityAnalyzer {
    pub fn new(project_root: &Path) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
        }
    }

    /// Metrics for `file_path` lines `[start, end]`; None if unreadable.
    pub fn analyze(&self, file_path: &str, start: u32, end: u32) -> Option<ComplexityMetrics> {
        let source = std::fs::read_to_string(self.project_root.join(file_path)).ok()?;
        let lines: Vec<&str> = source.lines().collect();
        if lines.is_empty() || start == 0 {
            return None;
        }
        let start_idx = (start as usize - 1).min(lines.len() - 1);
        let end_idx = (end as usize).min(lines.len());
        let slice = &lines[start_idx..end_idx];
        Some(analyze_source(slice))
    }
}

pub fn analyze_source(lines: &[&str]) -> ComplexityMetrics {
    let mut code_lines = 0u32;
    let mut branches = 0u32;
    let mut max_nesting = 0u32;
    let mut base_indent: Option<u32> = None;

    for line in lines {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') || stripped.starts_with("//") {
            continue;
        }
        code_lines += 1;
        branches += branch_regex().find_iter(line).count() as u32;

        let indent = (line.len() - line.trim_start().len()) as u32;
        match base_indent {
            None => base_indent = Some(indent),
            Some(base) if indent >= base => {
                max_nesting = max_nesting.max((indent - base) / 4);
            }
            _ => {}
        }
    }

    let complexity = branches + 1;
    ComplexityMetrics {
        lines: code_lines,
        branches,
        complexity,
        nesting: max_nesting,
        level: ComplexityMetrics::level_for(complexity, code_lines),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn straight_line_code_is_low() {
        let lines: Vec<&str> = "def f():\n    a = 1\n    return a".lines().collect();
        let metrics = analyze_source(&lines);
        assert_eq!(metrics.branches, 0);
        assert_eq!(metrics.complexity, 1);
        assert_eq!(metrics.level, ComplexityLevel::Low);
    }

    #[test]
    fn branches_add_up() {
        let source = "def f(x):\n    if x and x > 1:\n        for i in range(x):\n            while i:\n                pass\n";
        let lines: Vec<&str> = source.lines().collect();
        let metrics = analyze_source(&lines);
        // if + and + for + while
        assert_eq!(metrics.branches, 4);
        assert_eq!(metrics.complexity, 5);
        assert!(metrics.nesting >= 3);
    }

    #[test]
    fn comments_and_blanks_do_not_count_as_lines() {
        let source = "def f():\n\n    # comment\n    return 1\n";
        let lines: Vec<&str> = source.lines().collect();
        let metrics = analyze_source(&lines);
        assert_eq!(metrics.lines, 2);
    }

    #[test]
    fn level_thresholds() {
        assert_eq!(ComplexityMetrics::level_for(1, 5), ComplexityLevel::Low);
        assert_eq!(ComplexityMetrics::level_for(7, 10), ComplexityLevel::Medium);
        assert_eq!(ComplexityMetrics::level_for(3, 60), ComplexityLevel::Medium);
        assert_eq!(ComplexityMetrics::level_for(15, 10), ComplexityLevel::High);
        assert_eq!(ComplexityMetrics::level_for(2, 150), ComplexityLevel::High);
    }
}
