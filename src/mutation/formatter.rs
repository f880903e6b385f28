//! Indentation handling and external formatter shell-out.

use std::path::Path;
use std::process::Command;

/// Lines sampled when detecting a file's indent unit.
const MAX_SAMPLE_LINES: usize = 100;

pub const DEFAULT_INDENT: &str = "    ";

/// Detect the indent unit of a file: tab, two spaces, or four spaces.
pub fn detect_indent_unit(source: &str) -> String {
    let mut tab_count = 0usize;
    let mut space_widths: Vec<usize> = Vec::new();

    for line in source.lines().take(MAX_SAMPLE_LINES) {
        if line.trim().is_empty() {
            continue;
        }
        let indent = &line[..line.len() - line.trim_start().len()];
        if indent.is_empty() {
            continue;
        }
        if indent.contains('\t') {
            tab_count += 1;
        } else {
            space_widths.push(indent.len());
        }
    }

    if tab_count > space_widths.len() {
        return "\t".to_string();
    }
    if space_widths.is_empty() {
        return DEFAULT_INDENT.to_string();
    }

    // Most common width decides; >= 4 means four-space, >= 2 two-space.
    let mut counts = std::collections::HashMap::new();
    for width in space_widths {
        *counts.entry(width).or_insert(0usize) += 1;
    }
    let most_common = counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(width, _)| width)
        .unwrap_or(4);
    if most_common >= 4 {
        DEFAULT_INDENT.to_string()
    } else {
        "  ".to_string()
    }
}

/// Strip the common leading indent of a block and re-indent it to the
/// target level using the file's unit. Blank lines stay blank.
pub fn reindent_block(code: &str, indent_unit: &str, target_level: usize) -> String {
    let lines: Vec<&str> = code.lines().collect();

    let min_indent = lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);

    let unit_width = indent_unit.len().max(1);
    let target_indent = indent_unit.repeat(target_level);

    lines
        .iter()
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else {
                let current = line.len() - line.trim_start().len();
                let relative_levels = current.saturating_sub(min_indent) / unit_width;
                format!(
                    "{target_indent}{}{}",
                    indent_unit.repeat(relative_levels),
                    line.trim_start()
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Drop the indentation of the first line only.
///
/// Replacement splices land immediately after the original line's indent,
/// so the first line of the block must arrive bare while the rest keep
/// their computed indentation.
pub fn strip_first_line_indent(code: &str) -> String {
    let mut lines = code.lines();
    let first = lines.next().unwrap_or("").trim_start().to_string();
    let rest: Vec<&str> = lines.collect();
    if rest.is_empty() {
        first
    } else {
        format!("{first}\n{}", rest.join("\n"))
    }
}

/// Run the configured external formatter on a file. Best-effort: a
/// missing binary or nonzero exit is logged, never fatal.
pub fn run_external_formatter(command: &[String], file_path: &Path) -> bool {
    let Some((program, args)) = command.split_first() else {
        return false;
    };
    match Command::new(program).args(args).arg(file_path).output() {
        Ok(output) if output.status.success() => {
            tracing::debug!("formatted {} with {program}", file_path.display());
            true
        }
        Ok(output) => {
            tracing::debug!(
                "formatter {program} failed on {}: {}",
                file_path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
            false
        }
        Err(e) => {
            tracing::debug!("formatter {program} unavailable: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_four_space_indent() {
        let source = "def f():\n    a = 1\n    if a:\n        b = 2\n";
        assert_eq!(detect_indent_unit(source), "    ");
    }

    #[test]
    fn detects_two_space_indent() {
        let source = "function f() {\n  const a = 1;\n  if (a) {\n    b();\n  }\n}\n";
        assert_eq!(detect_indent_unit(source), "  ");
    }

    #[test]
    fn detects_tabs() {
        let source = "def f():\n\ta = 1\n\tif a:\n\t\tb = 2\n";
        assert_eq!(detect_indent_unit(source), "\t");
    }

    #[test]
    fn flat_file_defaults_to_four_spaces() {
        assert_eq!(detect_indent_unit("x = 1\ny = 2\n"), DEFAULT_INDENT);
    }

    #[test]
    fn reindent_strips_common_prefix_and_applies_target() {
        let block = "        def m(self):\n            return 1";
        let result = reindent_block(block, "    ", 1);
        assert_eq!(result, "    def m(self):\n        return 1");
    }

    #[test]
    fn reindent_to_top_level() {
        let block = "    def f():\n        pass";
        let result = reindent_block(block, "    ", 0);
        assert_eq!(result, "def f():\n    pass");
    }

    #[test]
    fn blank_lines_stay_blank() {
        let block = "a = 1\n\nb = 2";
        let result = reindent_block(block, "    ", 1);
        assert_eq!(result, "    a = 1\n\n    b = 2");
    }

    #[test]
    fn first_line_indent_stripped_for_splicing() {
        let block = "    def m(self):\n        return 1";
        assert_eq!(
            strip_first_line_indent(block),
            "def m(self):\n        return 1"
        );
        assert_eq!(strip_first_line_indent("plain"), "plain");
    }
}
