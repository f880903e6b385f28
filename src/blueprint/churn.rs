//! Git churn metrics per symbol line range.
//!
//! Uses `git blame --porcelain` over the symbol's range to count distinct
//! commits, then filters to the last seven days for the edit frequency.
//! Best-effort: any git failure yields no overlay.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;

const WEEK_SECONDS: i64 = 7 * 24 * 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChurnMetrics {
    /// Distinct commits touching the range, all time.
    pub commit_count: u32,
    /// Distinct commits in the last 7 days.
    pub recent_commits: u32,
    /// Edits per week; currently the 7-day commit count.
    pub edit_frequency: f32,
    /// Unix seconds of the newest commit in range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_commit_time: Option<i64>,
}

pub struct ChurnAnalyzer {
    project_root: PathBuf,
}

impl ChurnAnalyzer {
    pub fn new(project_root: &Path) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
        }
    }

    pub fn analyze(&self, file_path: &str, start: u32, end: u32) -> Option<ChurnMetrics> {
        let output = Command::new("git")
            .args([
                "blame",
                "--porcelain",
                "-L",
                &format!("{start},{end}"),
                "--",
                file_path,
            ])
            .current_dir(&self.project_root)
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let text = String::from_utf8_lossy(&output.stdout);
        Some(parse_blame_porcelain(&text, now_unix()))
    }
}

/// Pull commit hashes and committer times out of porcelain blame output.
pub fn parse_blame_porcelain(text: &str, now: i64) -> ChurnMetrics {
    let mut commits: HashSet<&str> = HashSet::new();
    let mut recent: HashSet<&str> = HashSet::new();
    let mut last_time: Option<i64> = None;
    let mut current_commit: Option<&str> = None;

    for line in text.lines() {
        // Header lines start with a 40-hex hash.
        if line.len() >= 40 && line.as_bytes()[..40].iter().all(u8::is_ascii_hexdigit) {
            let hash = &line[..40];
            current_commit = Some(hash);
            commits.insert(hash);
        } else if let Some(time_str) = line.strip_prefix("committer-time ") {
            if let Ok(time) = time_str.trim().parse::<i64>() {
                last_time = Some(last_time.map_or(time, |t| t.max(time)));
                if now - time <= WEEK_SECONDS {
                    if let Some(hash) = current_commit {
                        recent.insert(hash);
                    }
                }
            }
        }
    }

    ChurnMetrics {
        commit_count: commits.len() as u32,
        recent_commits: recent.len() as u32,
        edit_frequency: recent.len() as f32,
        last_commit_time: last_time,
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
