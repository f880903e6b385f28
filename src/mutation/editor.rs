//! Byte-range editing with backup, optimistic locking, and atomic writes.

use crate::error::{CerberusError, Result};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Line-ending style detected from the original file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
}

impl LineEnding {
    pub fn detect(content: &str) -> Self {
        if content.contains("\r\n") {
            Self::CrLf
        } else {
            Self::Lf
        }
    }

    pub fn normalize(self, content: &str) -> String {
        let unified = content.replace("\r\n", "\n");
        match self {
            Self::Lf => unified,
            Self::CrLf => unified.replace('\n', "\r\n"),
        }
    }
}

/// File state captured at read time for optimistic locking.
#[derive(Debug, Clone, PartialEq)]
pub struct FileState {
    pub mtime: f64,
    pub content_hash: String,
}

pub fn capture_state(path: &Path) -> Result<FileState> {
    let metadata = std::fs::metadata(path).map_err(|e| CerberusError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    let bytes = std::fs::read(path).map_err(|e| CerberusError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(FileState {
        mtime,
        content_hash: hex_digest(&bytes),
    })
}

/// Abort if the file changed since `expected` was captured. Nothing has
/// been written at this point, so there is nothing to restore.
pub fn check_unchanged(path: &Path, expected: &FileState) -> Result<()> {
    let current = capture_state(path)?;
    if current.content_hash != expected.content_hash || current.mtime != expected.mtime {
        return Err(CerberusError::Conflict {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

fn hex_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

pub struct CodeEditor {
    backup_dir: PathBuf,
    backup_enabled: bool,
}

impl CodeEditor {
    pub fn new(backup_dir: PathBuf, backup_enabled: bool) -> Self {
        Self {
            backup_dir,
            backup_enabled,
        }
    }

    /// Copy the file into the backup directory with a timestamped name.
    pub fn create_backup(&self, path: &Path) -> Result<Option<PathBuf>> {
        if !self.backup_enabled {
            return Ok(None);
        }
        std::fs::create_dir_all(&self.backup_dir)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S%.3f");
        let backup_path = self.backup_dir.join(format!("{name}.{stamp}.backup"));
        std::fs::copy(path, &backup_path).map_err(|e| CerberusError::FileWrite {
            path: backup_path.clone(),
            source: e,
        })?;
        Ok(Some(backup_path))
    }

    pub fn restore_backup(&self, backup_path: &Path, target: &Path) -> Result<()> {
        std::fs::copy(backup_path, target).map_err(|e| CerberusError::FileWrite {
            path: target.to_path_buf(),
            source: e,
        })?;
        tracing::info!("restored {} from backup", target.display());
        Ok(())
    }

    /// Replace `[start_byte, end_byte)` with `new_code`, preserving the
    /// file's line-ending style.
    pub fn splice(
        original: &str,
        start_byte: usize,
        end_byte: usize,
        new_code: &str,
    ) -> Result<String> {
        if start_byte > end_byte || end_byte > original.len() {
            return Err(CerberusError::General(format!(
                "byte range {start_byte}..{end_byte} out of bounds for {} bytes",
                original.len()
            )));
        }
        let ending = LineEnding::detect(original);
        let spliced = format!(
            "{}{}{}",
            &original[..start_byte],
            new_code,
            &original[end_byte..]
        );
        Ok(ending.normalize(&spliced))
    }

    /// Write atomically: temp file in the same directory, flush, rename.
    pub fn atomic_write(&self, path: &Path, content: &str) -> Result<()> {
        let dir = path.parent().unwrap_or(Path::new("."));
        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(content.as_bytes())?;
        temp.flush()?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| CerberusError::FileWrite {
            path: path.to_path_buf(),
            source: e.error,
        })?;
        Ok(())
    }
}

/// Collapse runs of more than two blank lines and strip trailing
/// whitespace, then guarantee exactly one trailing newline.
pub fn apply_style_fixups(content: &str) -> String {
    let ending = LineEnding::detect(content);
    let unified = content.replace("\r\n", "\n");

    let mut out: Vec<&str> = Vec::new();
    let mut blank_run = 0;
    for line in unified.lines() {
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            blank_run += 1;
            if blank_run > 2 {
                continue;
            }
            out.push("");
        } else {
            blank_run = 0;
            out.push(trimmed);
        }
    }
    // Drop trailing blank lines, then add the single final newline.
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    let mut result = out.join("\n");
    result.push('\n');
    ending.normalize(&result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn splice_replaces_exact_byte_range() {
        let original = "def a():\n    pass\n\ndef b():\n    pass\n";
        let start = original.find("def b").unwrap();
        let result =
            CodeEditor::splice(original, start, original.len(), "def b():\n    return 2\n")
                .unwrap();
        assert!(result.starts_with("def a():"));
        assert!(result.ends_with("return 2\n"));
    }

    #[test]
    fn splice_rejects_out_of_bounds() {
        assert!(CodeEditor::splice("abc", 2, 10, "x").is_err());
        assert!(CodeEditor::splice("abc", 3, 2, "x").is_err());
    }

    #[test]
    fn crlf_style_is_preserved() {
        let original = "line1\r\nline2\r\n";
        let result = CodeEditor::splice(original, 0, 5, "first").unwrap();
        assert!(result.contains("first\r\nline2"));
    }

    #[test]
    fn optimistic_lock_detects_external_change() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("f.py");
        fs::write(&path, "x = 1\n").unwrap();

        let state = capture_state(&path).unwrap();
        check_unchanged(&path, &state).unwrap();

        fs::write(&path, "x = 2\n").unwrap();
        let err = check_unchanged(&path, &state).unwrap_err();
        assert!(matches!(err, CerberusError::Conflict { .. }));
    }

    #[test]
    fn backup_contains_pre_write_bytes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("f.py");
        fs::write(&path, "original contents\n").unwrap();

        let editor = CodeEditor::new(temp.path().join("backups"), true);
        let backup = editor.create_backup(&path).unwrap().unwrap();
        assert_eq!(
            fs::read_to_string(&backup).unwrap(),
            "original contents\n"
        );
    }

    #[test]
    fn atomic_write_replaces_content() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("f.py");
        fs::write(&path, "old\n").unwrap();

        let editor = CodeEditor::new(temp.path().join("backups"), false);
        editor.atomic_write(&path, "new\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new\n");
    }

    #[test]
    fn style_fixups_normalize_whitespace() {
        let messy = "def f():   \n    pass\n\n\n\n\ndef g():\n    pass";
        let fixed = apply_style_fixups(messy);
        assert!(fixed.contains("def f():\n"));
        assert!(!fixed.contains("   \n"));
        assert!(!fixed.contains("\n\n\n"));
        assert!(fixed.ends_with("pass\n"));
        assert!(!fixed.ends_with("\n\n"));
    }
}
