//! PID file management.
//!
//! One PID file per project, named by a hash of the project path, living
//! in the OS temp directory so stale workspaces cannot collide.

use crate::error::{CerberusError, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// `$TMPDIR/cerberus-<hash8>.pid` for the given project.
pub fn pid_file_path(project_path: &Path) -> PathBuf {
    let canonical = project_path
        .canonicalize()
        .unwrap_or_else(|_| project_path.to_path_buf());
    let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
    let hash: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    std::env::temp_dir().join(format!("cerberus-{hash}.pid"))
}

pub fn write_pid_file(pid_file: &Path, pid: u32) -> Result<()> {
    std::fs::write(pid_file, pid.to_string()).map_err(|e| CerberusError::FileWrite {
        path: pid_file.to_path_buf(),
        source: e,
    })
}

pub fn read_pid_file(pid_file: &Path) -> Option<u32> {
    std::fs::read_to_string(pid_file)
        .ok()?
        .trim()
        .parse()
        .ok()
}

pub fn remove_pid_file(pid_file: &Path) {
    if let Err(e) = std::fs::remove_file(pid_file) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("could not remove pid file {}: {e}", pid_file.display());
        }
    }
}

/// Is the recorded process still alive?
pub fn process_alive(pid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        Path::new(&format!("/proc/{pid}")).exists()
    }
    #[cfg(not(target_os = "linux"))]
    {
        // Conservative elsewhere: trust the pid file and let the health
        // probe decide.
        let _ = pid;
        true
    }
}

/// A live daemon per the pid file (the health probe is the real check).
pub fn daemon_pid_if_running(project_path: &Path) -> Option<u32> {
    let pid_file = pid_file_path(project_path);
    let pid = read_pid_file(&pid_file)?;
    if process_alive(pid) {
        Some(pid)
    } else {
        remove_pid_file(&pid_file);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn pid_path_is_stable_per_project() {
        let temp = TempDir::new().unwrap();
        let a = pid_file_path(temp.path());
        let b = pid_file_path(temp.path());
        assert_eq!(a, b);
        assert!(a.to_string_lossy().contains("cerberus-"));

        let other = TempDir::new().unwrap();
        assert_ne!(a, pid_file_path(other.path()));
    }

    #[test]
    fn pid_file_round_trip() {
        let temp = TempDir::new().unwrap();
        let pid_file = temp.path().join("test.pid");
        write_pid_file(&pid_file, 12345).unwrap();
        assert_eq!(read_pid_file(&pid_file), Some(12345));
        remove_pid_file(&pid_file);
        assert!(read_pid_file(&pid_file).is_none());
    }

    #[test]
    fn current_process_is_alive() {
        assert!(process_alive(std::process::id()));
    }
}
