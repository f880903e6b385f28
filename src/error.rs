//! Error types for the code intelligence engine.
//!
//! Structured errors using thiserror, one enum per failure family, plus a
//! crate-level aggregate that maps every kind onto a process exit code.

use std::path::PathBuf;
use thiserror::Error;

/// Process exit codes reported by the CLI.
///
/// 0 success, 1 operational failure, 2 blocked by guard or validation,
/// 3 index missing or corrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    OperationalError = 1,
    Blocked = 2,
    IndexUnavailable = 3,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Main error type for index and query operations.
#[derive(Error, Debug)]
pub enum CerberusError {
    #[error("Failed to read file '{}': {source}", path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file '{}': {source}", path.display())]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {language} file '{}': {reason}", path.display())]
    Parse {
        path: PathBuf,
        language: String,
        reason: String,
    },

    #[error("Store operation failed during {operation}: {cause}")]
    Store { operation: String, cause: String },

    #[error("Symbol '{name}' not found. Has the file been indexed?")]
    SymbolNotFound { name: String },

    #[error("File '{path}' not found in index")]
    FileNotFound { path: String },

    #[error("Index not found at '{}'. Run a scan first.", path.display())]
    IndexMissing { path: PathBuf },

    #[error("Index appears to be corrupted: {reason}")]
    IndexCorrupted { reason: String },

    #[error("File modified externally: {}", path.display())]
    Conflict { path: PathBuf },

    #[error("Edit produced invalid syntax in '{}': {}", path.display(), errors.join("; "))]
    Validation { path: PathBuf, errors: Vec<String> },

    #[error("{message}")]
    Guard {
        message: String,
        referents: Vec<String>,
    },

    #[error("Split-store divergence: {reason}")]
    Integrity { reason: String },

    #[error("Could not resolve {what}: {reason}")]
    Resolution { what: String, reason: String },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Daemon error: {reason}")]
    Daemon { reason: String },

    #[error("{0}")]
    General(String),
}

impl CerberusError {
    /// Exit code this error maps to when it reaches the CLI boundary.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Guard { .. } | Self::Validation { .. } => ExitCode::Blocked,
            Self::IndexMissing { .. } | Self::IndexCorrupted { .. } => ExitCode::IndexUnavailable,
            _ => ExitCode::OperationalError,
        }
    }

    /// Remediation hints printed alongside the operational message.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::IndexMissing { .. } => vec![
                "Run 'cerberus scan <root>' to build the index",
                "Check that --index points at the right directory",
            ],
            Self::IndexCorrupted { .. } => vec![
                "Run 'cerberus scan <root> --force' to rebuild from scratch",
                "Check for disk errors or filesystem corruption",
            ],
            Self::Conflict { .. } => vec![
                "The file changed under us; no write was performed",
                "Re-run the edit against the current file contents",
            ],
            Self::Validation { .. } => vec![
                "The file was restored from backup; nothing was changed",
                "Fix the syntax in the replacement code and retry",
            ],
            Self::Guard { .. } => vec![
                "Pass --force to override the reference guard",
                "Update the referencing sites first, then retry",
            ],
            Self::Store { .. } => vec![
                "The transaction was rolled back; the index is consistent",
                "Try the operation again, it may succeed on retry",
            ],
            Self::FileRead { .. } => vec![
                "Check that the file exists and you have read permissions",
            ],
            _ => vec![],
        }
    }

    /// Machine-mode rendition with stable field names.
    pub fn to_json(&self) -> serde_json::Value {
        let kind = match self {
            Self::Parse { .. } => "parse_error",
            Self::Store { .. } => "store_error",
            Self::SymbolNotFound { .. } | Self::FileNotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::Validation { .. } => "validation_error",
            Self::Guard { .. } => "guard_error",
            Self::Integrity { .. } => "integrity_error",
            Self::Resolution { .. } => "resolution_error",
            Self::IndexMissing { .. } | Self::IndexCorrupted { .. } => "index_unavailable",
            Self::Config { .. } => "config_error",
            _ => "error",
        };
        let mut value = serde_json::json!({
            "error": kind,
            "message": self.to_string(),
            "hints": self.recovery_suggestions(),
        });
        if let Self::Guard { referents, .. } = self {
            value["referents"] = serde_json::json!(referents);
        }
        value
    }
}

impl From<rusqlite::Error> for CerberusError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store {
            operation: "sqlite".to_string(),
            cause: e.to_string(),
        }
    }
}

impl From<std::io::Error> for CerberusError {
    fn from(e: std::io::Error) -> Self {
        Self::General(e.to_string())
    }
}

impl From<serde_json::Error> for CerberusError {
    fn from(e: serde_json::Error) -> Self {
        Self::General(format!("serialization error: {e}"))
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CerberusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_and_validation_map_to_blocked() {
        let guard = CerberusError::Guard {
            message: "blocked".into(),
            referents: vec!["b.py".into()],
        };
        assert_eq!(guard.exit_code(), ExitCode::Blocked);

        let validation = CerberusError::Validation {
            path: PathBuf::from("a.py"),
            errors: vec!["syntax error at line 3".into()],
        };
        assert_eq!(validation.exit_code(), ExitCode::Blocked);
    }

    #[test]
    fn missing_index_maps_to_exit_three() {
        let err = CerberusError::IndexMissing {
            path: PathBuf::from(".cerberus/index"),
        };
        assert_eq!(err.exit_code().code(), 3);
        assert!(!err.recovery_suggestions().is_empty());
    }

    #[test]
    fn guard_json_carries_referents() {
        let err = CerberusError::Guard {
            message: "referenced elsewhere".into(),
            referents: vec!["b.py".into(), "c.py".into()],
        };
        let json = err.to_json();
        assert_eq!(json["error"], "guard_error");
        assert_eq!(json["referents"].as_array().unwrap().len(), 2);
    }
}
