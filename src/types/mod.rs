//! Core data records for the index.
//!
//! Everything the store persists is defined here: files, symbols, imports,
//! calls, type information, and resolved symbol references. These types are
//! plain serde structs; all behavior lives in the components that produce
//! and consume them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Kind of a named, locatable code entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Class,
    Method,
    Variable,
    Interface,
    Enum,
    Struct,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Method => "method",
            Self::Variable => "variable",
            Self::Interface => "interface",
            Self::Enum => "enum",
            Self::Struct => "struct",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "function" => Some(Self::Function),
            "class" => Some(Self::Class),
            "method" => Some(Self::Method),
            "variable" => Some(Self::Variable),
            "interface" => Some(Self::Interface),
            "enum" => Some(Self::Enum),
            "struct" => Some(Self::Struct),
            _ => None,
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a use-site relates to a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    MethodCall,
    InstanceOf,
    Inherits,
    TypeAnnotation,
    ReturnType,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MethodCall => "method_call",
            Self::InstanceOf => "instance_of",
            Self::Inherits => "inherits",
            Self::TypeAnnotation => "type_annotation",
            Self::ReturnType => "return_type",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "method_call" => Some(Self::MethodCall),
            "instance_of" => Some(Self::InstanceOf),
            "inherits" => Some(Self::Inherits),
            "type_annotation" => Some(Self::TypeAnnotation),
            "return_type" => Some(Self::ReturnType),
            _ => None,
        }
    }
}

/// Resolution confidence ladder. Higher strategies win ties.
pub mod confidence {
    pub const IMPORT_TRACE: f32 = 1.0;
    pub const TYPE_ANNOTATION: f32 = 0.9;
    pub const CLASS_INSTANTIATION: f32 = 0.85;
    pub const PARAMETER_INFERENCE: f32 = 0.7;
    pub const HEURISTIC: f32 = 0.5;

    pub const INHERITS_SAME_FILE: f32 = 1.0;
    pub const INHERITS_IMPORTED: f32 = 0.95;
    pub const INHERITS_EXTERNAL: f32 = 0.7;
}

/// A file known to the index, keyed by repo-relative `path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub abs_path: String,
    pub size: u64,
    /// Seconds since epoch, fractional.
    pub last_modified: f64,
}

/// A named code entity with its location and declaration metadata.
///
/// Keyed by `(file_path, name, start_line, kind, parent_class)`. Byte
/// offsets cover the full declaration and are what the mutation engine
/// splices against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SymbolKind,
    pub file_path: String,
    /// 1-indexed, inclusive.
    pub start_line: u32,
    pub end_line: u32,
    pub start_byte: usize,
    pub end_byte: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_class: Option<String>,
}

impl Symbol {
    /// Stable identity used for dedup across retrieval sources.
    pub fn stable_id(&self) -> String {
        format!("{}:{}:{}", self.file_path, self.name, self.start_line)
    }

    pub fn line_count(&self) -> u32 {
        self.end_line.saturating_sub(self.start_line) + 1
    }
}

/// A textual import statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Import {
    pub module: String,
    pub file_path: String,
    pub line: u32,
}

/// An import statement linked to the symbols it provides and, once
/// resolved, to their definition site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportLink {
    pub importer_file: String,
    pub imported_module: String,
    #[serde(default)]
    pub imported_symbols: Vec<String>,
    pub import_line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition_symbol: Option<String>,
}

/// A structural call without receiver information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub caller_file: String,
    pub callee: String,
    pub line: u32,
}

/// A `receiver.method(...)` call with the raw receiver token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub caller_file: String,
    pub line: u32,
    pub receiver: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiver_type: Option<String>,
}

/// Type information for one typed binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_annotation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inferred_type: Option<String>,
    pub file_path: String,
    pub line: u32,
}

/// A resolved, confidence-scored edge from a use-site to a definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolReference {
    pub source_file: String,
    pub source_line: u32,
    pub source_symbol: String,
    pub reference_type: ReferenceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_method: Option<String>,
}

/// Row linking a stored symbol to its vector in the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingMetadata {
    pub symbol_id: i64,
    pub vector_store_id: i64,
    pub name: String,
    pub file_path: String,
    pub model: String,
}

/// Append-only write-efficiency record for one mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffMetric {
    pub timestamp: f64,
    pub operation: String,
    pub file_path: String,
    pub lines_changed: u32,
    pub lines_total: u32,
    pub write_efficiency: f32,
    pub tokens_saved: i64,
}

/// What happened to a range of lines in a diff hunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
}

/// A range of changed lines, 1-indexed inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
    pub change_type: ChangeType,
}

impl LineRange {
    /// Whether this range overlaps `[start, end]` (both inclusive).
    pub fn overlaps(&self, start: u32, end: u32) -> bool {
        self.start <= end && start <= self.end
    }
}

/// A modified file with its changed line ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifiedFile {
    pub path: String,
    #[serde(default)]
    pub changed_lines: Vec<LineRange>,
    #[serde(default)]
    pub affected_symbols: Vec<String>,
}

/// Changes detected from git diff or filesystem monitoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileChange {
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub modified: Vec<ModifiedFile>,
    #[serde(default)]
    pub deleted: Vec<String>,
    #[serde(default)]
    pub timestamp: f64,
}

impl FileChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    pub fn affected_count(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }

    /// Every path touched by this change set.
    pub fn all_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.added.clone();
        paths.extend(self.modified.iter().map(|m| m.path.clone()));
        paths.extend(self.deleted.clone());
        paths
    }
}

/// Aggregate statistics for an index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_files: usize,
    pub total_symbols: usize,
    pub symbol_kinds: HashMap<String, usize>,
    pub average_symbols_per_file: f32,
}

/// A slice of code around a symbol, padded for context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_kind_round_trips_through_str() {
        for kind in [
            SymbolKind::Function,
            SymbolKind::Class,
            SymbolKind::Method,
            SymbolKind::Variable,
            SymbolKind::Interface,
            SymbolKind::Enum,
            SymbolKind::Struct,
        ] {
            assert_eq!(SymbolKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(SymbolKind::parse("module"), None);
    }

    #[test]
    fn reference_kind_round_trips_through_str() {
        for kind in [
            ReferenceKind::MethodCall,
            ReferenceKind::InstanceOf,
            ReferenceKind::Inherits,
            ReferenceKind::TypeAnnotation,
            ReferenceKind::ReturnType,
        ] {
            assert_eq!(ReferenceKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn stable_id_is_file_name_line() {
        let symbol = Symbol {
            name: "foo".into(),
            kind: SymbolKind::Function,
            file_path: "src/a.py".into(),
            start_line: 10,
            end_line: 20,
            start_byte: 100,
            end_byte: 400,
            signature: None,
            return_type: None,
            parameters: None,
            parent_class: None,
        };
        assert_eq!(symbol.stable_id(), "src/a.py:foo:10");
        assert_eq!(symbol.line_count(), 11);
    }

    #[test]
    fn line_range_overlap() {
        let range = LineRange {
            start: 10,
            end: 15,
            change_type: ChangeType::Modified,
        };
        assert!(range.overlaps(15, 30));
        assert!(range.overlaps(1, 10));
        assert!(range.overlaps(12, 13));
        assert!(!range.overlaps(16, 30));
        assert!(!range.overlaps(1, 9));
    }

    #[test]
    fn confidence_ladder_is_ordered() {
        assert!(confidence::IMPORT_TRACE > confidence::TYPE_ANNOTATION);
        assert!(confidence::TYPE_ANNOTATION > confidence::CLASS_INSTANTIATION);
        assert!(confidence::CLASS_INSTANTIATION > confidence::PARAMETER_INFERENCE);
        assert!(confidence::PARAMETER_INFERENCE > confidence::HEURISTIC);
    }

    #[test]
    fn symbol_kind_serializes_lowercase() {
        let json = serde_json::to_string(&SymbolKind::Class).unwrap();
        assert_eq!(json, "\"class\"");
        let json = serde_json::to_string(&ReferenceKind::MethodCall).unwrap();
        assert_eq!(json, "\"method_call\"");
    }
}
