//! Language parser adapters.
//!
//! One tree-sitter adapter per supported language, all producing the same
//! [`ParseRecord`]. Parsers are pure over `(path, source)` and never touch
//! the store. A file that cannot be parsed yields an empty record and a
//! diagnostic; it is never fatal.

mod javascript;
mod python;
mod typescript;

pub use javascript::JavaScriptParser;
pub use python::PythonParser;
pub use typescript::TypeScriptParser;

use crate::types::{Call, Import, ImportLink, MethodCall, Symbol, TypeInfo};
use std::fmt;
use std::path::Path;

/// Languages the engine can extract structure from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
}

impl Language {
    /// Dispatch by file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "py" | "pyi" => Some(Self::Python),
            "js" | "jsx" | "mjs" => Some(Self::JavaScript),
            "ts" | "tsx" => Some(Self::TypeScript),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
        }
    }

    /// The tree-sitter grammar for this language.
    pub fn grammar(&self) -> tree_sitter::Language {
        match self {
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything one parse extracts from a single file.
#[derive(Debug, Clone, Default)]
pub struct ParseRecord {
    pub symbols: Vec<Symbol>,
    pub imports: Vec<Import>,
    pub calls: Vec<Call>,
    pub method_calls: Vec<MethodCall>,
    pub type_infos: Vec<TypeInfo>,
    pub import_links: Vec<ImportLink>,
}

impl ParseRecord {
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
            && self.imports.is_empty()
            && self.calls.is_empty()
            && self.method_calls.is_empty()
            && self.type_infos.is_empty()
            && self.import_links.is_empty()
    }
}

/// Common interface for all language parsers.
pub trait LanguageParser: Send {
    /// Parse source code and extract every record kind in one pass.
    fn parse(&mut self, path: &str, source: &str) -> ParseRecord;

    /// The language this parser handles.
    fn language(&self) -> Language;
}

/// Create a parser for the given language.
pub fn parser_for(language: Language) -> Result<Box<dyn LanguageParser>, String> {
    match language {
        Language::Python => Ok(Box::new(PythonParser::new()?)),
        Language::JavaScript => Ok(Box::new(JavaScriptParser::new()?)),
        Language::TypeScript => Ok(Box::new(TypeScriptParser::new()?)),
    }
}

/// Parse a file's source, dispatching on extension.
///
/// Returns `None` for unsupported extensions. Parse failures produce an
/// empty record and a warning, never an error.
pub fn parse_source(path: &Path, source: &str) -> Option<ParseRecord> {
    let language = Language::from_path(path)?;
    let path_str = path.to_string_lossy();
    match parser_for(language) {
        Ok(mut parser) => Some(parser.parse(&path_str, source)),
        Err(e) => {
            tracing::warn!("failed to initialize {language} parser for '{path_str}': {e}");
            Some(ParseRecord::default())
        }
    }
}

/// Extract the raw text of a node.
pub(crate) fn node_text<'a>(node: tree_sitter::Node, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

/// First line of a declaration, used as its signature text.
pub(crate) fn signature_line(node: tree_sitter::Node, source: &str) -> String {
    let text = node_text(node, source);
    text.lines().next().unwrap_or("").trim_end().to_string()
}

/// Strip a module path or generic wrapper down to its base type name.
///
/// `List[int]` -> `List`, `Optional[MyClass]` -> `MyClass`,
/// `torch.optim.Adam` -> `Adam`.
pub(crate) fn extract_base_type(type_str: &str) -> String {
    let mut t = type_str.trim();
    if let Some(rest) = t.strip_prefix("->") {
        t = rest.trim();
    }
    if let Some(open) = t.find('[') {
        let container = &t[..open];
        if container == "Optional" || container == "Union" {
            if let Some(close) = t.rfind(']') {
                let inner = &t[open + 1..close];
                let first = inner.split(',').next().unwrap_or(inner).trim();
                return extract_base_type(first);
            }
        }
        return container.to_string();
    }
    match t.rsplit('.').next() {
        Some(last) => last.to_string(),
        None => t.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn language_from_extension() {
        assert_eq!(
            Language::from_path(&PathBuf::from("a.py")),
            Some(Language::Python)
        );
        assert_eq!(
            Language::from_path(&PathBuf::from("a.tsx")),
            Some(Language::TypeScript)
        );
        assert_eq!(
            Language::from_path(&PathBuf::from("a.jsx")),
            Some(Language::JavaScript)
        );
        assert_eq!(Language::from_path(&PathBuf::from("a.rb")), None);
        assert_eq!(Language::from_path(&PathBuf::from("Makefile")), None);
    }

    #[test]
    fn base_type_extraction() {
        assert_eq!(extract_base_type("List[int]"), "List");
        assert_eq!(extract_base_type("Optional[MyClass]"), "MyClass");
        assert_eq!(extract_base_type("Union[Foo, Bar]"), "Foo");
        assert_eq!(extract_base_type("torch.optim.Adam"), "Adam");
        assert_eq!(extract_base_type("-> str"), "str");
        assert_eq!(extract_base_type("Plain"), "Plain");
    }

    #[test]
    fn unsupported_extension_yields_none() {
        assert!(parse_source(&PathBuf::from("notes.txt"), "hello").is_none());
    }
}
