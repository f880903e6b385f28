//! Import injection.
//!
//! When new code references a symbol the file does not import yet, an
//! import line can be added after the existing import block. Python and
//! ES-module syntaxes are supported; anything else is left alone.

use crate::parsing::Language;

/// Whether `module` (or one of `symbols`) is already imported in `source`.
pub fn has_import(source: &str, module: &str, symbols: &[&str]) -> bool {
    for line in source.lines() {
        let trimmed = line.trim();
        let is_import_line = trimmed.starts_with("import ")
            || trimmed.starts_with("from ")
            || trimmed.starts_with("import{")
            || (trimmed.starts_with("import") && trimmed.contains(" from "));
        if !is_import_line {
            continue;
        }
        if trimmed.contains(module) {
            return true;
        }
        if symbols.iter().any(|s| trimmed.contains(s)) {
            return true;
        }
    }
    false
}

/// Render the import statement for the language.
pub fn render_import(language: Language, module: &str, symbols: &[&str]) -> String {
    match language {
        Language::Python => {
            if symbols.is_empty() {
                format!("import {module}")
            } else {
                format!("from {module} import {}", symbols.join(", "))
            }
        }
        Language::JavaScript | Language::TypeScript => {
            if symbols.is_empty() {
                format!("import '{module}';")
            } else {
                format!("import {{ {} }} from '{module}';", symbols.join(", "))
            }
        }
    }
}

/// Module specifier that imports `definition_file` from `importer_file`.
///
/// Python turns the path into a dotted module; JS/TS produce a relative
/// specifier without extension.
pub fn module_name_for(
    definition_file: &str,
    importer_file: &str,
    language: Language,
) -> Option<String> {
    match language {
        Language::Python => {
            let trimmed = definition_file
                .strip_suffix(".py")
                .or_else(|| definition_file.strip_suffix(".pyi"))?;
            Some(trimmed.replace('/', "."))
        }
        Language::JavaScript | Language::TypeScript => {
            let importer_dir = std::path::Path::new(importer_file).parent()?;
            let target = std::path::Path::new(definition_file);
            let stem = target.with_extension("");
            let relative = stem.strip_prefix(importer_dir).ok().map(|p| {
                format!("./{}", p.to_string_lossy().replace('\\', "/"))
            });
            relative.or_else(|| Some(format!("./{}", stem.to_string_lossy().replace('\\', "/"))))
        }
    }
}

/// Insert an import after the last existing import (or at the top, after
/// any shebang/docstring block). Returns the new source, or None if the
/// import already exists.
pub fn inject_import(
    source: &str,
    language: Language,
    module: &str,
    symbols: &[&str],
) -> Option<String> {
    if has_import(source, module, symbols) {
        return None;
    }
    let statement = render_import(language, module, symbols);
    let lines: Vec<&str> = source.lines().collect();

    // After the last import line, if any.
    let mut insert_at = 0usize;
    for (index, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("import ") || trimmed.starts_with("from ") {
            insert_at = index + 1;
        }
    }
    // Otherwise skip a leading shebang or encoding comment.
    if insert_at == 0 {
        while insert_at < lines.len() && lines[insert_at].starts_with("#!") {
            insert_at += 1;
        }
    }

    let mut out: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    out.insert(insert_at, statement);
    let mut joined = out.join("\n");
    if source.ends_with('\n') {
        joined.push('\n');
    }
    Some(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_import_lands_after_import_block() {
        let source = "import os\nimport sys\n\ndef f():\n    pass\n";
        let result = inject_import(source, Language::Python, "pathlib", &["Path"]).unwrap();
        let lines: Vec<&str> = result.lines().collect();
        assert_eq!(lines[2], "from pathlib import Path");
    }

    #[test]
    fn existing_import_is_not_duplicated() {
        let source = "from pathlib import Path\n";
        assert!(inject_import(source, Language::Python, "pathlib", &["Path"]).is_none());
    }

    #[test]
    fn file_without_imports_gets_import_at_top() {
        let source = "def f():\n    pass\n";
        let result = inject_import(source, Language::Python, "os", &[]).unwrap();
        assert!(result.starts_with("import os\n"));
    }

    #[test]
    fn javascript_named_import_renders() {
        assert_eq!(
            render_import(Language::TypeScript, "./shape", &["Shape", "Circle"]),
            "import { Shape, Circle } from './shape';"
        );
    }

    #[test]
    fn shebang_stays_first() {
        let source = "#!/usr/bin/env python\nx = 1\n";
        let result = inject_import(source, Language::Python, "os", &[]).unwrap();
        let lines: Vec<&str> = result.lines().collect();
        assert_eq!(lines[0], "#!/usr/bin/env python");
        assert_eq!(lines[1], "import os");
    }
}
