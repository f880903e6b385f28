//! Cross-file type inference at a point.
//!
//! Given `(variable, file, line)`, try in order: the nearest preceding
//! type annotation, the nearest preceding instance_of reference, and the
//! import table. First hit wins; each carries its strategy's confidence.

use crate::error::Result;
use crate::parsing::extract_base_type;
use crate::storage::SqliteStore;
use crate::types::{ReferenceKind, confidence};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct InferredType {
    pub type_name: String,
    pub method: String,
    pub confidence: f32,
    pub definition_file: Option<String>,
}

/// Infer the type of `variable` as visible at `file:line`.
pub fn infer_type(
    store: &SqliteStore,
    variable: &str,
    file: &str,
    line: u32,
) -> Result<Option<InferredType>> {
    // 1. Nearest annotation at or before the line.
    let mut best_annotation: Option<(u32, String)> = None;
    for info in store.query_type_infos(Some(file))? {
        if info.name == variable && info.line <= line {
            if let Some(annotation) = &info.type_annotation {
                if best_annotation.as_ref().is_none_or(|(l, _)| info.line >= *l) {
                    best_annotation = Some((info.line, extract_base_type(annotation)));
                }
            }
        }
    }
    if let Some((_, type_name)) = best_annotation {
        return Ok(Some(InferredType {
            type_name,
            method: "type_annotation".into(),
            confidence: confidence::TYPE_ANNOTATION,
            definition_file: None,
        }));
    }

    // 2. Nearest instance_of reference at or before the line.
    let mut best_instance: Option<(u32, String, Option<String>)> = None;
    for reference in store.query_symbol_references(None, Some(file))? {
        if reference.reference_type == ReferenceKind::InstanceOf
            && reference.source_symbol == variable
            && reference.source_line <= line
        {
            if let Some(target_type) = &reference.target_type {
                if best_instance
                    .as_ref()
                    .is_none_or(|(l, _, _)| reference.source_line >= *l)
                {
                    best_instance = Some((
                        reference.source_line,
                        target_type.clone(),
                        reference.target_file.clone(),
                    ));
                }
            }
        }
    }
    if let Some((_, type_name, definition_file)) = best_instance {
        return Ok(Some(InferredType {
            type_name,
            method: "class_instantiation".into(),
            confidence: confidence::CLASS_INSTANTIATION,
            definition_file,
        }));
    }

    // 3. The variable is itself an imported symbol.
    for (_, link) in store.query_import_links()? {
        if link.importer_file == file
            && link.imported_symbols.iter().any(|s| s == variable)
            && link.definition_symbol.is_some()
        {
            return Ok(Some(InferredType {
                type_name: link.definition_symbol.unwrap(),
                method: "import_trace".into(),
                confidence: confidence::IMPORT_TRACE,
                definition_file: link.definition_file,
            }));
        }
    }

    Ok(None)
}
