//! Type tracking and method-call resolution.
//!
//! Builds a `(file, variable) -> type` map from stored type information and
//! resolved imports, then turns method calls and instantiations into
//! confidence-scored symbol references.

use crate::error::Result;
use crate::parsing::extract_base_type;
use crate::storage::{SqliteStore, SymbolFilter};
use crate::types::{
    MethodCall, ReferenceKind, Symbol, SymbolKind, SymbolReference, TypeInfo, confidence,
};
use std::collections::HashMap;

pub struct TypeTracker {
    type_map: HashMap<(String, String), String>,
    symbols_by_name: HashMap<String, Vec<Symbol>>,
    method_calls: Vec<MethodCall>,
    type_infos: Vec<TypeInfo>,
    functions: Vec<Symbol>,
}

impl TypeTracker {
    pub fn new(store: &SqliteStore) -> Result<Self> {
        let mut type_map = HashMap::new();

        // Annotations beat inferred types when both exist for a binding.
        let type_infos = store.query_type_infos(None)?;
        for info in &type_infos {
            let key = (info.file_path.clone(), info.name.clone());
            if let Some(annotation) = &info.type_annotation {
                type_map.insert(key, extract_base_type(annotation));
            } else if let Some(inferred) = &info.inferred_type {
                type_map.entry(key).or_insert_with(|| extract_base_type(inferred));
            }
        }

        // An imported symbol is itself a usable type name in that file.
        for (_, link) in store.query_import_links()? {
            if let (Some(_), Some(definition_symbol)) =
                (&link.definition_file, &link.definition_symbol)
            {
                for imported in &link.imported_symbols {
                    type_map.insert(
                        (link.importer_file.clone(), imported.clone()),
                        definition_symbol.clone(),
                    );
                }
            }
        }

        let mut symbols_by_name: HashMap<String, Vec<Symbol>> = HashMap::new();
        let mut functions = Vec::new();
        for symbol in store.query_symbols(&SymbolFilter::default())? {
            if matches!(symbol.kind, SymbolKind::Function | SymbolKind::Method)
                && symbol.return_type.is_some()
            {
                functions.push(symbol.clone());
            }
            symbols_by_name
                .entry(symbol.name.clone())
                .or_default()
                .push(symbol);
        }

        Ok(Self {
            type_map,
            symbols_by_name,
            method_calls: store.query_method_calls()?,
            type_infos,
            functions,
        })
    }

    pub fn receiver_type(&self, file: &str, receiver: &str) -> Option<&String> {
        let key = (file.to_string(), receiver.to_string());
        if let Some(found) = self.type_map.get(&key) {
            return Some(found);
        }
        // Chained receivers like `self.engine` fall back to the base token.
        let base = receiver.split('.').next()?;
        if base != receiver {
            return self.type_map.get(&(file.to_string(), base.to_string()));
        }
        None
    }

    /// Resolve every stored method call against the type map.
    pub fn resolve_method_calls(&self) -> Vec<SymbolReference> {
        let mut references = Vec::new();
        for call in &self.method_calls {
            let Some(receiver_type) = self.receiver_type(&call.caller_file, &call.receiver) else {
                continue;
            };
            let Some(class_def) = self.best_class(receiver_type) else {
                continue;
            };

            // A method defined directly on the class wins; otherwise fall
            // back to the class itself at heuristic confidence.
            let direct_method = self
                .symbols_by_name
                .get(&call.method)
                .into_iter()
                .flatten()
                .filter(|s| {
                    s.kind == SymbolKind::Method
                        && s.parent_class.as_deref() == Some(class_def.name.as_str())
                })
                .min_by(|a, b| a.file_path.cmp(&b.file_path));

            let reference = match direct_method {
                Some(method) => SymbolReference {
                    source_file: call.caller_file.clone(),
                    source_line: call.line,
                    source_symbol: call.receiver.clone(),
                    reference_type: ReferenceKind::MethodCall,
                    target_file: Some(method.file_path.clone()),
                    target_symbol: Some(method.name.clone()),
                    target_type: Some(class_def.name.clone()),
                    confidence: confidence::TYPE_ANNOTATION,
                    resolution_method: Some("type_annotation".into()),
                },
                None => SymbolReference {
                    source_file: call.caller_file.clone(),
                    source_line: call.line,
                    source_symbol: call.receiver.clone(),
                    reference_type: ReferenceKind::MethodCall,
                    target_file: Some(class_def.file_path.clone()),
                    target_symbol: Some(call.method.clone()),
                    target_type: Some(class_def.name.clone()),
                    confidence: confidence::HEURISTIC,
                    resolution_method: Some("heuristic".into()),
                },
            };
            references.push(reference);
        }
        dedupe_keep_best(references)
    }

    /// `x = Foo()` becomes an instance_of reference to Foo's definition.
    pub fn track_instantiations(&self) -> Vec<SymbolReference> {
        let mut references = Vec::new();
        for info in &self.type_infos {
            let Some(inferred) = &info.inferred_type else {
                continue;
            };
            let class_name = extract_base_type(inferred);
            let Some(class_def) = self.best_class(&class_name) else {
                continue;
            };
            references.push(SymbolReference {
                source_file: info.file_path.clone(),
                source_line: info.line,
                source_symbol: info.name.clone(),
                reference_type: ReferenceKind::InstanceOf,
                target_file: Some(class_def.file_path.clone()),
                target_symbol: Some(class_def.name.clone()),
                target_type: Some(class_def.name.clone()),
                confidence: confidence::CLASS_INSTANTIATION,
                resolution_method: Some("class_instantiation".into()),
            });
        }
        dedupe_keep_best(references)
    }

    /// Explicit annotations and return types that name an indexed class.
    pub fn resolve_annotations(&self) -> Vec<SymbolReference> {
        let mut references = Vec::new();

        for info in &self.type_infos {
            let Some(annotation) = &info.type_annotation else {
                continue;
            };
            let class_name = extract_base_type(annotation);
            let Some(class_def) = self.best_class(&class_name) else {
                continue;
            };
            references.push(SymbolReference {
                source_file: info.file_path.clone(),
                source_line: info.line,
                source_symbol: info.name.clone(),
                reference_type: ReferenceKind::TypeAnnotation,
                target_file: Some(class_def.file_path.clone()),
                target_symbol: Some(class_def.name.clone()),
                target_type: Some(class_def.name.clone()),
                confidence: confidence::TYPE_ANNOTATION,
                resolution_method: Some("type_annotation".into()),
            });
        }

        for function in &self.functions {
            let Some(return_type) = &function.return_type else {
                continue;
            };
            let class_name = extract_base_type(return_type);
            let Some(class_def) = self.best_class(&class_name) else {
                continue;
            };
            references.push(SymbolReference {
                source_file: function.file_path.clone(),
                source_line: function.start_line,
                source_symbol: function.name.clone(),
                reference_type: ReferenceKind::ReturnType,
                target_file: Some(class_def.file_path.clone()),
                target_symbol: Some(class_def.name.clone()),
                target_type: Some(class_def.name.clone()),
                confidence: confidence::TYPE_ANNOTATION,
                resolution_method: Some("return_type".into()),
            });
        }

        dedupe_keep_best(references)
    }

    /// Disambiguate same-named classes: lexicographically smallest file.
    fn best_class(&self, name: &str) -> Option<&Symbol> {
        self.symbols_by_name
            .get(name)?
            .iter()
            .filter(|s| s.kind == SymbolKind::Class)
            .min_by(|a, b| a.file_path.cmp(&b.file_path))
    }
}

/// One reference per `(source, line, kind, target)`: highest confidence
/// wins; at equal confidence the smaller target_file does.
fn dedupe_keep_best(references: Vec<SymbolReference>) -> Vec<SymbolReference> {
    let mut best: HashMap<(String, u32, ReferenceKind, String), SymbolReference> = HashMap::new();
    for reference in references {
        let key = (
            reference.source_file.clone(),
            reference.source_line,
            reference.reference_type,
            reference.target_symbol.clone().unwrap_or_default(),
        );
        match best.get(&key) {
            Some(existing)
                if existing.confidence > reference.confidence
                    || (existing.confidence == reference.confidence
                        && existing.target_file <= reference.target_file) => {}
            _ => {
                best.insert(key, reference);
            }
        }
    }
    let mut out: Vec<SymbolReference> = best.into_values().collect();
    out.sort_by(|a, b| {
        (&a.source_file, a.source_line, a.reference_type.as_str())
            .cmp(&(&b.source_file, b.source_line, b.reference_type.as_str()))
    });
    out
}
