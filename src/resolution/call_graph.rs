//! Call graph traversal.
//!
//! Breadth-first walk over plain calls plus receiver-resolved method
//! calls, in either direction, bounded by depth, node, and edge limits.
//! A built-in noise-word filter keeps ubiquitous library calls out.

use crate::error::Result;
use crate::storage::{SqliteStore, SymbolFilter};
use crate::types::{Call, ReferenceKind, Symbol};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};

/// Call names too common to be informative in a graph.
const NOISE_WORDS: &[&str] = &[
    "print", "len", "str", "int", "float", "bool", "list", "dict", "set", "tuple", "range",
    "open", "type", "isinstance", "issubclass", "super", "hasattr", "getattr", "setattr",
    "append", "extend", "insert", "remove", "pop", "get", "keys", "values", "items", "join",
    "split", "strip", "format", "replace", "startswith", "endswith", "lower", "upper",
    "debug", "info", "warning", "error", "exception", "log", "require", "console",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// What does this symbol call?
    Forward,
    /// What calls this symbol?
    Reverse,
}

/// Traversal bounds. Exceeding any of them sets `truncated`.
#[derive(Debug, Clone, Copy)]
pub struct CallGraphLimits {
    pub max_depth: usize,
    pub max_nodes: usize,
    pub max_edges: usize,
}

impl Default for CallGraphLimits {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_nodes: 200,
            max_edges: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CallGraphNode {
    pub symbol: String,
    pub file_path: String,
    pub line: u32,
    pub depth: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallGraph {
    pub root: String,
    pub direction: Direction,
    pub nodes: Vec<CallGraphNode>,
    pub edges: Vec<(String, String)>,
    pub truncated: bool,
}

pub struct CallGraphBuilder<'a> {
    store: &'a SqliteStore,
    calls: Vec<Call>,
    /// symbol name -> defining symbols
    symbols_by_name: HashMap<String, Vec<Symbol>>,
    /// file -> symbols sorted by start line, for call-site attribution
    symbols_by_file: HashMap<String, Vec<Symbol>>,
    /// resolved method-call edges: (caller_file, line) -> target symbol name
    resolved_method_calls: Vec<(String, u32, String)>,
}

impl<'a> CallGraphBuilder<'a> {
    pub fn new(store: &'a SqliteStore) -> Result<Self> {
        let calls = store.query_calls(None)?;

        let mut symbols_by_name: HashMap<String, Vec<Symbol>> = HashMap::new();
        let mut symbols_by_file: HashMap<String, Vec<Symbol>> = HashMap::new();
        for symbol in store.query_symbols(&SymbolFilter::default())? {
            symbols_by_name
                .entry(symbol.name.clone())
                .or_default()
                .push(symbol.clone());
            symbols_by_file
                .entry(symbol.file_path.clone())
                .or_default()
                .push(symbol);
        }
        for symbols in symbols_by_file.values_mut() {
            symbols.sort_by_key(|s| s.start_line);
        }

        // Method calls participate only once the type tracker resolved
        // their receiver; unresolved receivers stay out of the graph.
        let resolved_method_calls = store
            .query_symbol_references(None, None)?
            .into_iter()
            .filter(|r| r.reference_type == ReferenceKind::MethodCall)
            .filter_map(|r| {
                r.target_symbol
                    .map(|target| (r.source_file, r.source_line, target))
            })
            .collect();

        Ok(Self {
            store,
            calls,
            symbols_by_name,
            symbols_by_file,
            resolved_method_calls,
        })
    }

    pub fn build(
        &self,
        root_symbol: &str,
        direction: Direction,
        limits: CallGraphLimits,
    ) -> Result<CallGraph> {
        let _ = self.store; // all data preloaded

        let mut graph = CallGraph {
            root: root_symbol.to_string(),
            direction,
            nodes: Vec::new(),
            edges: Vec::new(),
            truncated: false,
        };

        let Some(root_def) = self
            .symbols_by_name
            .get(root_symbol)
            .and_then(|defs| defs.first())
        else {
            return Ok(graph);
        };

        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        seen.insert(root_symbol.to_string());
        queue.push_back((root_symbol.to_string(), 0));
        graph.nodes.push(CallGraphNode {
            symbol: root_symbol.to_string(),
            file_path: root_def.file_path.clone(),
            line: root_def.start_line,
            depth: 0,
        });

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= limits.max_depth {
                graph.truncated = true;
                continue;
            }
            let neighbors = match direction {
                Direction::Forward => self.callees_of(&current),
                Direction::Reverse => self.callers_of(&current),
            };
            for (neighbor, file, line) in neighbors {
                if is_noise(&neighbor) {
                    continue;
                }
                if graph.edges.len() >= limits.max_edges {
                    graph.truncated = true;
                    break;
                }
                let edge = match direction {
                    Direction::Forward => (current.clone(), neighbor.clone()),
                    Direction::Reverse => (neighbor.clone(), current.clone()),
                };
                if !graph.edges.contains(&edge) {
                    graph.edges.push(edge);
                }
                if seen.contains(&neighbor) {
                    continue;
                }
                if graph.nodes.len() >= limits.max_nodes {
                    graph.truncated = true;
                    continue;
                }
                seen.insert(neighbor.clone());
                graph.nodes.push(CallGraphNode {
                    symbol: neighbor.clone(),
                    file_path: file,
                    line,
                    depth: depth + 1,
                });
                queue.push_back((neighbor, depth + 1));
            }
        }
        Ok(graph)
    }

    /// Symbols called from inside `symbol`'s body.
    fn callees_of(&self, symbol: &str) -> Vec<(String, String, u32)> {
        let mut out = Vec::new();
        let Some(definitions) = self.symbols_by_name.get(symbol) else {
            return out;
        };
        for definition in definitions {
            for call in &self.calls {
                if call.caller_file == definition.file_path
                    && call.line >= definition.start_line
                    && call.line <= definition.end_line
                    && call.callee != *symbol
                {
                    if let Some(target) = self.definition_of(&call.callee) {
                        out.push((call.callee.clone(), target.file_path.clone(), target.start_line));
                    }
                }
            }
            for (caller_file, line, target) in &self.resolved_method_calls {
                if *caller_file == definition.file_path
                    && *line >= definition.start_line
                    && *line <= definition.end_line
                    && target != symbol
                {
                    if let Some(target_def) = self.definition_of(target) {
                        out.push((
                            target.clone(),
                            target_def.file_path.clone(),
                            target_def.start_line,
                        ));
                    }
                }
            }
        }
        out
    }

    /// Symbols whose bodies contain a call to `symbol`.
    fn callers_of(&self, symbol: &str) -> Vec<(String, String, u32)> {
        let mut sites: Vec<(&str, u32)> = self
            .calls
            .iter()
            .filter(|c| c.callee == symbol)
            .map(|c| (c.caller_file.as_str(), c.line))
            .collect();
        sites.extend(
            self.resolved_method_calls
                .iter()
                .filter(|(_, _, target)| target == symbol)
                .map(|(file, line, _)| (file.as_str(), *line)),
        );

        let mut out = Vec::new();
        for (file, line) in sites {
            if let Some(enclosing) = self.enclosing_symbol(file, line) {
                if enclosing.name != symbol {
                    out.push((
                        enclosing.name.clone(),
                        enclosing.file_path.clone(),
                        enclosing.start_line,
                    ));
                }
            }
        }
        out
    }

    fn definition_of(&self, name: &str) -> Option<&Symbol> {
        self.symbols_by_name
            .get(name)?
            .iter()
            .min_by(|a, b| a.file_path.cmp(&b.file_path))
    }

    /// Innermost symbol whose line range contains the call site.
    fn enclosing_symbol(&self, file: &str, line: u32) -> Option<&Symbol> {
        self.symbols_by_file
            .get(file)?
            .iter()
            .filter(|s| s.start_line <= line && line <= s.end_line)
            .min_by_key(|s| s.end_line - s.start_line)
    }
}

fn is_noise(name: &str) -> bool {
    NOISE_WORDS.contains(&name)
}
