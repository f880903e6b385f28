//! Cycle detection over the file dependency graph.
//!
//! Builds a file-level graph from resolved imports, calls, and inheritance
//! edges, then finds cycles with an iterative DFS and visited sets.

use crate::error::Result;
use crate::storage::SqliteStore;
use std::collections::{HashMap, HashSet};

/// Every cycle of files, as lists of member paths. A file can appear in at
/// most one reported cycle.
pub fn detect_file_cycles(store: &SqliteStore) -> Result<Vec<Vec<String>>> {
    let mut edges: HashMap<String, HashSet<String>> = HashMap::new();

    for (_, link) in store.query_import_links()? {
        if let Some(target) = link.definition_file {
            if target != link.importer_file {
                edges.entry(link.importer_file).or_default().insert(target);
            }
        }
    }
    for reference in store.query_symbol_references(None, None)? {
        if let Some(target) = reference.target_file {
            if target != reference.source_file {
                edges
                    .entry(reference.source_file)
                    .or_default()
                    .insert(target);
            }
        }
    }

    Ok(find_cycles(&edges))
}

/// Iterative DFS over the adjacency map; back edges into the active path
/// mark every file on the loop as cyclic.
pub fn find_cycles(edges: &HashMap<String, HashSet<String>>) -> Vec<Vec<String>> {
    let mut cyclic_members: HashSet<String> = HashSet::new();

    let mut nodes: Vec<&String> = edges.keys().collect();
    nodes.sort();

    for start in nodes {
        // path-based DFS from each node; small graphs, clarity over speed
        let mut stack: Vec<(String, Vec<String>)> = vec![(start.clone(), vec![start.clone()])];
        let mut expanded: HashSet<String> = HashSet::new();

        while let Some((node, path)) = stack.pop() {
            if !expanded.insert(node.clone()) {
                continue;
            }
            let Some(neighbors) = edges.get(&node) else {
                continue;
            };
            for neighbor in neighbors {
                if let Some(position) = path.iter().position(|p| p == neighbor) {
                    for member in &path[position..] {
                        cyclic_members.insert(member.clone());
                    }
                } else {
                    let mut next_path = path.clone();
                    next_path.push(neighbor.clone());
                    stack.push((neighbor.clone(), next_path));
                }
            }
        }
    }

    // Group members into connected cycles for reporting.
    let mut remaining: Vec<String> = cyclic_members.iter().cloned().collect();
    remaining.sort();
    let mut cycles: Vec<Vec<String>> = Vec::new();
    let mut assigned: HashSet<String> = HashSet::new();

    for member in remaining {
        if assigned.contains(&member) {
            continue;
        }
        let mut group = Vec::new();
        let mut queue = vec![member.clone()];
        while let Some(node) = queue.pop() {
            if !assigned.insert(node.clone()) {
                continue;
            }
            group.push(node.clone());
            if let Some(neighbors) = edges.get(&node) {
                for neighbor in neighbors {
                    if cyclic_members.contains(neighbor) && !assigned.contains(neighbor) {
                        queue.push(neighbor.clone());
                    }
                }
            }
        }
        group.sort();
        cycles.push(group);
    }
    cycles
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(pairs: &[(&str, &str)]) -> HashMap<String, HashSet<String>> {
        let mut edges: HashMap<String, HashSet<String>> = HashMap::new();
        for (from, to) in pairs {
            edges
                .entry(from.to_string())
                .or_default()
                .insert(to.to_string());
        }
        edges
    }

    #[test]
    fn acyclic_graph_has_no_cycles() {
        let edges = graph(&[("a.py", "b.py"), ("b.py", "c.py")]);
        assert!(find_cycles(&edges).is_empty());
    }

    #[test]
    fn two_node_cycle_detected() {
        let edges = graph(&[("a.py", "b.py"), ("b.py", "a.py")]);
        let cycles = find_cycles(&edges);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0], ["a.py", "b.py"]);
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let edges = graph(&[("a.py", "a.py")]);
        let cycles = find_cycles(&edges);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0], ["a.py"]);
    }

    #[test]
    fn cycle_does_not_swallow_acyclic_neighbors() {
        let edges = graph(&[
            ("a.py", "b.py"),
            ("b.py", "a.py"),
            ("b.py", "c.py"),
            ("d.py", "a.py"),
        ]);
        let cycles = find_cycles(&edges);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0], ["a.py", "b.py"]);
    }
}
