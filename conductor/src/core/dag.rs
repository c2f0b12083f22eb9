//! Cycle detection over the depends-on relation.
//!
//! An edge `A -> B` means "A depends on B". The graph is rebuilt from the
//! store's edge list on every check; sessions are few enough that an explicit
//! adjacency map per call beats maintaining an incremental index.

use std::collections::{HashMap, HashSet};

/// Decide whether persisting `new_id` with the hypothetical edges
/// `new_id -> d` for each `d` in `new_depends_on` would close a cycle.
///
/// `existing` holds one `(session_id, depends_on)` pair per persisted session.
/// A cycle forms exactly when `new_id` is reachable from one of its own
/// proposed dependencies; a session depending on itself directly is trivially
/// a cycle.
pub fn would_create_cycle(
    new_id: &str,
    new_depends_on: &[String],
    existing: &[(String, Vec<String>)],
) -> bool {
    if new_depends_on.iter().any(|dep| dep == new_id) {
        return true;
    }

    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
    for (id, deps) in existing {
        edges
            .entry(id.as_str())
            .or_default()
            .extend(deps.iter().map(String::as_str));
    }
    edges
        .entry(new_id)
        .or_default()
        .extend(new_depends_on.iter().map(String::as_str));

    // DFS from each proposed dependency; reaching new_id closes a loop.
    new_depends_on
        .iter()
        .any(|dep| reaches(&edges, dep, new_id))
}

fn reaches(edges: &HashMap<&str, Vec<&str>>, from: &str, target: &str) -> bool {
    let mut stack = vec![from];
    let mut visited: HashSet<&str> = HashSet::new();
    while let Some(node) = stack.pop() {
        if node == target {
            return true;
        }
        if !visited.insert(node) {
            continue;
        }
        if let Some(next) = edges.get(node) {
            stack.extend(next.iter().copied());
        }
    }
    false
}
