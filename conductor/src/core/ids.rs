//! Pure helpers for hierarchical dotted-decimal session ids.
//!
//! Root sessions are sequential integers ("0", "1", ...); a child of session
//! X is `X.k`. The dot count therefore encodes tree depth.

/// Tree depth of an id (number of dots).
pub fn depth(id: &str) -> usize {
    id.matches('.').count()
}

/// True if `id` names a strict descendant of `ancestor`.
pub fn is_descendant(ancestor: &str, id: &str) -> bool {
    id.len() > ancestor.len() + 1 && id.starts_with(ancestor) && id.as_bytes()[ancestor.len()] == b'.'
}

/// Child index of `id` under `parent`, or `None` when `id` is not a direct
/// child (grandchildren carry a further dot in the suffix).
pub fn direct_child_index(parent: &str, id: &str) -> Option<u64> {
    let suffix = id.strip_prefix(parent)?.strip_prefix('.')?;
    if suffix.contains('.') {
        return None;
    }
    suffix.parse().ok()
}

/// Format the id of child `index` under `parent` (roots have an empty parent).
pub fn child_id(parent: &str, index: u64) -> String {
    if parent.is_empty() {
        index.to_string()
    } else {
        format!("{parent}.{index}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_counts_dots() {
        assert_eq!(depth("0"), 0);
        assert_eq!(depth("0.1"), 1);
        assert_eq!(depth("0.1.2"), 2);
    }

    #[test]
    fn descendant_requires_dot_boundary() {
        assert!(is_descendant("0", "0.1"));
        assert!(is_descendant("0", "0.1.2"));
        assert!(!is_descendant("0", "0"));
        // "10" shares a textual prefix with "1" but is unrelated.
        assert!(!is_descendant("1", "10"));
        assert!(!is_descendant("1", "10.0"));
    }

    #[test]
    fn direct_child_index_filters_grandchildren() {
        assert_eq!(direct_child_index("0.1", "0.1.2"), Some(2));
        assert_eq!(direct_child_index("0.1", "0.1.2.0"), None);
        assert_eq!(direct_child_index("0.1", "0.2.3"), None);
        assert_eq!(direct_child_index("", "7"), None);
        assert_eq!(direct_child_index("0", "0.x"), None);
    }

    #[test]
    fn child_id_handles_roots() {
        assert_eq!(child_id("", 3), "3");
        assert_eq!(child_id("0.1", 0), "0.1.0");
    }
}
