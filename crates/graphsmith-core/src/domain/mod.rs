//! Domain model: schema registry, graph store, tasks, extraction and merge

pub mod extraction;
pub mod graph;
pub mod knowledge_base;
pub mod merge;
pub mod schema;
pub mod task;

pub use knowledge_base::{KnowledgeBase, KnowledgeBaseStats};

/// Lookup key for names compared case-insensitively
///
/// Trims, collapses inner whitespace and lowercases.
pub fn canonical_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_key() {
        assert_eq!(canonical_key("  Alex  "), "alex");
        assert_eq!(canonical_key("New   York\tCity"), "new york city");
        assert_eq!(canonical_key("ÉCOLE"), "école");
        assert_eq!(canonical_key("   "), "");
    }
}
