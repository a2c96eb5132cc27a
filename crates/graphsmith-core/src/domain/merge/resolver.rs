//! Identity tie-break between smart and structural merge
//!
//! Smart merge may propose that a delta entity is really an existing entity
//! under another name. Structural identity only knows canonical name
//! equality. An [`IdentityResolver`] decides which of the two names wins.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::canonical_key;
use crate::domain::graph::Graph;

/// Policy applied when smart and structural identity disagree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Always take the smart proposal
    #[default]
    PreferSmart,
    /// Keep the delta's own name unless only the smart target exists in the graph
    PreferStructural,
    /// Take the smart proposal only when it names an existing entity
    PreferExisting,
}

impl TieBreak {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreferSmart => "prefer_smart",
            Self::PreferStructural => "prefer_structural",
            Self::PreferExisting => "prefer_existing",
        }
    }
}

impl std::fmt::Display for TieBreak {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TieBreak {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "prefer_smart" => Ok(Self::PreferSmart),
            "prefer_structural" => Ok(Self::PreferStructural),
            "prefer_existing" => Ok(Self::PreferExisting),
            other => Err(format!(
                "unknown tie-break '{}' (expected prefer_smart, prefer_structural or prefer_existing)",
                other
            )),
        }
    }
}

/// A recorded identity decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityDecision {
    /// Name the delta carried
    pub structural: String,
    /// Name smart merge proposed
    pub proposed: String,
    /// Name that was applied
    pub chosen: String,
    pub resolver: String,
}

impl IdentityDecision {
    pub fn renamed(&self) -> bool {
        canonical_key(&self.structural) != canonical_key(&self.chosen)
    }
}

/// Decides the final identity of an entity smart merge wants to rename
pub trait IdentityResolver: Send + Sync {
    /// Short name recorded in merge reports
    fn name(&self) -> &str;

    /// Pick between the delta's own name and the smart proposal
    fn resolve(&self, structural: &str, proposed: &str, graph: &Graph) -> String;
}

/// Default resolver driven by [`TieBreak`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicyResolver {
    tie_break: TieBreak,
}

impl PolicyResolver {
    pub fn new(tie_break: TieBreak) -> Self {
        Self { tie_break }
    }

    pub fn tie_break(&self) -> TieBreak {
        self.tie_break
    }
}

impl IdentityResolver for PolicyResolver {
    fn name(&self) -> &str {
        self.tie_break.as_str()
    }

    fn resolve(&self, structural: &str, proposed: &str, graph: &Graph) -> String {
        let chosen = match self.tie_break {
            TieBreak::PreferSmart => proposed,
            TieBreak::PreferStructural => {
                if graph.contains_entity(proposed) && !graph.contains_entity(structural) {
                    proposed
                } else {
                    structural
                }
            }
            TieBreak::PreferExisting => {
                if graph.contains_entity(proposed) {
                    proposed
                } else {
                    structural
                }
            }
        };
        // an existing entity keeps its stored spelling
        graph
            .get_entity(chosen)
            .map(|entity| entity.name.clone())
            .unwrap_or_else(|| chosen.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::ClassProperties;
    use crate::domain::schema::System;

    fn graph_with(names: &[&str]) -> Graph {
        let system = System::seeded();
        let mut graph = Graph::new();
        for name in names {
            graph
                .create_entity(&system, name, "", &["Person".to_string()], &ClassProperties::new())
                .unwrap();
        }
        graph
    }

    #[test]
    fn test_tie_break_parse_and_display() {
        assert_eq!("prefer-existing".parse::<TieBreak>().unwrap(), TieBreak::PreferExisting);
        assert_eq!(TieBreak::PreferStructural.to_string(), "prefer_structural");
        assert!("coin_flip".parse::<TieBreak>().is_err());
        assert_eq!(TieBreak::default(), TieBreak::PreferSmart);
    }

    #[test]
    fn test_prefer_smart_always_takes_proposal() {
        let graph = graph_with(&[]);
        let resolver = PolicyResolver::new(TieBreak::PreferSmart);
        assert_eq!(resolver.resolve("Alexander", "Alex", &graph), "Alex");
    }

    #[test]
    fn test_prefer_structural_only_follows_existing_target() {
        let resolver = PolicyResolver::new(TieBreak::PreferStructural);

        assert_eq!(resolver.resolve("Alexander", "Alex", &graph_with(&[])), "Alexander");
        assert_eq!(resolver.resolve("Alexander", "alex", &graph_with(&["Alex"])), "Alex");
        assert_eq!(
            resolver.resolve("Alexander", "Alex", &graph_with(&["Alex", "Alexander"])),
            "Alexander"
        );
    }

    #[test]
    fn test_prefer_existing_merges_existing_pairs() {
        let resolver = PolicyResolver::new(TieBreak::PreferExisting);

        assert_eq!(resolver.resolve("Alexander", "Alex", &graph_with(&[])), "Alexander");
        assert_eq!(
            resolver.resolve("Alexander", "Alex", &graph_with(&["Alex", "Alexander"])),
            "Alex"
        );
    }

    #[test]
    fn test_decision_rename_is_case_insensitive() {
        let decision = IdentityDecision {
            structural: "alex".into(),
            proposed: "Alex".into(),
            chosen: "Alex".into(),
            resolver: "prefer_smart".into(),
        };
        assert!(!decision.renamed());
    }
}
