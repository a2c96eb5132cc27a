//! Keyword search across the derived node graph
//!
//! Exact mode is a case-insensitive substring match. Fuzzy mode also accepts
//! hits where every keyword token appears, or where the keyword is close to
//! a name (or one of its tokens) by Jaro-Winkler similarity.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;

use crate::domain::canonical_key;

use super::node::class_node_id;
use super::query::GraphQuery;

/// Minimum Jaro-Winkler similarity for a fuzzy hit
pub const FUZZY_THRESHOLD: f64 = 0.85;

/// Weight applied to matches outside the primary name
const SECONDARY_FIELD_WEIGHT: f64 = 0.8;

/// What a search hit points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchHitKind {
    Entity,
    ClassNode,
    ClassMaster,
    Relationship,
}

impl SearchHitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entity => "entity",
            Self::ClassNode => "class_node",
            Self::ClassMaster => "class_master",
            Self::Relationship => "relationship",
        }
    }
}

impl std::fmt::Display for SearchHitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub kind: SearchHitKind,
    /// Node id, or relationship id for relationship hits
    pub node_id: String,
    /// The text that matched
    pub matched_text: String,
    /// Where the match was found, e.g. `name` or `property:relation`
    pub context: String,
    pub score: f64,
}

/// A prepared keyword
struct Matcher {
    keyword: String,
    tokens: Vec<String>,
    fuzzy: bool,
}

impl Matcher {
    fn new(keyword: &str, fuzzy: bool) -> Self {
        let keyword = canonical_key(keyword);
        let tokens = keyword.split(' ').map(str::to_string).collect();
        Self {
            keyword,
            tokens,
            fuzzy,
        }
    }

    /// Score a piece of text, or `None` if it does not match
    fn score(&self, text: &str) -> Option<f64> {
        let haystack = canonical_key(text);
        if haystack.is_empty() {
            return None;
        }
        if haystack == self.keyword {
            return Some(1.0);
        }
        if haystack.starts_with(&self.keyword) {
            return Some(0.9);
        }
        if haystack.contains(&self.keyword) {
            return Some(0.75);
        }
        if !self.fuzzy {
            return None;
        }

        if self.tokens.len() > 1 && self.tokens.iter().all(|t| haystack.contains(t.as_str())) {
            return Some(0.6);
        }

        let best = std::iter::once(haystack.as_str())
            .chain(haystack.split(' '))
            .map(|candidate| jaro_winkler(&self.keyword, candidate))
            .fold(0.0_f64, f64::max);
        (best >= FUZZY_THRESHOLD).then_some(0.5 * best)
    }
}

/// Collects hits, keeping the best one per target
#[derive(Default)]
struct HitSet {
    best: HashMap<(SearchHitKind, String), SearchHit>,
}

impl HitSet {
    fn offer(
        &mut self,
        matcher: &Matcher,
        kind: SearchHitKind,
        node_id: &str,
        text: &str,
        context: &str,
        weight: f64,
    ) {
        let Some(score) = matcher.score(text) else {
            return;
        };
        let hit = SearchHit {
            kind,
            node_id: node_id.to_string(),
            matched_text: text.to_string(),
            context: context.to_string(),
            score: score * weight,
        };
        let slot = self.best.entry((kind, node_id.to_string()));
        slot.and_modify(|current| {
            if hit.score > current.score {
                *current = hit.clone();
            }
        })
        .or_insert(hit);
    }

    fn into_ranked(self, limit: usize) -> Vec<SearchHit> {
        let mut hits: Vec<SearchHit> = self.best.into_values().collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.kind.cmp(&b.kind))
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
        hits.truncate(limit);
        hits
    }
}

impl GraphQuery<'_> {
    /// Ranked keyword search; an empty keyword matches nothing
    pub fn search(&self, keyword: &str, fuzzy: bool, limit: usize) -> Vec<SearchHit> {
        let matcher = Matcher::new(keyword, fuzzy);
        if matcher.keyword.is_empty() || limit == 0 {
            return Vec::new();
        }
        let mut hits = HitSet::default();

        for entity in self.graph.entities() {
            hits.offer(&matcher, SearchHitKind::Entity, &entity.name, &entity.name, "name", 1.0);
            hits.offer(
                &matcher,
                SearchHitKind::Entity,
                &entity.name,
                &entity.description,
                "description",
                SECONDARY_FIELD_WEIGHT,
            );

            for membership in &entity.classes {
                if !self.system.has_class(&membership.class_name) {
                    continue;
                }
                let id = class_node_id(&entity.name, &membership.class_name);
                for (property, value) in &membership.properties {
                    if let Some(value) = value {
                        hits.offer(
                            &matcher,
                            SearchHitKind::ClassNode,
                            &id,
                            value,
                            &format!("property:{}", property),
                            SECONDARY_FIELD_WEIGHT,
                        );
                    }
                }
            }
        }

        for class in self.system.get_all_classes() {
            hits.offer(&matcher, SearchHitKind::ClassMaster, &class.name, &class.name, "name", 1.0);
            hits.offer(
                &matcher,
                SearchHitKind::ClassMaster,
                &class.name,
                &class.description,
                "description",
                SECONDARY_FIELD_WEIGHT,
            );
        }

        for relationship in self.graph.relationships() {
            hits.offer(
                &matcher,
                SearchHitKind::Relationship,
                &relationship.id,
                &relationship.description,
                "description",
                SECONDARY_FIELD_WEIGHT,
            );
            for refer in &relationship.refer {
                hits.offer(
                    &matcher,
                    SearchHitKind::Relationship,
                    &relationship.id,
                    refer,
                    "refer",
                    SECONDARY_FIELD_WEIGHT,
                );
            }
        }

        hits.into_ranked(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::{ClassProperties, Graph, Relationship};
    use crate::domain::schema::System;

    fn fixture() -> (System, Graph) {
        let system = System::seeded();
        let mut graph = Graph::with_predefined_entities(&system).unwrap();
        let mut props = ClassProperties::new();
        props.insert(
            "Person".to_string(),
            [("relation".to_string(), "sister".to_string())]
                .into_iter()
                .collect(),
        );
        graph
            .create_entity(&system, "Alexandra", "Lives in Lisbon", &["Person".to_string()], &props)
            .unwrap();
        graph
            .create_entity(&system, "Messages", "Messaging app", &["App".to_string()], &ClassProperties::new())
            .unwrap();
        graph
            .add_relationship(
                Relationship::new("User", "Alexandra", "called")
                    .with_refer(vec!["Messages".to_string()]),
            )
            .unwrap();
        (system, graph)
    }

    #[test]
    fn test_exact_name_ranks_first() {
        let (system, graph) = fixture();
        let hits = GraphQuery::new(&system, &graph).search("messages", false, 10);

        assert_eq!(hits[0].kind, SearchHitKind::Entity);
        assert_eq!(hits[0].node_id, "Messages");
        assert_eq!(hits[0].score, 1.0);
        // refer text of the relationship matches too
        assert!(hits.iter().any(|h| h.kind == SearchHitKind::Relationship && h.context == "refer"));
    }

    #[test]
    fn test_exact_mode_is_substring_only() {
        let (system, graph) = fixture();
        let query = GraphQuery::new(&system, &graph);

        assert!(query.search("alexandr", false, 10).iter().any(|h| h.node_id == "Alexandra"));
        assert!(query.search("alexandar", false, 10).is_empty());
    }

    #[test]
    fn test_fuzzy_mode_tolerates_typos() {
        let (system, graph) = fixture();
        let hits = GraphQuery::new(&system, &graph).search("alexandar", true, 10);
        assert_eq!(hits[0].node_id, "Alexandra");
        assert!(hits[0].score < 0.75);
    }

    #[test]
    fn test_fuzzy_mode_matches_all_tokens() {
        let (system, graph) = fixture();
        let query = GraphQuery::new(&system, &graph);

        assert!(query.search("lisbon lives", false, 10).is_empty());
        let hits = query.search("lisbon lives", true, 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].context, "description");
    }

    #[test]
    fn test_property_values_hit_class_nodes() {
        let (system, graph) = fixture();
        let hits = GraphQuery::new(&system, &graph).search("SISTER", false, 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].kind, SearchHitKind::ClassNode);
        assert_eq!(hits[0].node_id, "Alexandra:Person");
        assert_eq!(hits[0].context, "property:relation");
    }

    #[test]
    fn test_class_masters_searchable() {
        let (system, graph) = fixture();
        let hits = GraphQuery::new(&system, &graph).search("place", false, 10);
        assert!(hits.iter().any(|h| h.kind == SearchHitKind::ClassMaster && h.node_id == "Place"));
    }

    #[test]
    fn test_limit_and_empty_keyword() {
        let (system, graph) = fixture();
        let query = GraphQuery::new(&system, &graph);
        assert_eq!(query.search("e", false, 2).len(), 2);
        assert!(query.search("   ", true, 10).is_empty());
    }

    #[test]
    fn test_one_hit_per_target() {
        let (system, graph) = fixture();
        let hits = GraphQuery::new(&system, &graph).search("messag", false, 10);
        let entity_hits = hits
            .iter()
            .filter(|h| h.kind == SearchHitKind::Entity && h.node_id == "Messages")
            .count();
        assert_eq!(entity_hits, 1);
    }
}
