//! Relationships between entities
//!
//! A relationship is an occurrence-counted edge. Its identity is the
//! (source, target, description, refer-set) tuple: resubmitting the same
//! tuple bumps the count, changing any part yields a separate edge.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::canonical_key;

/// An edge between two entities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub source: String,
    pub target: String,
    pub description: String,
    /// How many times this exact relationship was observed
    pub count: u32,
    /// Extra participants (entity names or free text), compared as a set
    #[serde(default)]
    pub refer: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Identity of a relationship
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationshipKey {
    source: String,
    target: String,
    description: String,
    refer: BTreeSet<String>,
}

impl RelationshipKey {
    pub fn new(source: &str, target: &str, description: &str, refer: &[String]) -> Self {
        Self {
            source: canonical_key(source),
            target: canonical_key(target),
            description: description.trim().to_string(),
            refer: refer_set(refer),
        }
    }
}

impl Relationship {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            source: source.into().trim().to_string(),
            target: target.into().trim().to_string(),
            description: description.into().trim().to_string(),
            count: 1,
            refer: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the occurrence count (at least 1)
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count.max(1);
        self
    }

    pub fn with_refer(mut self, refer: Vec<String>) -> Self {
        self.refer = refer
            .into_iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        self
    }

    pub fn key(&self) -> RelationshipKey {
        RelationshipKey::new(&self.source, &self.target, &self.description, &self.refer)
    }

    pub fn same_identity(&self, other: &Relationship) -> bool {
        self.key() == other.key()
    }

    /// Whether the entity takes part as source, target or referenced participant
    pub fn involves(&self, entity_name: &str) -> bool {
        let wanted = canonical_key(entity_name);
        canonical_key(&self.source) == wanted
            || canonical_key(&self.target) == wanted
            || self.refer.iter().any(|r| canonical_key(r) == wanted)
    }

    /// Record `count` more observations
    pub(crate) fn observe(&mut self, count: u32) {
        self.count = self.count.saturating_add(count.max(1));
        self.updated_at = Utc::now();
    }
}

/// Case-insensitive set view of a refer list
pub fn refer_set(refer: &[String]) -> BTreeSet<String> {
    refer
        .iter()
        .map(|r| canonical_key(r))
        .filter(|r| !r.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refer(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_relationship_creation() {
        let rel = Relationship::new("User", "Alex", "sent a text to").with_count(0);
        assert!(!rel.id.is_empty());
        assert_eq!(rel.count, 1);
        assert!(rel.refer.is_empty());
    }

    #[test]
    fn test_identity_ignores_case_of_endpoints_and_refer_order() {
        let a = Relationship::new("User", "Alex", "sent a text to")
            .with_refer(refer(&["Messages", "photo"]));
        let b = Relationship::new("user", "ALEX", "sent a text to")
            .with_refer(refer(&["PHOTO", "messages"]));
        assert!(a.same_identity(&b));
    }

    #[test]
    fn test_any_field_change_breaks_identity() {
        let base = Relationship::new("User", "Alex", "called").with_refer(refer(&["via appA"]));

        let other_target = Relationship::new("User", "Sam", "called").with_refer(refer(&["via appA"]));
        let other_desc = Relationship::new("User", "Alex", "texted").with_refer(refer(&["via appA"]));
        let more_refer = Relationship::new("User", "Alex", "called")
            .with_refer(refer(&["via appA", "photo"]));

        assert!(!base.same_identity(&other_target));
        assert!(!base.same_identity(&other_desc));
        assert!(!base.same_identity(&more_refer));
    }

    #[test]
    fn test_observe_adds_count() {
        let mut rel = Relationship::new("User", "Alex", "called");
        rel.observe(2);
        rel.observe(0);
        assert_eq!(rel.count, 4);
    }

    #[test]
    fn test_involves() {
        let rel = Relationship::new("User", "Alex", "called").with_refer(refer(&["WhatsApp"]));
        assert!(rel.involves("user"));
        assert!(rel.involves("whatsapp"));
        assert!(!rel.involves("Sam"));
    }
}
