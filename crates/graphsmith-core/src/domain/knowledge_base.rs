//! The live (System, Graph) pair

use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::graph::{AuditFinding, Graph, GraphQuery, VisualizationModel};
use super::schema::System;

/// Schema registry and graph, always saved, loaded and merged together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub system: System,
    #[serde(flatten)]
    pub graph: Graph,
}

/// Size counters of a knowledge base
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeBaseStats {
    pub class_count: usize,
    pub entity_count: usize,
    pub relationship_count: usize,
    pub class_node_count: usize,
    pub predefined_entity_count: usize,
}

impl KnowledgeBase {
    /// A knowledge base over `system`, seeded with its predefined entities
    pub fn new(system: System) -> Result<Self> {
        let graph = Graph::with_predefined_entities(&system)?;
        Ok(Self { system, graph })
    }

    /// The built-in seed schema and its predefined entities
    pub fn seeded() -> Result<Self> {
        Self::new(System::seeded())
    }

    pub fn query(&self) -> GraphQuery<'_> {
        GraphQuery::new(&self.system, &self.graph)
    }

    pub fn stats(&self) -> KnowledgeBaseStats {
        KnowledgeBaseStats {
            class_count: self.system.class_count(),
            entity_count: self.graph.entity_count(),
            relationship_count: self.graph.relationship_count(),
            class_node_count: self.graph.class_node_count(&self.system),
            predefined_entity_count: self.system.predefined_entities().len(),
        }
    }

    pub fn audit(&self) -> Vec<AuditFinding> {
        self.graph.audit(&self.system)
    }

    pub fn to_visualization_model(&self) -> VisualizationModel {
        self.query().to_visualization_model()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_stats() {
        let kb = KnowledgeBase::seeded().unwrap();
        let stats = kb.stats();
        assert_eq!(stats.class_count, 4);
        assert_eq!(stats.entity_count, 1);
        assert_eq!(stats.relationship_count, 0);
        assert_eq!(stats.class_node_count, 1);
        assert_eq!(stats.predefined_entity_count, 1);
    }

    #[test]
    fn test_serialized_shape() {
        let kb = KnowledgeBase::seeded().unwrap();
        let json = serde_json::to_value(&kb).unwrap();
        assert!(json["system"]["classes"].is_array());
        assert!(json["entities"].is_array());
        assert!(json["relationships"].is_array());

        let restored: KnowledgeBase = serde_json::from_value(json).unwrap();
        assert_eq!(restored, kb);
    }
}
