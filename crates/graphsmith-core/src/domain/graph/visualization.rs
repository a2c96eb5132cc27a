//! Read-only export for external renderers

use serde::{Deserialize, Serialize};

use super::node::{GraphEdge, GraphNode};
use super::query::GraphQuery;

/// Every node and edge of the derived graph
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VisualizationModel {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Counts carried alongside an exported model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisualizationSummary {
    pub node_count: usize,
    pub edge_count: usize,
}

impl VisualizationModel {
    pub fn summary(&self) -> VisualizationSummary {
        VisualizationSummary {
            node_count: self.nodes.len(),
            edge_count: self.edges.len(),
        }
    }
}

impl GraphQuery<'_> {
    pub fn to_visualization_model(&self) -> VisualizationModel {
        VisualizationModel {
            nodes: self.all_nodes(),
            edges: self.all_edges(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::node::{EdgeKind, NodeKind};
    use crate::domain::graph::Graph;
    use crate::domain::schema::System;

    #[test]
    fn test_seeded_model() {
        let system = System::seeded();
        let graph = Graph::with_predefined_entities(&system).unwrap();
        let model = GraphQuery::new(&system, &graph).to_visualization_model();

        let masters = model
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::ClassMaster)
            .count();
        assert_eq!(masters, system.class_count());
        assert!(model.nodes.iter().any(|n| n.id == "User:Person"));
        assert_eq!(model.summary().edge_count, 2);
        assert!(model.edges.iter().any(|e| e.kind == EdgeKind::InstanceOf && e.target == "Person"));

        let json = serde_json::to_value(&model).unwrap();
        assert!(json["nodes"].is_array());
        assert!(json["edges"].is_array());
    }
}
