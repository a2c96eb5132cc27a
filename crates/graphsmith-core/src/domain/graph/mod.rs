//! The knowledge graph
//!
//! Entities and relationships are stored; class nodes and class-master nodes
//! are derived from entity class memberships and the schema registry.

mod audit;
mod entity;
mod node;
mod query;
mod relationship;
mod search;
mod store;
mod visualization;

pub use audit::{AuditFinding, AuditIssue};
pub use entity::{ClassMembership, Entity, PropertyValues};
pub use node::{
    EdgeKind, GraphEdge, GraphNode, NodeDetail, NodeGroup, NodeKind, NodeRef, class_node_id,
};
pub use query::GraphQuery;
pub use relationship::{Relationship, RelationshipKey, refer_set};
pub use search::{FUZZY_THRESHOLD, SearchHit, SearchHitKind};
pub use store::{ClassProperties, EntityUpsert, Graph, GraphData, RelationshipUpsert};
pub use visualization::{VisualizationModel, VisualizationSummary};
