//! Derived node-graph view
//!
//! Three node kinds are derived on demand:
//! - entity nodes, addressed by entity name
//! - class nodes, one per entity class membership, addressed as `entity:class`
//! - class-master nodes, one per registry class, addressed by class name
//!
//! Edges are derived as well: entity → class node (`has_class`), class node →
//! class master (`instance_of`), and entity → entity for relationships.

use serde::{Deserialize, Serialize};

use crate::domain::schema::PropertyDefinition;

use super::entity::PropertyValues;

/// Kind of a node in the derived node graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Entity,
    ClassNode,
    ClassMaster,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entity => "entity",
            Self::ClassNode => "class_node",
            Self::ClassMaster => "class_master",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A resolved node address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeRef {
    Entity { name: String },
    ClassNode { entity: String, class: String },
    ClassMaster { class: String },
}

impl NodeRef {
    pub fn id(&self) -> String {
        match self {
            Self::Entity { name } => name.clone(),
            Self::ClassNode { entity, class } => class_node_id(entity, class),
            Self::ClassMaster { class } => class.clone(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Entity { .. } => NodeKind::Entity,
            Self::ClassNode { .. } => NodeKind::ClassNode,
            Self::ClassMaster { .. } => NodeKind::ClassMaster,
        }
    }
}

/// Id of the class node for an entity's class membership
pub fn class_node_id(entity: &str, class: &str) -> String {
    format!("{}:{}", entity, class)
}

/// A node as returned by graph queries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub kind: NodeKind,
    pub label: String,
    pub description: String,
    /// Class names (entity nodes)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
    /// Property values (class nodes)
    #[serde(skip_serializing_if = "PropertyValues::is_empty")]
    pub properties: PropertyValues,
    /// Property definitions (class-master nodes)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub schema: Vec<PropertyDefinition>,
    /// Number of class nodes instantiating the class (class-master nodes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_count: Option<usize>,
}

impl GraphNode {
    pub(crate) fn new(id: String, kind: NodeKind, label: String, description: String) -> Self {
        Self {
            id,
            kind,
            label,
            description,
            classes: Vec::new(),
            properties: PropertyValues::new(),
            schema: Vec::new(),
            instance_count: None,
        }
    }
}

/// Kind of a derived edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    HasClass,
    InstanceOf,
    Relationship,
}

/// An edge of the derived node graph
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub refer: Vec<String>,
}

impl GraphEdge {
    pub(crate) fn structural(source: String, target: String, kind: EdgeKind) -> Self {
        let label = match kind {
            EdgeKind::HasClass => "has_class",
            EdgeKind::InstanceOf => "instance_of",
            EdgeKind::Relationship => "relationship",
        };
        Self {
            source,
            target,
            kind,
            label: label.to_string(),
            relationship_id: None,
            count: None,
            refer: Vec::new(),
        }
    }
}

/// A node and its one-hop neighbourhood
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeDetail {
    pub node: GraphNode,
    pub neighbors: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// A set of nodes and the edges between them
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeGroup {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}
