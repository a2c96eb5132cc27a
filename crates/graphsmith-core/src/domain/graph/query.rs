//! Read-only queries over a (System, Graph) pair

use std::collections::BTreeSet;

use crate::domain::canonical_key;
use crate::domain::schema::System;
use crate::error::{Error, Result};

use super::entity::Entity;
use super::node::{EdgeKind, GraphEdge, GraphNode, NodeDetail, NodeGroup, NodeKind, NodeRef};
use super::node::class_node_id;
use super::relationship::Relationship;
use super::store::Graph;

/// Borrowed view used for node-graph traversal and search
#[derive(Debug, Clone, Copy)]
pub struct GraphQuery<'a> {
    pub(crate) system: &'a System,
    pub(crate) graph: &'a Graph,
}

impl<'a> GraphQuery<'a> {
    pub fn new(system: &'a System, graph: &'a Graph) -> Self {
        Self { system, graph }
    }

    /// Resolve a node id
    ///
    /// Entity names win over `entity:class` ids, which win over class names.
    pub fn resolve(&self, node_id: &str) -> Option<NodeRef> {
        let node_id = node_id.trim();
        if let Some(entity) = self.graph.get_entity(node_id) {
            return Some(NodeRef::Entity {
                name: entity.name.clone(),
            });
        }

        if let Some((entity_name, class_name)) = node_id.rsplit_once(':')
            && let Some(entity) = self.graph.get_entity(entity_name)
            && let Some(membership) = entity.class(class_name)
            && self.system.has_class(&membership.class_name)
        {
            return Some(NodeRef::ClassNode {
                entity: entity.name.clone(),
                class: membership.class_name.clone(),
            });
        }

        self.system
            .get_class_definition(node_id)
            .map(|class| NodeRef::ClassMaster {
                class: class.name.clone(),
            })
    }

    /// Materialize a resolved node
    pub fn node(&self, node: &NodeRef) -> Option<GraphNode> {
        match node {
            NodeRef::Entity { name } => self.graph.get_entity(name).map(entity_node),
            NodeRef::ClassNode { entity, class } => {
                let entity = self.graph.get_entity(entity)?;
                let membership = entity.class(class)?;
                let mut node = GraphNode::new(
                    class_node_id(&entity.name, &membership.class_name),
                    NodeKind::ClassNode,
                    format!("{} ({})", entity.name, membership.class_name),
                    self.system
                        .get_class_definition(&membership.class_name)
                        .map(|c| c.description.clone())
                        .unwrap_or_default(),
                );
                node.properties = membership.properties.clone();
                Some(node)
            }
            NodeRef::ClassMaster { class } => {
                let definition = self.system.get_class_definition(class)?;
                let mut node = GraphNode::new(
                    definition.name.clone(),
                    NodeKind::ClassMaster,
                    definition.name.clone(),
                    definition.description.clone(),
                );
                node.schema = definition.properties.clone();
                node.instance_count = Some(self.instances_of(&definition.name).len());
                Some(node)
            }
        }
    }

    /// Derived edges touching a node
    pub fn edges_of(&self, node: &NodeRef) -> Vec<GraphEdge> {
        match node {
            NodeRef::Entity { name } => {
                let Some(entity) = self.graph.get_entity(name) else {
                    return Vec::new();
                };
                let mut edges: Vec<GraphEdge> = self
                    .live_memberships(entity)
                    .into_iter()
                    .map(|class| {
                        GraphEdge::structural(
                            entity.name.clone(),
                            class_node_id(&entity.name, class),
                            EdgeKind::HasClass,
                        )
                    })
                    .collect();
                edges.extend(
                    self.graph
                        .relationships()
                        .iter()
                        .filter(|r| is_endpoint(r, &entity.name))
                        .map(|r| self.relationship_edge(r)),
                );
                edges
            }
            NodeRef::ClassNode { entity, class } => vec![
                GraphEdge::structural(
                    entity.clone(),
                    class_node_id(entity, class),
                    EdgeKind::HasClass,
                ),
                GraphEdge::structural(
                    class_node_id(entity, class),
                    class.clone(),
                    EdgeKind::InstanceOf,
                ),
            ],
            NodeRef::ClassMaster { class } => self
                .instances_of(class)
                .into_iter()
                .map(|entity| {
                    GraphEdge::structural(
                        class_node_id(&entity.name, class),
                        class.clone(),
                        EdgeKind::InstanceOf,
                    )
                })
                .collect(),
        }
    }

    /// One-hop neighbours of any node
    pub fn neighbors(&self, node_id: &str) -> Result<Vec<GraphNode>> {
        let node = self
            .resolve(node_id)
            .ok_or_else(|| Error::NodeNotFound(node_id.to_string()))?;
        let edges = self.edges_of(&node);
        Ok(self.other_ends(&node, &edges))
    }

    /// A node with its one-hop neighbours and the connecting edges
    pub fn node_detail(&self, node_id: &str) -> Result<NodeDetail> {
        let node_ref = self
            .resolve(node_id)
            .ok_or_else(|| Error::NodeNotFound(node_id.to_string()))?;
        let node = self
            .node(&node_ref)
            .ok_or_else(|| Error::NodeNotFound(node_id.to_string()))?;
        let edges = self.edges_of(&node_ref);
        let neighbors = self.other_ends(&node_ref, &edges);

        Ok(NodeDetail {
            node,
            neighbors,
            edges,
        })
    }

    /// An entity, its class nodes, and everything one hop away
    pub fn entity_group(&self, entity_name: &str) -> Result<NodeGroup> {
        let entity = self
            .graph
            .get_entity(entity_name)
            .ok_or_else(|| Error::EntityNotFound(entity_name.to_string()))?;
        let root = NodeRef::Entity {
            name: entity.name.clone(),
        };

        let mut group = NodeGroup::default();
        let mut seen = BTreeSet::new();
        self.push_node(&mut group, &mut seen, &root);

        for edge in self.edges_of(&root) {
            if let Some(other) = self.resolve_edge_end(&edge, &root) {
                self.push_node(&mut group, &mut seen, &other);
                if let NodeRef::ClassNode { .. } = other {
                    for class_edge in self.edges_of(&other) {
                        if class_edge.kind == EdgeKind::InstanceOf {
                            group.edges.push(class_edge);
                        }
                    }
                }
            }
            group.edges.push(edge);
        }
        Ok(group)
    }

    /// A class-master node, all class nodes instantiating it, and their
    /// one-hop edges
    pub fn class_group(&self, class_name: &str) -> Result<NodeGroup> {
        let class = self
            .system
            .get_class_definition(class_name)
            .ok_or_else(|| Error::UnknownClass(class_name.to_string()))?;
        let root = NodeRef::ClassMaster {
            class: class.name.clone(),
        };

        let mut group = NodeGroup::default();
        let mut seen = BTreeSet::new();
        self.push_node(&mut group, &mut seen, &root);

        for entity in self.instances_of(&class.name) {
            let class_node = NodeRef::ClassNode {
                entity: entity.name.clone(),
                class: class.name.clone(),
            };
            let entity_node = NodeRef::Entity {
                name: entity.name.clone(),
            };
            self.push_node(&mut group, &mut seen, &class_node);
            self.push_node(&mut group, &mut seen, &entity_node);
            group.edges.extend(self.edges_of(&class_node));
        }
        Ok(group)
    }

    /// Every node of the derived graph
    pub fn all_nodes(&self) -> Vec<GraphNode> {
        let mut nodes: Vec<GraphNode> = self
            .system
            .get_all_classes()
            .filter_map(|class| {
                self.node(&NodeRef::ClassMaster {
                    class: class.name.clone(),
                })
            })
            .collect();
        for entity in self.graph.entities() {
            nodes.push(entity_node(entity));
            for class in self.live_memberships(entity) {
                if let Some(node) = self.node(&NodeRef::ClassNode {
                    entity: entity.name.clone(),
                    class: class.to_string(),
                }) {
                    nodes.push(node);
                }
            }
        }
        nodes
    }

    /// Every edge of the derived graph
    pub fn all_edges(&self) -> Vec<GraphEdge> {
        let mut edges = Vec::new();
        for entity in self.graph.entities() {
            for class in self.live_memberships(entity) {
                let class_node = class_node_id(&entity.name, class);
                edges.push(GraphEdge::structural(
                    entity.name.clone(),
                    class_node.clone(),
                    EdgeKind::HasClass,
                ));
                edges.push(GraphEdge::structural(
                    class_node,
                    self.system
                        .canonical_class_name(class)
                        .unwrap_or(class)
                        .to_string(),
                    EdgeKind::InstanceOf,
                ));
            }
        }
        edges.extend(
            self.graph
                .relationships()
                .iter()
                .map(|r| self.relationship_edge(r)),
        );
        edges
    }

    fn instances_of(&self, class_name: &str) -> Vec<&'a Entity> {
        self.graph
            .entities()
            .filter(|entity| entity.has_class(class_name))
            .collect()
    }

    /// Class memberships whose class still exists in the registry
    fn live_memberships(&self, entity: &'a Entity) -> Vec<&'a str> {
        entity
            .classes
            .iter()
            .filter(|m| self.system.has_class(&m.class_name))
            .map(|m| m.class_name.as_str())
            .collect()
    }

    fn relationship_edge(&self, relationship: &Relationship) -> GraphEdge {
        let entity_name = |name: &str| {
            self.graph
                .get_entity(name)
                .map(|e| e.name.clone())
                .unwrap_or_else(|| name.to_string())
        };
        GraphEdge {
            source: entity_name(&relationship.source),
            target: entity_name(&relationship.target),
            kind: EdgeKind::Relationship,
            label: relationship.description.clone(),
            relationship_id: Some(relationship.id.clone()),
            count: Some(relationship.count),
            refer: relationship.refer.clone(),
        }
    }

    fn resolve_edge_end(&self, edge: &GraphEdge, from: &NodeRef) -> Option<NodeRef> {
        let from_source = canonical_key(&edge.source) == canonical_key(&from.id());
        let other = if from_source { &edge.target } else { &edge.source };
        let entity = |name: &str| {
            self.graph.get_entity(name).map(|e| NodeRef::Entity {
                name: e.name.clone(),
            })
        };
        match (edge.kind, from_source) {
            (EdgeKind::Relationship, _) | (EdgeKind::HasClass, false) => entity(other),
            (EdgeKind::HasClass, true) | (EdgeKind::InstanceOf, false) => {
                let (entity_name, class) = other.rsplit_once(':')?;
                Some(NodeRef::ClassNode {
                    entity: entity_name.to_string(),
                    class: class.to_string(),
                })
            }
            (EdgeKind::InstanceOf, true) => self
                .system
                .get_class_definition(other)
                .map(|c| NodeRef::ClassMaster {
                    class: c.name.clone(),
                }),
        }
    }

    fn other_ends(&self, from: &NodeRef, edges: &[GraphEdge]) -> Vec<GraphNode> {
        let mut seen = BTreeSet::new();
        seen.insert(from.id());
        let mut group = NodeGroup::default();
        for edge in edges {
            if let Some(other) = self.resolve_edge_end(edge, from) {
                self.push_node(&mut group, &mut seen, &other);
            }
        }
        group.nodes
    }

    fn push_node(&self, group: &mut NodeGroup, seen: &mut BTreeSet<String>, node: &NodeRef) {
        if seen.insert(node.id())
            && let Some(materialized) = self.node(node)
        {
            group.nodes.push(materialized);
        }
    }
}

fn entity_node(entity: &Entity) -> GraphNode {
    let mut node = GraphNode::new(
        entity.name.clone(),
        NodeKind::Entity,
        entity.name.clone(),
        entity.description.clone(),
    );
    node.classes = entity.class_names().into_iter().map(str::to_string).collect();
    node
}

fn is_endpoint(relationship: &Relationship, entity_name: &str) -> bool {
    let key = canonical_key(entity_name);
    canonical_key(&relationship.source) == key || canonical_key(&relationship.target) == key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::ClassProperties;

    fn fixture() -> (System, Graph) {
        let system = System::seeded();
        let mut graph = Graph::with_predefined_entities(&system).unwrap();
        let mut props = ClassProperties::new();
        props.insert(
            "App".to_string(),
            [("category".to_string(), "messaging".to_string())]
                .into_iter()
                .collect(),
        );
        graph
            .create_entity(&system, "Messages", "Messaging app", &["App".to_string()], &props)
            .unwrap();
        graph
            .create_entity(&system, "Alex", "A friend", &["Person".to_string()], &ClassProperties::new())
            .unwrap();
        graph
            .add_relationship(
                Relationship::new("User", "Alex", "sent a text to")
                    .with_refer(vec!["Messages".to_string()]),
            )
            .unwrap();
        (system, graph)
    }

    #[test]
    fn test_resolve_precedence() {
        let (system, graph) = fixture();
        let query = GraphQuery::new(&system, &graph);

        assert_eq!(
            query.resolve("alex"),
            Some(NodeRef::Entity { name: "Alex".into() })
        );
        assert_eq!(
            query.resolve("alex:person"),
            Some(NodeRef::ClassNode {
                entity: "Alex".into(),
                class: "Person".into()
            })
        );
        assert_eq!(
            query.resolve("PERSON"),
            Some(NodeRef::ClassMaster { class: "Person".into() })
        );
        assert_eq!(query.resolve("Alex:App"), None);
        assert_eq!(query.resolve("nobody"), None);
    }

    #[test]
    fn test_entity_neighbors() {
        let (system, graph) = fixture();
        let query = GraphQuery::new(&system, &graph);

        let neighbors = query.neighbors("User").unwrap();
        let ids: Vec<&str> = neighbors.iter().map(|n| n.id.as_str()).collect();
        assert!(ids.contains(&"User:Person"));
        assert!(ids.contains(&"Alex"));
        assert!(!ids.contains(&"User"));
    }

    #[test]
    fn test_class_node_neighbors() {
        let (system, graph) = fixture();
        let query = GraphQuery::new(&system, &graph);

        let neighbors = query.neighbors("Messages:App").unwrap();
        let kinds: Vec<NodeKind> = neighbors.iter().map(|n| n.kind).collect();
        assert_eq!(kinds, vec![NodeKind::Entity, NodeKind::ClassMaster]);
    }

    #[test]
    fn test_node_detail_for_class_master() {
        let (system, graph) = fixture();
        let query = GraphQuery::new(&system, &graph);

        let detail = query.node_detail("Person").unwrap();
        assert_eq!(detail.node.kind, NodeKind::ClassMaster);
        assert_eq!(detail.node.instance_count, Some(2));
        assert_eq!(detail.edges.len(), 2);
        assert!(detail.edges.iter().all(|e| e.kind == EdgeKind::InstanceOf));
    }

    #[test]
    fn test_node_detail_unknown() {
        let (system, graph) = fixture();
        let query = GraphQuery::new(&system, &graph);
        assert!(matches!(
            query.node_detail("Atlantis"),
            Err(Error::NodeNotFound(_))
        ));
    }

    #[test]
    fn test_entity_group() {
        let (system, graph) = fixture();
        let query = GraphQuery::new(&system, &graph);

        let group = query.entity_group("alex").unwrap();
        let ids: Vec<&str> = group.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids[0], "Alex");
        assert!(ids.contains(&"Alex:Person"));
        assert!(ids.contains(&"User"));
        assert!(group.edges.iter().any(|e| e.kind == EdgeKind::Relationship));
        assert!(group.edges.iter().any(|e| e.kind == EdgeKind::InstanceOf));
    }

    #[test]
    fn test_class_group() {
        let (system, graph) = fixture();
        let query = GraphQuery::new(&system, &graph);

        let group = query.class_group("app").unwrap();
        let ids: Vec<&str> = group.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["App", "Messages:App", "Messages"]);
        assert_eq!(group.edges.len(), 2);

        assert!(matches!(
            query.class_group("Spaceship"),
            Err(Error::UnknownClass(_))
        ));
    }

    #[test]
    fn test_all_nodes_and_edges() {
        let (system, graph) = fixture();
        let query = GraphQuery::new(&system, &graph);

        // 4 class masters + 3 entities + 3 class nodes
        assert_eq!(query.all_nodes().len(), 10);
        // 3 has_class + 3 instance_of + 1 relationship
        assert_eq!(query.all_edges().len(), 7);
    }
}
