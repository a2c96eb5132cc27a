//! The graph store
//!
//! Holds entities (keyed by case-insensitive name) and occurrence-counted
//! relationships. Every write is validated against a `System`; class nodes
//! and class-master nodes are derived views and never stored here.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::canonical_key;
use crate::domain::schema::System;
use crate::error::{Error, Result};

use super::entity::Entity;
use super::relationship::{Relationship, RelationshipKey};

/// Per-class property values supplied when creating an entity
pub type ClassProperties = BTreeMap<String, BTreeMap<String, String>>;

/// Outcome of `Graph::create_entity`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityUpsert {
    Created,
    Updated,
    Unchanged,
}

/// Outcome of `Graph::add_relationship`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RelationshipUpsert {
    Inserted { id: String },
    Incremented { id: String, count: u32 },
}

/// Entities and relationships of the knowledge graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GraphData", into = "GraphData")]
pub struct Graph {
    entities: BTreeMap<String, Entity>,
    relationships: Vec<Relationship>,
    edge_index: HashMap<RelationshipKey, usize>,
}

/// Serialized form of a `Graph`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphData {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// A graph holding the registry's predefined entities
    pub fn with_predefined_entities(system: &System) -> Result<Self> {
        let mut graph = Self::new();
        graph.seed_predefined_entities(system)?;
        Ok(graph)
    }

    /// Make sure every predefined entity exists
    pub fn seed_predefined_entities(&mut self, system: &System) -> Result<()> {
        for predefined in system.predefined_entities() {
            self.create_entity(
                system,
                &predefined.name,
                &predefined.description,
                &predefined.classes,
                &ClassProperties::new(),
            )?;
        }
        Ok(())
    }

    /// Rebuild a graph from stored parts
    pub fn from_parts(entities: Vec<Entity>, relationships: Vec<Relationship>) -> Result<Self> {
        let mut graph = Self::new();
        for entity in entities {
            let key = entity.key();
            if graph.entities.insert(key, entity).is_some() {
                return Err(Error::InvalidInput(
                    "duplicate entity name in stored graph".to_string(),
                ));
            }
        }
        for relationship in relationships {
            for endpoint in [&relationship.source, &relationship.target] {
                if !graph.contains_entity(endpoint) {
                    return Err(Error::EntityNotFound(endpoint.clone()));
                }
            }
            let key = relationship.key();
            if graph.edge_index.contains_key(&key) {
                return Err(Error::InvalidInput(format!(
                    "duplicate relationship '{}' in stored graph",
                    relationship.id
                )));
            }
            graph.edge_index.insert(key, graph.relationships.len());
            graph.relationships.push(relationship);
        }
        Ok(graph)
    }

    pub fn get_entity(&self, name: &str) -> Option<&Entity> {
        self.entities.get(&canonical_key(name))
    }

    pub fn contains_entity(&self, name: &str) -> bool {
        self.entities.contains_key(&canonical_key(name))
    }

    /// All entities, ordered by lookup key
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// All relationships in insertion order
    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn get_relationship(&self, id: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.id == id)
    }

    pub fn find_relationship(&self, key: &RelationshipKey) -> Option<&Relationship> {
        self.edge_index.get(key).map(|&i| &self.relationships[i])
    }

    /// Relationships in which the entity takes part
    pub fn relationships_of(&self, entity_name: &str) -> Vec<&Relationship> {
        self.relationships
            .iter()
            .filter(|r| r.involves(entity_name))
            .collect()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    /// Number of class nodes whose class exists in the registry
    pub fn class_node_count(&self, system: &System) -> usize {
        self.entities
            .values()
            .flat_map(|e| e.classes.iter())
            .filter(|m| system.has_class(&m.class_name))
            .count()
    }

    /// Create an entity, or merge into the existing one with the same name
    ///
    /// Classes are unioned; property values only fill unset or blank slots;
    /// descriptions are merged without duplication. Every class must exist in
    /// `system` and every property must be defined on its class.
    pub fn create_entity(
        &mut self,
        system: &System,
        name: &str,
        description: &str,
        class_names: &[String],
        properties: &ClassProperties,
    ) -> Result<EntityUpsert> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("entity name must not be empty".to_string()));
        }

        let classes = resolve_classes(system, class_names.iter().chain(properties.keys()))?;
        validate_properties(system, properties)?;

        let key = canonical_key(name);
        let created = !self.entities.contains_key(&key);
        let entity = self
            .entities
            .entry(key)
            .or_insert_with(|| Entity::new(name, ""));

        let mut changed = entity.merge_description(description);
        for class in &classes {
            changed |= entity.add_class(class);
        }
        for (class, values) in properties {
            let canonical = system.canonical_class_name(class).unwrap_or(class.as_str());
            if let Some(membership) = entity.class_mut(canonical) {
                for (property, value) in values {
                    changed |= membership.fill(property, value);
                }
            }
        }

        Ok(if created {
            debug!(entity = %name, classes = classes.len(), "Entity created");
            EntityUpsert::Created
        } else if changed {
            entity.touch();
            EntityUpsert::Updated
        } else {
            EntityUpsert::Unchanged
        })
    }

    /// Attach a class to an existing entity
    ///
    /// Required properties left unset are only reported by the audit.
    pub fn add_class_to_entity(
        &mut self,
        system: &System,
        entity_name: &str,
        class_name: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<bool> {
        let class = system
            .get_class_definition(class_name)
            .ok_or_else(|| Error::UnknownClass(class_name.to_string()))?;
        for property in properties.keys() {
            if !class.has_property(property) {
                return Err(Error::UnknownProperty {
                    class: class.name.clone(),
                    property: property.clone(),
                });
            }
        }
        let entity = self
            .entities
            .get_mut(&canonical_key(entity_name))
            .ok_or_else(|| Error::EntityNotFound(entity_name.to_string()))?;

        let mut changed = entity.add_class(&class.name);
        if let Some(membership) = entity.class_mut(&class.name) {
            for (property, value) in properties {
                changed |= membership.fill(property, value);
            }
        }
        if changed {
            entity.touch();
        }
        Ok(changed)
    }

    /// Overwrite one property value of an entity's class membership
    pub fn set_property_value(
        &mut self,
        system: &System,
        entity_name: &str,
        class_name: &str,
        property: &str,
        value: &str,
    ) -> Result<bool> {
        let class = system
            .get_class_definition(class_name)
            .ok_or_else(|| Error::UnknownClass(class_name.to_string()))?;
        if !class.has_property(property) {
            return Err(Error::UnknownProperty {
                class: class.name.clone(),
                property: property.to_string(),
            });
        }
        let entity = self
            .entities
            .get_mut(&canonical_key(entity_name))
            .ok_or_else(|| Error::EntityNotFound(entity_name.to_string()))?;

        entity.add_class(&class.name);
        let changed = entity
            .class_mut(&class.name)
            .map(|membership| membership.overwrite(property, value))
            .unwrap_or(false);
        if changed {
            entity.touch();
        }
        Ok(changed)
    }

    /// Insert a relationship, or bump the count of the identical one
    pub fn add_relationship(&mut self, relationship: Relationship) -> Result<RelationshipUpsert> {
        for endpoint in [&relationship.source, &relationship.target] {
            if !self.contains_entity(endpoint) {
                return Err(Error::EntityNotFound(endpoint.clone()));
            }
        }
        if relationship.description.is_empty() {
            return Err(Error::InvalidInput(
                "relationship description must not be empty".to_string(),
            ));
        }

        let key = relationship.key();
        if let Some(&i) = self.edge_index.get(&key) {
            let existing = &mut self.relationships[i];
            existing.observe(relationship.count);
            return Ok(RelationshipUpsert::Incremented {
                id: existing.id.clone(),
                count: existing.count,
            });
        }

        let id = relationship.id.clone();
        self.edge_index.insert(key, self.relationships.len());
        self.relationships.push(relationship);
        Ok(RelationshipUpsert::Inserted { id })
    }
}

fn resolve_classes<'a>(
    system: &System,
    names: impl Iterator<Item = &'a String>,
) -> Result<Vec<String>> {
    let mut classes: Vec<String> = Vec::new();
    for name in names {
        let canonical = system
            .canonical_class_name(name)
            .ok_or_else(|| Error::UnknownClass(name.clone()))?;
        if !classes.iter().any(|c| c == canonical) {
            classes.push(canonical.to_string());
        }
    }
    Ok(classes)
}

fn validate_properties(system: &System, properties: &ClassProperties) -> Result<()> {
    for (class_name, values) in properties {
        let class = system
            .get_class_definition(class_name)
            .ok_or_else(|| Error::UnknownClass(class_name.clone()))?;
        for property in values.keys() {
            if !class.has_property(property) {
                return Err(Error::UnknownProperty {
                    class: class.name.clone(),
                    property: property.clone(),
                });
            }
        }
    }
    Ok(())
}

impl TryFrom<GraphData> for Graph {
    type Error = Error;

    fn try_from(data: GraphData) -> Result<Self> {
        Graph::from_parts(data.entities, data.relationships)
    }
}

impl From<Graph> for GraphData {
    fn from(graph: Graph) -> Self {
        GraphData {
            entities: graph.entities.into_values().collect(),
            relationships: graph.relationships,
        }
    }
}
