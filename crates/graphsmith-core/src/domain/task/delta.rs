//! Proposed, not-yet-applied graph changes
//!
//! A `GraphDelta` is what an extraction worker hands to the merge lane. It
//! never touches the live knowledge base by itself.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::graph::{ClassProperties, Relationship};
use crate::domain::schema::{ClassDefinition, PropertyDefinition};

/// Operation tag carried by every delta element
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaOperation {
    #[default]
    Add,
    Update,
    /// Fold this entity into `merge_target` (smart merge only)
    Merge,
}

impl DeltaOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Merge => "merge",
        }
    }
}

impl std::fmt::Display for DeltaOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A property addition or tightening
///
/// `None` flags carry no opinion and inherit whatever the registry holds
/// when the delta is applied; only `Some(false)` against a live `true` is a
/// weakening.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDelta {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_required: Option<bool>,
}

impl PropertyDelta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            description: String::new(),
            required: None,
            value_required: None,
        }
    }

    /// Resolve the tri-state flags against the current definition
    fn resolve(&self, existing: Option<&PropertyDefinition>) -> PropertyDefinition {
        let inherited_required = existing.map(|p| p.required).unwrap_or(false);
        let inherited_value_required = existing.map(|p| p.value_required).unwrap_or(false);

        PropertyDefinition {
            name: self.name.trim().to_string(),
            description: self.description.trim().to_string(),
            required: self.required.unwrap_or(inherited_required),
            value_required: self.value_required.unwrap_or(inherited_value_required),
        }
    }
}

/// A class addition or enhancement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDelta {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub properties: Vec<PropertyDelta>,
    #[serde(default)]
    pub operation: DeltaOperation,
}

impl ClassDelta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            description: String::new(),
            properties: Vec::new(),
            operation: DeltaOperation::Add,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_property(mut self, property: PropertyDelta) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_operation(mut self, operation: DeltaOperation) -> Self {
        self.operation = operation;
        self
    }

    /// A delta stating every flag of `definition` explicitly
    pub fn from_definition(definition: &ClassDefinition, operation: DeltaOperation) -> Self {
        Self {
            name: definition.name.clone(),
            description: definition.description.clone(),
            properties: definition
                .properties
                .iter()
                .map(|p| PropertyDelta {
                    name: p.name.clone(),
                    description: p.description.clone(),
                    required: Some(p.required),
                    value_required: Some(p.value_required),
                })
                .collect(),
            operation,
        }
    }

    /// The class definition this delta amounts to, given the registry's
    /// current definition of the same class
    pub fn resolve_against(&self, existing: Option<&ClassDefinition>) -> ClassDefinition {
        ClassDefinition {
            name: self.name.trim().to_string(),
            description: self.description.trim().to_string(),
            properties: self
                .properties
                .iter()
                .map(|p| p.resolve(existing.and_then(|class| class.property(&p.name))))
                .collect(),
        }
    }

    /// Keep only the flags this delta tightens
    ///
    /// Once a delta has been accepted by a registry, an explicit `false` can
    /// only restate what that registry held. Dropping it lets the delta be
    /// replayed against a registry that has since tightened the same flag.
    pub fn into_tightenings(mut self) -> Self {
        for property in &mut self.properties {
            property.required = property.required.filter(|required| *required);
            property.value_required = property.value_required.filter(|required| *required);
        }
        self
    }
}

/// A proposed entity creation or update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDelta {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub properties: ClassProperties,
    #[serde(default)]
    pub operation: DeltaOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_target: Option<String>,
}

impl EntityDelta {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            description: description.into().trim().to_string(),
            classes: Vec::new(),
            properties: ClassProperties::new(),
            operation: DeltaOperation::Add,
            merge_target: None,
        }
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        let class = class.into();
        if !self.classes.iter().any(|c| c.eq_ignore_ascii_case(&class)) {
            self.classes.push(class);
        }
        self
    }

    pub fn with_property(
        mut self,
        class: impl Into<String>,
        property: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.set_property(class, property, value);
        self
    }

    pub fn with_operation(mut self, operation: DeltaOperation) -> Self {
        self.operation = operation;
        self
    }

    pub fn set_property(
        &mut self,
        class: impl Into<String>,
        property: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.properties
            .entry(class.into())
            .or_default()
            .insert(property.into(), value.into());
    }

    /// Number of property values carried
    pub fn property_count(&self) -> usize {
        self.properties.values().map(BTreeMap::len).sum()
    }
}

/// A proposed relationship occurrence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDelta {
    pub source: String,
    pub target: String,
    pub description: String,
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default)]
    pub refer: Vec<String>,
    #[serde(default)]
    pub operation: DeltaOperation,
}

fn default_count() -> u32 {
    1
}

impl RelationshipDelta {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into().trim().to_string(),
            target: target.into().trim().to_string(),
            description: description.into().trim().to_string(),
            count: 1,
            refer: Vec::new(),
            operation: DeltaOperation::Add,
        }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn with_refer(mut self, refer: Vec<String>) -> Self {
        self.refer = refer;
        self
    }

    /// The stored relationship this delta proposes
    pub fn to_relationship(&self) -> Relationship {
        Relationship::new(&self.source, &self.target, &self.description)
            .with_count(self.count)
            .with_refer(self.refer.clone())
    }
}

/// Everything one task proposes to change
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDelta {
    pub task_id: String,
    #[serde(default)]
    pub classes: Vec<ClassDelta>,
    #[serde(default)]
    pub entities: Vec<EntityDelta>,
    #[serde(default)]
    pub relationships: Vec<RelationshipDelta>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl GraphDelta {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.entities.is_empty() && self.relationships.is_empty()
    }

    /// Element counts, as recorded in stage results
    pub fn counts(&self) -> serde_json::Value {
        serde_json::json!({
            "classes": self.classes.len(),
            "entities": self.entities.len(),
            "relationships": self.relationships.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_flags_inherit_live_values() {
        let live = ClassDefinition::new("App")
            .with_property(PropertyDefinition::new("package_name").required());

        let delta = ClassDelta::new("App").with_property(PropertyDelta::new("package_name"));
        let resolved = delta.resolve_against(Some(&live));

        assert!(resolved.properties[0].required);
        assert!(!resolved.properties[0].value_required);
    }

    #[test]
    fn test_explicit_false_is_kept_for_validation() {
        let live = ClassDefinition::new("App")
            .with_property(PropertyDefinition::new("package_name").required());

        let mut property = PropertyDelta::new("package_name");
        property.required = Some(false);
        let resolved = ClassDelta::new("App")
            .with_property(property)
            .resolve_against(Some(&live));

        assert!(!resolved.properties[0].required);
    }

    #[test]
    fn test_tightenings_drop_explicit_false() {
        let mut number = PropertyDelta::new("number");
        number.required = Some(false);
        number.value_required = Some(true);
        let delta = ClassDelta::new("Flight").with_property(number).into_tightenings();

        assert_eq!(delta.properties[0].required, None);
        assert_eq!(delta.properties[0].value_required, Some(true));

        let live = ClassDefinition::new("Flight")
            .with_property(PropertyDefinition::new("number").required());
        assert!(delta.resolve_against(Some(&live)).properties[0].required);
    }

    #[test]
    fn test_from_definition_states_every_flag() {
        let definition = ClassDefinition::new("Content")
            .with_property(PropertyDefinition::new("content_type").required());
        let delta = ClassDelta::from_definition(&definition, DeltaOperation::Update);

        assert_eq!(delta.operation, DeltaOperation::Update);
        assert_eq!(delta.properties[0].required, Some(true));
        assert_eq!(delta.properties[0].value_required, Some(false));
        assert_eq!(delta.resolve_against(None), definition);
    }

    #[test]
    fn test_property_delta_deserializes_missing_flags_as_none() {
        let property: PropertyDelta =
            serde_json::from_str(r#"{"name": "genre", "required": true}"#).unwrap();
        assert_eq!(property.required, Some(true));
        assert_eq!(property.value_required, None);
    }

    #[test]
    fn test_entity_delta_builders() {
        let delta = EntityDelta::new("Alex", "A friend")
            .with_class("Person")
            .with_class("person")
            .with_property("Person", "relation", "friend");

        assert_eq!(delta.classes, vec!["Person"]);
        assert_eq!(delta.property_count(), 1);
        assert_eq!(delta.operation, DeltaOperation::Add);
    }

    #[test]
    fn test_relationship_delta_to_relationship() {
        let rel = RelationshipDelta::new("User", "Alex", "called")
            .with_count(0)
            .with_refer(vec!["WhatsApp".to_string()])
            .to_relationship();
        assert_eq!(rel.count, 1);
        assert_eq!(rel.refer, vec!["WhatsApp"]);
    }

    #[test]
    fn test_graph_delta_counts() {
        let mut delta = GraphDelta::new("task-1");
        assert!(delta.is_empty());
        delta.entities.push(EntityDelta::new("Alex", ""));
        assert!(!delta.is_empty());
        assert_eq!(delta.counts()["entities"], 1);
    }
}
