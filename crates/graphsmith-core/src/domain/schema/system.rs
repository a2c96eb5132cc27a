//! The schema registry
//!
//! `System` maps class names to definitions and carries the predefined
//! entities every graph starts with. It only ever grows: classes are never
//! removed and property flags only tighten. Storage is copy-on-write, so a
//! snapshot is a handful of reference-count bumps and later writes on either
//! side stay invisible to the other.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::canonical_key;
use crate::error::{Error, Result};

use super::definition::{ClassDefinition, PropertyDefinition};
use super::seed;

/// An entity every new graph is seeded with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredefinedEntity {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub classes: Vec<String>,
}

impl PredefinedEntity {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            classes: Vec::new(),
        }
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }
}

/// Outcome of adding a class definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassChange {
    /// A new class was inserted
    Added,
    /// An existing class gained properties, stricter flags or a description
    Enhanced,
    /// Nothing new
    Unchanged,
}

/// Schema registry with copy-on-write snapshots
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SystemData", into = "SystemData")]
pub struct System {
    classes: Arc<Vec<Arc<ClassDefinition>>>,
    index: Arc<HashMap<String, usize>>,
    predefined_entities: Arc<Vec<PredefinedEntity>>,
}

/// Serialized form of a `System`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemData {
    pub classes: Vec<ClassDefinition>,
    #[serde(default)]
    pub predefined_entities: Vec<PredefinedEntity>,
}

impl System {
    /// A registry with no classes and no predefined entities
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in seed classes and predefined entities
    pub fn seeded() -> Self {
        let mut system = Self::empty();
        for class in seed::seed_classes() {
            system.upsert(class);
        }
        system.predefined_entities = Arc::new(seed::seed_predefined_entities());
        system
    }

    /// Build a registry from definitions, merging repeats through the same
    /// monotonic rules as `add_class_definition`
    pub fn from_definitions(
        classes: impl IntoIterator<Item = ClassDefinition>,
        predefined_entities: impl IntoIterator<Item = PredefinedEntity>,
    ) -> Result<Self> {
        let mut system = Self::empty();
        for class in classes {
            system.add_class_definition(class)?;
        }
        for entity in predefined_entities {
            system.add_predefined_entity(entity)?;
        }
        Ok(system)
    }

    /// An independent copy; O(1)
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    /// Whether both registries still share the same class storage
    pub fn shares_storage_with(&self, other: &System) -> bool {
        Arc::ptr_eq(&self.classes, &other.classes)
    }

    /// Validate a definition against the registry without changing it
    pub fn check_class_definition(&self, definition: &ClassDefinition) -> Result<ClassChange> {
        self.plan(definition).map(|(change, _)| change)
    }

    /// Insert a class, or merge it into an existing one as a pure enhancement
    ///
    /// Fails with `SchemaViolation` if the definition would relax a
    /// `required`/`value_required` flag or has an empty name.
    pub fn add_class_definition(&mut self, definition: ClassDefinition) -> Result<ClassChange> {
        let (change, merged) = self.plan(&definition)?;
        if let Some(merged) = merged {
            debug!(class = %merged.name, change = ?change, "Schema registry updated");
            self.upsert(merged);
        }
        Ok(change)
    }

    /// Add one property to an existing class
    pub fn add_property(
        &mut self,
        class_name: &str,
        property: PropertyDefinition,
    ) -> Result<ClassChange> {
        let existing = self
            .get_class_definition(class_name)
            .ok_or_else(|| Error::UnknownClass(class_name.to_string()))?;
        let definition = ClassDefinition::new(existing.name.clone()).with_property(property);
        self.add_class_definition(definition)
    }

    /// Classes can never be removed
    pub fn remove_class_definition(&self, class_name: &str) -> Result<()> {
        Err(Error::schema_violation(
            class_name,
            "classes cannot be removed from the schema registry",
        ))
    }

    /// Properties can never be removed
    pub fn remove_property(&self, class_name: &str, property_name: &str) -> Result<()> {
        Err(Error::schema_violation(
            class_name,
            format!("property '{}' cannot be removed", property_name),
        ))
    }

    /// Look up a class by name (case-insensitive)
    pub fn get_class_definition(&self, name: &str) -> Option<&ClassDefinition> {
        self.index
            .get(&canonical_key(name))
            .and_then(|&i| self.classes.get(i))
            .map(|class| class.as_ref())
    }

    pub fn has_class(&self, name: &str) -> bool {
        self.index.contains_key(&canonical_key(name))
    }

    /// The registry's spelling of a class name
    pub fn canonical_class_name(&self, name: &str) -> Option<&str> {
        self.get_class_definition(name).map(|c| c.name.as_str())
    }

    /// All classes in insertion order
    pub fn get_all_classes(&self) -> impl Iterator<Item = &ClassDefinition> {
        self.classes.iter().map(|class| class.as_ref())
    }

    pub fn class_names(&self) -> Vec<String> {
        self.get_all_classes().map(|c| c.name.clone()).collect()
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn predefined_entities(&self) -> &[PredefinedEntity] {
        &self.predefined_entities
    }

    /// Register a predefined entity; its classes must exist
    pub fn add_predefined_entity(&mut self, entity: PredefinedEntity) -> Result<()> {
        if entity.name.trim().is_empty() {
            return Err(Error::InvalidInput(
                "predefined entity name must not be empty".to_string(),
            ));
        }
        for class in &entity.classes {
            if !self.has_class(class) {
                return Err(Error::UnknownClass(class.clone()));
            }
        }

        let key = canonical_key(&entity.name);
        let entities = Arc::make_mut(&mut self.predefined_entities);
        match entities.iter_mut().find(|e| canonical_key(&e.name) == key) {
            Some(existing) => *existing = entity,
            None => entities.push(entity),
        }
        Ok(())
    }

    /// Compact JSON catalogue of the classes, used in prompts
    pub fn catalog_json(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.get_all_classes()
                .map(|class| {
                    serde_json::json!({
                        "name": class.name,
                        "description": class.description,
                        "properties": class.properties,
                    })
                })
                .collect(),
        )
    }

    /// Work out what adding `incoming` would do, and the merged definition
    /// when something changes
    fn plan(&self, incoming: &ClassDefinition) -> Result<(ClassChange, Option<ClassDefinition>)> {
        let name = incoming.name.trim();
        if name.is_empty() {
            return Err(Error::schema_violation(
                "(unnamed)",
                "class name must not be empty",
            ));
        }

        match self.get_class_definition(name) {
            Some(existing) => match enhance(existing, incoming)? {
                Some(merged) => Ok((ClassChange::Enhanced, Some(merged))),
                None => Ok((ClassChange::Unchanged, None)),
            },
            None => {
                let base = ClassDefinition::new(name);
                let created = enhance(&base, incoming)?.unwrap_or(base);
                Ok((ClassChange::Added, Some(created)))
            }
        }
    }

    fn upsert(&mut self, definition: ClassDefinition) {
        let key = definition.key();
        if let Some(&i) = self.index.get(&key) {
            Arc::make_mut(&mut self.classes)[i] = Arc::new(definition);
        } else {
            let classes = Arc::make_mut(&mut self.classes);
            classes.push(Arc::new(definition));
            let position = classes.len() - 1;
            Arc::make_mut(&mut self.index).insert(key, position);
        }
    }
}

/// Merge `incoming` into `existing`; `None` when nothing changes
fn enhance(
    existing: &ClassDefinition,
    incoming: &ClassDefinition,
) -> Result<Option<ClassDefinition>> {
    let mut merged = existing.clone();
    let mut changed = false;

    let description = incoming.description.trim();
    if !description.is_empty() && description != merged.description {
        merged.description = description.to_string();
        changed = true;
    }

    for property in &incoming.properties {
        let property_name = property.name.trim();
        if property_name.is_empty() {
            return Err(Error::schema_violation(
                &merged.name,
                "property name must not be empty",
            ));
        }

        match merged.properties.iter_mut().find(|p| p.is_named(property_name)) {
            Some(current) => {
                if current.required && !property.required {
                    return Err(Error::schema_violation(
                        &merged.name,
                        format!("property '{}' cannot stop being required", current.name),
                    ));
                }
                if current.value_required && !property.value_required {
                    return Err(Error::schema_violation(
                        &merged.name,
                        format!(
                            "property '{}' cannot stop requiring a value",
                            current.name
                        ),
                    ));
                }
                if property.required && !current.required {
                    current.required = true;
                    changed = true;
                }
                if property.value_required && !current.value_required {
                    current.value_required = true;
                    changed = true;
                }
                let property_description = property.description.trim();
                if !property_description.is_empty() && property_description != current.description
                {
                    current.description = property_description.to_string();
                    changed = true;
                }
            }
            None => {
                let mut added = property.clone();
                added.name = property_name.to_string();
                merged.properties.push(added);
                changed = true;
            }
        }
    }

    Ok(changed.then_some(merged))
}

impl TryFrom<SystemData> for System {
    type Error = Error;

    fn try_from(data: SystemData) -> Result<Self> {
        System::from_definitions(data.classes, data.predefined_entities)
    }
}

impl From<System> for SystemData {
    fn from(system: System) -> Self {
        SystemData {
            classes: system.get_all_classes().cloned().collect(),
            predefined_entities: system.predefined_entities.to_vec(),
        }
    }
}
