//! Entities and their class memberships

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::canonical_key;

/// Property values of one class membership; `None` means declared but unset
pub type PropertyValues = BTreeMap<String, Option<String>>;

/// An entity's membership in one class, with that class's property values
///
/// Each membership surfaces in the node graph as the class node
/// `entity:class`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassMembership {
    pub class_name: String,
    #[serde(default)]
    pub properties: PropertyValues,
}

impl ClassMembership {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            properties: PropertyValues::new(),
        }
    }

    /// Value of a property, if set and not blank
    pub fn value(&self, property: &str) -> Option<&str> {
        self.find_key(property)
            .and_then(|key| self.properties.get(key))
            .and_then(|value| value.as_deref())
            .filter(|value| !value.trim().is_empty())
    }

    /// Fill a property only if it is unset or blank; returns whether it changed
    pub fn fill(&mut self, property: &str, value: &str) -> bool {
        if value.trim().is_empty() || self.value(property).is_some() {
            return false;
        }
        self.write(property, value)
    }

    /// Overwrite a property; returns whether it changed
    pub fn overwrite(&mut self, property: &str, value: &str) -> bool {
        if self.value(property) == Some(value) {
            return false;
        }
        self.write(property, value)
    }

    fn write(&mut self, property: &str, value: &str) -> bool {
        let key = self
            .find_key(property)
            .map(str::to_string)
            .unwrap_or_else(|| property.trim().to_string());
        self.properties.insert(key, Some(value.trim().to_string()));
        true
    }

    fn find_key(&self, property: &str) -> Option<&str> {
        let wanted = canonical_key(property);
        self.properties
            .keys()
            .find(|k| canonical_key(k) == wanted)
            .map(String::as_str)
    }
}

/// A node in the knowledge graph; unique by case-insensitive name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub classes: Vec<ClassMembership>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into().trim().to_string(),
            description: description.into().trim().to_string(),
            classes: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Lookup key of this entity
    pub fn key(&self) -> String {
        canonical_key(&self.name)
    }

    pub fn has_class(&self, class_name: &str) -> bool {
        self.class(class_name).is_some()
    }

    pub fn class(&self, class_name: &str) -> Option<&ClassMembership> {
        let wanted = canonical_key(class_name);
        self.classes
            .iter()
            .find(|m| canonical_key(&m.class_name) == wanted)
    }

    pub fn class_mut(&mut self, class_name: &str) -> Option<&mut ClassMembership> {
        let wanted = canonical_key(class_name);
        self.classes
            .iter_mut()
            .find(|m| canonical_key(&m.class_name) == wanted)
    }

    pub fn class_names(&self) -> Vec<&str> {
        self.classes.iter().map(|m| m.class_name.as_str()).collect()
    }

    /// Add a class membership if missing; returns whether it was added
    pub fn add_class(&mut self, class_name: &str) -> bool {
        if self.has_class(class_name) {
            return false;
        }
        self.classes.push(ClassMembership::new(class_name));
        self.touch();
        true
    }

    /// Merge in another description
    ///
    /// An empty description is replaced; a different one is appended unless
    /// already contained.
    pub fn merge_description(&mut self, description: &str) -> bool {
        let incoming = description.trim();
        if incoming.is_empty() || self.description.contains(incoming) {
            return false;
        }
        if self.description.trim().is_empty() {
            self.description = incoming.to_string();
        } else if incoming.contains(self.description.trim()) {
            self.description = incoming.to_string();
        } else {
            self.description = format!("{}; {}", self.description.trim_end(), incoming);
        }
        self.touch();
        true
    }

    /// Number of class memberships
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
