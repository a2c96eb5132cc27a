//! Class and property definitions

use serde::{Deserialize, Serialize};

use crate::domain::canonical_key;

/// A property a class instance may carry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// The property must be present on every instance
    #[serde(default)]
    pub required: bool,
    /// When present, the property must have a non-blank value
    #[serde(default)]
    pub value_required: bool,
}

impl PropertyDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            description: String::new(),
            required: false,
            value_required: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn value_required(mut self) -> Self {
        self.value_required = true;
        self
    }

    /// Case-insensitive name comparison
    pub fn is_named(&self, name: &str) -> bool {
        canonical_key(&self.name) == canonical_key(name)
    }
}

/// A class in the schema registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub properties: Vec<PropertyDefinition>,
}

impl ClassDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            description: String::new(),
            properties: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_property(mut self, property: PropertyDefinition) -> Self {
        self.properties.push(property);
        self
    }

    /// Registry key for this class
    pub fn key(&self) -> String {
        canonical_key(&self.name)
    }

    /// Look up a property by name (case-insensitive)
    pub fn property(&self, name: &str) -> Option<&PropertyDefinition> {
        self.properties.iter().find(|p| p.is_named(name))
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.property(name).is_some()
    }

    /// Properties every instance must carry
    pub fn required_properties(&self) -> impl Iterator<Item = &PropertyDefinition> {
        self.properties.iter().filter(|p| p.required)
    }

    pub fn property_names(&self) -> Vec<&str> {
        self.properties.iter().map(|p| p.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let class = ClassDefinition::new("  App ")
            .with_description("A mobile application")
            .with_property(PropertyDefinition::new("package").required())
            .with_property(PropertyDefinition::new("category").value_required());

        assert_eq!(class.name, "App");
        assert_eq!(class.key(), "app");
        assert_eq!(class.property_names(), vec!["package", "category"]);
        assert_eq!(class.required_properties().count(), 1);
    }

    #[test]
    fn test_property_lookup_is_case_insensitive() {
        let class = ClassDefinition::new("Person")
            .with_property(PropertyDefinition::new("Relation"));
        assert!(class.has_property("relation"));
        assert!(class.has_property("RELATION"));
        assert!(!class.has_property("age"));
    }

    #[test]
    fn test_flags_default_to_false_when_deserialized() {
        let property: PropertyDefinition =
            serde_json::from_str(r#"{"name": "title"}"#).unwrap();
        assert!(!property.required);
        assert!(!property.value_required);
        assert!(property.description.is_empty());
    }
}
