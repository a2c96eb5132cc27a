//! Schema audit of stored entities
//!
//! Writes never fail on missing required properties; gaps are surfaced here
//! instead.

use serde::{Deserialize, Serialize};

use crate::domain::schema::System;

use super::store::Graph;

/// Kind of audit finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditIssue {
    /// A `required` property has no slot on the class node
    MissingRequiredProperty,
    /// A `value_required` property is present but unset or blank
    BlankRequiredValue,
    /// A stored property is not defined by the class
    UndefinedProperty,
    /// The entity belongs to a class the registry does not know
    UnknownClass,
}

impl AuditIssue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingRequiredProperty => "missing_required_property",
            Self::BlankRequiredValue => "blank_required_value",
            Self::UndefinedProperty => "undefined_property",
            Self::UnknownClass => "unknown_class",
        }
    }
}

impl std::fmt::Display for AuditIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFinding {
    pub entity: String,
    pub class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    pub issue: AuditIssue,
}

impl Graph {
    /// Check every class membership against the registry
    pub fn audit(&self, system: &System) -> Vec<AuditFinding> {
        let mut findings = Vec::new();
        let mut report = |entity: &str, class: &str, property: Option<&str>, issue| {
            findings.push(AuditFinding {
                entity: entity.to_string(),
                class: class.to_string(),
                property: property.map(str::to_string),
                issue,
            });
        };

        for entity in self.entities() {
            for membership in &entity.classes {
                let Some(class) = system.get_class_definition(&membership.class_name) else {
                    report(&entity.name, &membership.class_name, None, AuditIssue::UnknownClass);
                    continue;
                };

                for property in &class.properties {
                    let has_slot = membership
                        .properties
                        .keys()
                        .any(|k| property.is_named(k));
                    if property.required && !has_slot {
                        report(
                            &entity.name,
                            &class.name,
                            Some(property.name.as_str()),
                            AuditIssue::MissingRequiredProperty,
                        );
                    } else if has_slot
                        && property.value_required
                        && membership.value(&property.name).is_none()
                    {
                        report(
                            &entity.name,
                            &class.name,
                            Some(property.name.as_str()),
                            AuditIssue::BlankRequiredValue,
                        );
                    }
                }

                for stored in membership.properties.keys() {
                    if !class.has_property(stored) {
                        report(
                            &entity.name,
                            &class.name,
                            Some(stored.as_str()),
                            AuditIssue::UndefinedProperty,
                        );
                    }
                }
            }
        }
        findings
    }
}
