//! Entity and relationship extraction
//!
//! Renders the extraction prompt for a task's (possibly extended) registry
//! snapshot, parses the delimited records and assembles them into delta
//! elements. Records the snapshot cannot accommodate are dropped and
//! counted alongside the malformed ones.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ExtractionConfig;
use crate::domain::canonical_key;
use crate::domain::schema::System;
use crate::domain::task::{EntityDelta, RelationshipDelta};
use crate::error::Result;
use crate::llm::{FormatHint, RetryPolicy, TextGenerator};
use crate::prompts::render;

use super::StageContext;
use super::records::{DroppedRecord, ExtractionRecord, RecordFormat, parse_records};

/// Dropped records listed verbatim in the stage result
const MAX_REPORTED_DROPS: usize = 20;

/// Result of the extraction stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    pub entities: Vec<EntityDelta>,
    pub relationships: Vec<RelationshipDelta>,
    pub dropped: Vec<DroppedRecord>,
}

impl ExtractionOutcome {
    /// Stage-result payload for `extraction`
    pub fn to_payload(&self) -> serde_json::Value {
        let entities: Vec<_> = self
            .entities
            .iter()
            .map(|e| {
                serde_json::json!({
                    "name": e.name,
                    "classes": e.classes,
                    "properties": e.property_count(),
                })
            })
            .collect();
        let relationships: Vec<_> = self
            .relationships
            .iter()
            .map(|r| {
                serde_json::json!({
                    "source": r.source,
                    "target": r.target,
                    "description": r.description,
                    "count": r.count,
                    "refer": r.refer,
                })
            })
            .collect();

        serde_json::json!({
            "entity_count": self.entities.len(),
            "relationship_count": self.relationships.len(),
            "entities": entities,
            "relationships": relationships,
            "dropped_records": self.dropped.len(),
            "dropped": self.dropped.iter().take(MAX_REPORTED_DROPS).collect::<Vec<_>>(),
        })
    }
}

/// Extracts graph deltas from text
#[derive(Clone)]
pub struct GraphExtractor {
    generator: Arc<dyn TextGenerator>,
    retry: RetryPolicy,
    template: String,
    format: RecordFormat,
    language: String,
}

impl GraphExtractor {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        retry: RetryPolicy,
        template: impl Into<String>,
        config: &ExtractionConfig,
    ) -> Self {
        Self {
            generator,
            retry,
            template: template.into(),
            format: RecordFormat::from_config(config),
            language: config.language.clone(),
        }
    }

    pub fn format(&self) -> &RecordFormat {
        &self.format
    }

    pub fn build_prompt(&self, system: &System, text: &str) -> Result<String> {
        let classes = serde_json::to_string_pretty(&system.catalog_json())?;
        let predefined = serde_json::to_string_pretty(system.predefined_entities())?;

        Ok(render(
            &self.template,
            &[
                ("classes", &classes),
                ("predefined_entities", &predefined),
                ("text", text),
                ("tuple_delimiter", &self.format.tuple_delimiter),
                ("record_delimiter", &self.format.record_delimiter),
                ("completion_delimiter", &self.format.completion_delimiter),
                ("language", &self.language),
            ],
        ))
    }

    /// Extract entities and relationships from `text`
    pub async fn extract(
        &self,
        system: &System,
        text: &str,
        ctx: &StageContext<'_>,
    ) -> Result<ExtractionOutcome> {
        let prompt = self.build_prompt(system, text)?;
        let response = self
            .retry
            .complete(
                self.generator.as_ref(),
                &prompt,
                FormatHint::ExtractionRecords,
                ctx.cancel,
                ctx.task_id,
            )
            .await?;

        let outcome = self.assemble(system, &response);
        info!(
            task_id = %ctx.task_id,
            entities = outcome.entities.len(),
            relationships = outcome.relationships.len(),
            dropped = outcome.dropped.len(),
            "Extraction finished"
        );
        Ok(outcome)
    }

    /// Turn a raw answer into delta elements against `system`
    pub fn assemble(&self, system: &System, response: &str) -> ExtractionOutcome {
        let parsed = parse_records(response, &self.format);
        let mut builder = DeltaBuilder::new(system);
        builder.outcome.dropped = parsed.dropped;

        // entities first so property records can attach regardless of order
        let (entities, rest): (Vec<_>, Vec<_>) = parsed
            .records
            .into_iter()
            .partition(|r| matches!(r, ExtractionRecord::Entity { .. }));
        for record in entities.into_iter().chain(rest) {
            builder.push(record);
        }
        builder.outcome
    }
}

struct DeltaBuilder<'a> {
    system: &'a System,
    outcome: ExtractionOutcome,
}

impl<'a> DeltaBuilder<'a> {
    fn new(system: &'a System) -> Self {
        Self {
            system,
            outcome: ExtractionOutcome::default(),
        }
    }

    fn push(&mut self, record: ExtractionRecord) {
        let system = self.system;
        match record {
            ExtractionRecord::Entity {
                name,
                description,
                classes,
            } => {
                let mut canonical = Vec::with_capacity(classes.len());
                for class in &classes {
                    match system.canonical_class_name(class) {
                        Some(known) => canonical.push(known.to_string()),
                        None => {
                            return self.reject(
                                format!("entity|{}|{}|{}", name, description, classes.join(",")),
                                format!("class '{}' is not defined", class),
                            );
                        }
                    }
                }
                let entity = self.entity_mut(&name);
                merge_description(entity, &description);
                for class in canonical {
                    if !entity.classes.contains(&class) {
                        entity.classes.push(class);
                    }
                }
            }
            ExtractionRecord::Property {
                entity,
                class,
                property,
                value,
            } => {
                let raw = format!("property|{}|{}|{}|{}", entity, class, property, value);
                let Some(definition) = system.get_class_definition(&class) else {
                    return self.reject(raw, format!("class '{}' is not defined", class));
                };
                let Some(property_definition) = definition.property(&property) else {
                    return self.reject(
                        raw,
                        format!("class '{}' has no property '{}'", definition.name, property),
                    );
                };
                let class_name = definition.name.clone();
                let property_name = property_definition.name.clone();

                let delta = self.entity_mut(&entity);
                if !delta.classes.contains(&class_name) {
                    delta.classes.push(class_name.clone());
                }
                delta.set_property(class_name, property_name, value);
            }
            ExtractionRecord::Relationship {
                source,
                target,
                description,
                count,
                refer,
            } => {
                self.outcome.relationships.push(
                    RelationshipDelta::new(source, target, description)
                        .with_count(count)
                        .with_refer(refer),
                );
            }
        }
    }

    fn entity_mut(&mut self, name: &str) -> &mut EntityDelta {
        let key = canonical_key(name);
        let position = self
            .outcome
            .entities
            .iter()
            .position(|e| canonical_key(&e.name) == key);
        match position {
            Some(i) => &mut self.outcome.entities[i],
            None => {
                self.outcome.entities.push(EntityDelta::new(name, ""));
                let last = self.outcome.entities.len() - 1;
                &mut self.outcome.entities[last]
            }
        }
    }

    fn reject(&mut self, raw: String, reason: String) {
        warn!(record = %raw, reason = %reason, "Dropping extraction record");
        self.outcome.dropped.push(DroppedRecord { raw, reason });
    }
}

fn merge_description(entity: &mut EntityDelta, description: &str) {
    let description = description.trim();
    if description.is_empty() || entity.description.contains(description) {
        return;
    }
    if entity.description.is_empty() {
        entity.description = description.to_string();
    } else {
        entity.description = format!("{}; {}", entity.description, description);
    }
}
