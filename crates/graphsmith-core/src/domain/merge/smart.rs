//! Service-assisted merge planning
//!
//! Sends the delta together with a summary of the live knowledge base and
//! asks for duplicate detection, name alignment, conflict resolution and
//! description clean-up. The answer is a strict JSON plan; anything that
//! does not validate is reported as `MergeDowngrade` so the caller can fall
//! back to a structural merge of the original delta.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::KnowledgeBase;
use crate::domain::canonical_key;
use crate::domain::extraction::extract_json_block;
use crate::domain::graph::ClassProperties;
use crate::domain::task::{
    ClassDelta, DeltaOperation, EntityDelta, GraphDelta, PropertyDelta, RelationshipDelta,
};
use crate::error::{Error, Result};
use crate::llm::{FormatHint, RetryPolicy, TextGenerator};
use crate::prompts::render;

use super::report::SmartMergeSummary;
use super::resolver::{IdentityDecision, IdentityResolver};

/// Longest entity description included in the summary
const SUMMARY_DESCRIPTION_CHARS: usize = 120;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MergePlan {
    optimized_classes: Vec<PlanClass>,
    optimized_entities: Vec<PlanEntity>,
    optimized_relationships: Vec<PlanRelationship>,
    merge_summary: SmartMergeSummary,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlanClass {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    properties: Vec<PlanProperty>,
    #[serde(default)]
    operation: DeltaOperation,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlanProperty {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    required: Option<bool>,
    #[serde(default)]
    value_required: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlanEntity {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    classes: Vec<String>,
    #[serde(default)]
    properties: ClassProperties,
    #[serde(default)]
    operation: DeltaOperation,
    #[serde(default)]
    merge_target: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlanRelationship {
    source: String,
    target: String,
    description: String,
    #[serde(default = "one")]
    count: u32,
    #[serde(default)]
    refer: Vec<String>,
    #[serde(default)]
    operation: DeltaOperation,
}

fn one() -> u32 {
    1
}

/// A validated smart-merge plan, ready for structural application
#[derive(Debug, Clone)]
pub struct SmartPlan {
    pub delta: GraphDelta,
    pub summary: SmartMergeSummary,
    pub decisions: Vec<IdentityDecision>,
}

/// Builds and validates smart-merge plans
#[derive(Clone)]
pub struct SmartMerger {
    generator: Arc<dyn TextGenerator>,
    retry: RetryPolicy,
    template: String,
    sample_size: usize,
    resolver: Arc<dyn IdentityResolver>,
}

impl SmartMerger {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        retry: RetryPolicy,
        template: impl Into<String>,
        sample_size: usize,
        resolver: Arc<dyn IdentityResolver>,
    ) -> Self {
        Self {
            generator,
            retry,
            template: template.into(),
            sample_size,
            resolver,
        }
    }

    pub fn resolver_name(&self) -> &str {
        self.resolver.name()
    }

    /// Ask the service for a plan and validate it against `kb`
    ///
    /// Service failures and invalid plans both come back as `MergeDowngrade`.
    /// The read lock is released while the service is working.
    pub async fn plan(&self, kb: &RwLock<KnowledgeBase>, delta: &GraphDelta) -> Result<SmartPlan> {
        let prompt = {
            let guard = kb.read().await;
            self.build_prompt(&guard, delta)?
        };

        // merges always run to completion once started
        let never = CancellationToken::new();
        let response = self
            .retry
            .complete(
                self.generator.as_ref(),
                &prompt,
                FormatHint::MergePlan,
                &never,
                &delta.task_id,
            )
            .await
            .map_err(|e| Error::MergeDowngrade(format!("service call failed: {}", e)))?;

        let guard = kb.read().await;
        self.parse_plan(&response, &guard, delta)
    }

    pub fn build_prompt(&self, kb: &KnowledgeBase, delta: &GraphDelta) -> Result<String> {
        let existing = serde_json::to_string_pretty(&self.summarize(kb, delta))?;
        let proposed = serde_json::to_string_pretty(&serde_json::json!({
            "classes": delta.classes,
            "entities": delta.entities,
            "relationships": delta.relationships,
        }))?;
        Ok(render(&self.template, &[("existing", &existing), ("delta", &proposed)]))
    }

    /// Summary of the live knowledge base; entities the delta mentions come
    /// first in the sample
    fn summarize(&self, kb: &KnowledgeBase, delta: &GraphDelta) -> serde_json::Value {
        let mentioned: Vec<&str> = delta
            .entities
            .iter()
            .map(|e| e.name.as_str())
            .chain(
                delta
                    .relationships
                    .iter()
                    .flat_map(|r| [r.source.as_str(), r.target.as_str()]),
            )
            .collect();

        let mut seen = HashSet::new();
        let sample: Vec<_> = mentioned
            .into_iter()
            .filter_map(|name| kb.graph.get_entity(name))
            .chain(kb.graph.entities())
            .filter(|entity| seen.insert(entity.key()))
            .take(self.sample_size)
            .map(|entity| {
                serde_json::json!({
                    "name": entity.name,
                    "description": truncate(&entity.description, SUMMARY_DESCRIPTION_CHARS),
                    "classes": entity.class_names(),
                })
            })
            .collect();

        serde_json::json!({
            "classes": kb.system.class_names(),
            "entity_count": kb.graph.entity_count(),
            "relationship_count": kb.graph.relationship_count(),
            "entities": sample,
        })
    }

    /// Parse and validate a raw plan, then settle identities
    pub fn parse_plan(
        &self,
        response: &str,
        kb: &KnowledgeBase,
        delta: &GraphDelta,
    ) -> Result<SmartPlan> {
        let json = extract_json_block(response)
            .ok_or_else(|| Error::MergeDowngrade("response contains no JSON object".to_string()))?;
        let plan: MergePlan =
            serde_json::from_str(json).map_err(|e| Error::MergeDowngrade(e.to_string()))?;
        validate_plan(&plan, kb, delta)?;

        let mut optimized = GraphDelta::new(delta.task_id.clone());
        optimized.metadata = delta.metadata.clone();
        optimized.metadata.insert(
            "merge_summary".to_string(),
            serde_json::to_value(&plan.merge_summary)?,
        );

        // schema changes already validated for this task are kept
        optimized.classes = delta.classes.clone();
        optimized
            .classes
            .extend(plan.optimized_classes.into_iter().map(into_class_delta));

        let mut decisions = Vec::new();
        for entity in plan.optimized_entities {
            let mut entity_delta = EntityDelta::new(entity.name, entity.description);
            entity_delta.classes = entity.classes;
            entity_delta.properties = entity.properties;
            entity_delta.operation = entity.operation;

            if entity.operation == DeltaOperation::Merge {
                let proposed = entity.merge_target.unwrap_or_default();
                let chosen = self
                    .resolver
                    .resolve(&entity_delta.name, proposed.trim(), &kb.graph);
                let decision = IdentityDecision {
                    structural: entity_delta.name.clone(),
                    proposed: proposed.trim().to_string(),
                    chosen: chosen.clone(),
                    resolver: self.resolver.name().to_string(),
                };
                debug!(
                    task_id = %delta.task_id,
                    structural = %decision.structural,
                    proposed = %decision.proposed,
                    chosen = %decision.chosen,
                    "Identity tie-break"
                );
                if decision.renamed() {
                    entity_delta.merge_target = Some(chosen);
                } else {
                    entity_delta.operation = DeltaOperation::Add;
                }
                decisions.push(decision);
            }
            optimized.entities.push(entity_delta);
        }

        optimized.relationships = plan
            .optimized_relationships
            .into_iter()
            .map(|r| {
                let mut relationship = RelationshipDelta::new(r.source, r.target, r.description)
                    .with_count(r.count)
                    .with_refer(r.refer);
                relationship.operation = r.operation;
                relationship
            })
            .collect();

        info!(
            task_id = %delta.task_id,
            entities = optimized.entities.len(),
            relationships = optimized.relationships.len(),
            duplicates_found = plan.merge_summary.duplicates_found,
            "Smart merge plan accepted"
        );
        Ok(SmartPlan {
            delta: optimized,
            summary: plan.merge_summary,
            decisions,
        })
    }
}

fn into_class_delta(class: PlanClass) -> ClassDelta {
    let mut delta = ClassDelta::new(class.name)
        .with_description(class.description)
        .with_operation(class.operation);
    delta.properties = class
        .properties
        .into_iter()
        .map(|p| PropertyDelta {
            name: p.name.trim().to_string(),
            description: p.description,
            required: p.required,
            value_required: p.value_required,
        })
        .collect();
    delta
}

fn validate_plan(plan: &MergePlan, kb: &KnowledgeBase, delta: &GraphDelta) -> Result<()> {
    let mut known: BTreeSet<String> = kb.system.class_names().iter().map(|c| canonical_key(c)).collect();
    known.extend(delta.classes.iter().map(|c| canonical_key(&c.name)));

    for class in &plan.optimized_classes {
        if class.name.trim().is_empty() {
            return reject("class with an empty name".to_string());
        }
        if class.properties.iter().any(|p| p.name.trim().is_empty()) {
            return reject(format!("class '{}' has a property with an empty name", class.name));
        }
        known.insert(canonical_key(&class.name));
    }

    for entity in &plan.optimized_entities {
        if entity.name.trim().is_empty() {
            return reject("entity with an empty name".to_string());
        }
        if let Some(class) = entity
            .classes
            .iter()
            .chain(entity.properties.keys())
            .find(|class| !known.contains(&canonical_key(class)))
        {
            return reject(format!(
                "entity '{}' uses unknown class '{}'",
                entity.name, class
            ));
        }
        let has_target = entity
            .merge_target
            .as_deref()
            .is_some_and(|target| !target.trim().is_empty());
        if entity.operation == DeltaOperation::Merge && !has_target {
            return reject(format!("merge of '{}' names no merge_target", entity.name));
        }
    }

    for relationship in &plan.optimized_relationships {
        if relationship.source.trim().is_empty()
            || relationship.target.trim().is_empty()
            || relationship.description.trim().is_empty()
        {
            return reject("relationship with an empty source, target or description".to_string());
        }
        if relationship.count < 1 {
            return reject(format!(
                "relationship '{}' -> '{}' has count 0",
                relationship.source, relationship.target
            ));
        }
    }
    Ok(())
}

fn reject(reason: String) -> Result<()> {
    Err(Error::MergeDowngrade(reason))
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::merge::{PolicyResolver, TieBreak};
    use crate::llm::ScriptedGenerator;
    use crate::prompts::PromptSet;

    fn merger(generator: ScriptedGenerator, tie_break: TieBreak) -> SmartMerger {
        SmartMerger::new(
            Arc::new(generator),
            RetryPolicy::immediate(1),
            PromptSet::builtin().smart_merge,
            20,
            Arc::new(PolicyResolver::new(tie_break)),
        )
    }

    fn knowledge_base() -> KnowledgeBase {
        let mut kb = KnowledgeBase::seeded().unwrap();
        kb.graph
            .create_entity(&kb.system, "Alex", "A friend", &["Person".to_string()], &ClassProperties::new())
            .unwrap();
        kb
    }

    fn delta() -> GraphDelta {
        let mut delta = GraphDelta::new("t1");
        delta
            .entities
            .push(EntityDelta::new("Alexander", "Friend from school").with_class("Person"));
        delta
            .relationships
            .push(RelationshipDelta::new("User", "Alexander", "called"));
        delta
    }

    const PLAN: &str = r#"{
        "optimized_classes": [],
        "optimized_entities": [
            {"name": "Alexander", "description": "Friend from school", "classes": ["person"],
             "operation": "merge", "merge_target": "alex"}
        ],
        "optimized_relationships": [
            {"source": "User", "target": "Alexander", "description": "called", "count": 1, "refer": []}
        ],
        "merge_summary": {"duplicates_found": 1, "conflicts_resolved": 0, "names_aligned": 1,
                          "descriptions_optimized": 0, "notes": "Alexander is Alex"}
    }"#;

    #[test]
    fn test_plan_resolves_identity() {
        let kb = knowledge_base();
        let plan = merger(ScriptedGenerator::new(), TieBreak::PreferSmart)
            .parse_plan(PLAN, &kb, &delta())
            .unwrap();

        assert_eq!(plan.summary.duplicates_found, 1);
        assert_eq!(plan.decisions.len(), 1);
        assert_eq!(plan.decisions[0].chosen, "Alex");
        assert_eq!(plan.delta.entities[0].merge_target.as_deref(), Some("Alex"));
        assert_eq!(plan.delta.metadata["merge_summary"]["names_aligned"], 1);
    }

    #[test]
    fn test_structural_tie_break_keeps_new_name() {
        let kb = knowledge_base();
        let plan = merger(ScriptedGenerator::new(), TieBreak::PreferExisting)
            .parse_plan(&PLAN.replace("\"alex\"", "\"Alexander Smith\""), &kb, &delta())
            .unwrap();

        assert_eq!(plan.decisions[0].chosen, "Alexander");
        assert_eq!(plan.delta.entities[0].operation, DeltaOperation::Add);
        assert!(plan.delta.entities[0].merge_target.is_none());
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let kb = knowledge_base();
        let response = PLAN.replace("\"optimized_classes\"", "\"confidence\": 0.9, \"optimized_classes\"");
        let err = merger(ScriptedGenerator::new(), TieBreak::PreferSmart)
            .parse_plan(&response, &kb, &delta())
            .unwrap_err();
        assert!(matches!(err, Error::MergeDowngrade(ref reason) if reason.contains("confidence")));
    }

    #[test]
    fn test_invalid_plans_are_rejected() {
        let kb = knowledge_base();
        let smart = merger(ScriptedGenerator::new(), TieBreak::PreferSmart);
        let cases = [
            PLAN.replace("[\"person\"]", "[\"Starship\"]"),
            PLAN.replace("\"count\": 1", "\"count\": 0"),
            PLAN.replace("\"merge_target\": \"alex\"", "\"merge_target\": null"),
            PLAN.replace("\"name\": \"Alexander\"", "\"name\": \" \""),
            PLAN.replace("\"merge_summary\"", "\"summary\""),
            "not json at all".to_string(),
        ];

        for response in cases {
            let result = smart.parse_plan(&response, &kb, &delta());
            assert!(matches!(result, Err(Error::MergeDowngrade(_))), "accepted: {}", response);
        }
    }

    #[test]
    fn test_delta_classes_count_as_known() {
        let kb = knowledge_base();
        let mut graph_delta = delta();
        graph_delta.classes.push(ClassDelta::new("Flight"));
        let response = PLAN.replace("[\"person\"]", "[\"Person\", \"Flight\"]");

        let plan = merger(ScriptedGenerator::new(), TieBreak::PreferSmart)
            .parse_plan(&response, &kb, &graph_delta)
            .unwrap();
        assert_eq!(plan.delta.classes.len(), 1);
    }

    #[tokio::test]
    async fn test_prompt_lists_mentioned_entities_first() {
        let generator = Arc::new(ScriptedGenerator::new().push_text(FormatHint::MergePlan, PLAN));
        let smart = SmartMerger::new(
            generator.clone(),
            RetryPolicy::immediate(1),
            PromptSet::builtin().smart_merge,
            1,
            Arc::new(PolicyResolver::default()),
        );
        let kb = RwLock::new(knowledge_base());
        let mut graph_delta = delta();
        graph_delta.entities.push(EntityDelta::new("alex", ""));

        smart.plan(&kb, &graph_delta).await.unwrap();

        let prompt = &generator.prompts(FormatHint::MergePlan)[0];
        assert!(prompt.contains("\"entity_count\": 2"));
        assert!(prompt.contains("\"description\": \"A friend\""));
        assert!(!prompt.contains("\"name\": \"User\""));
        assert!(prompt.contains("Friend from school"));
    }

    #[tokio::test]
    async fn test_service_failure_is_a_downgrade() {
        let generator = ScriptedGenerator::new()
            .push_failure(FormatHint::MergePlan, Error::LLMError("quota".into()));
        let kb = RwLock::new(knowledge_base());

        let err = merger(generator, TieBreak::PreferSmart)
            .plan(&kb, &delta())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MergeDowngrade(ref reason) if reason.contains("quota")));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé...");
        assert_eq!(truncate("hi", 5), "hi");
    }
}
