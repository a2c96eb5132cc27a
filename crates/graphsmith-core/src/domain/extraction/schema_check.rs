//! Schema-sufficiency check
//!
//! Asks the service whether the task's registry snapshot can describe the
//! input text. The answer is either `SUFFICIENT` or a JSON addition set; a
//! valid addition set is applied to the snapshot only, never to the live
//! registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::schema::{ClassChange, System};
use crate::domain::task::{ClassDelta, DeltaOperation, PropertyDelta};
use crate::error::{Error, Result};
use crate::llm::{FormatHint, RetryPolicy, TextGenerator};
use crate::prompts::render;

use super::StageContext;
use super::json::{extract_json_block, strip_fences};

/// Token meaning "no schema change needed"
pub const SUFFICIENT: &str = "SUFFICIENT";

/// How the service answered the schema check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaAnswer {
    Sufficient,
    Additions(Vec<ClassDelta>),
    /// Neither token nor valid JSON; carries the parse error
    Unparseable(String),
}

#[derive(Deserialize)]
struct AdditionSet {
    classes: ClassList,
}

/// Addition sets arrive either as a list of classes or keyed by class name
#[derive(Deserialize)]
#[serde(untagged)]
enum ClassList {
    List(Vec<ClassDelta>),
    Map(BTreeMap<String, ClassBody>),
}

#[derive(Deserialize)]
struct ClassBody {
    #[serde(default)]
    description: String,
    #[serde(default)]
    properties: Vec<PropertyDelta>,
}

impl SchemaAnswer {
    pub fn parse(response: &str) -> Self {
        let Some(json) = extract_json_block(response) else {
            let text = strip_fences(response);
            if text.to_uppercase().contains(SUFFICIENT) {
                return Self::Sufficient;
            }
            return Self::Unparseable("response is neither SUFFICIENT nor JSON".to_string());
        };

        match serde_json::from_str::<AdditionSet>(json) {
            Ok(set) => {
                let classes = match set.classes {
                    ClassList::List(classes) => classes,
                    ClassList::Map(map) => map
                        .into_iter()
                        .map(|(name, body)| {
                            let mut class = ClassDelta::new(name).with_description(body.description);
                            class.properties = body.properties;
                            class
                        })
                        .collect(),
                };
                if classes.is_empty() {
                    Self::Sufficient
                } else {
                    Self::Additions(classes)
                }
            }
            Err(e) => Self::Unparseable(e.to_string()),
        }
    }
}

/// Result of the schema-check stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaCheckOutcome {
    /// Whether the service asked for a schema change
    pub needed: bool,
    pub added_classes: Vec<String>,
    pub enhanced_classes: Vec<String>,
    /// Applied changes, replayed onto the live registry at merge time
    #[serde(skip)]
    pub class_deltas: Vec<ClassDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
    pub details: String,
}

impl SchemaCheckOutcome {
    fn unchanged(details: impl Into<String>) -> Self {
        Self {
            details: details.into(),
            ..Default::default()
        }
    }

    /// Stage-result payload for `system_update`
    pub fn to_payload(&self, system: &System) -> serde_json::Value {
        let described: Vec<_> = self
            .added_classes
            .iter()
            .chain(self.enhanced_classes.iter())
            .filter_map(|name| system.get_class_definition(name))
            .collect();

        serde_json::json!({
            "needed": self.needed,
            "added_classes": self.added_classes,
            "enhanced_classes": self.enhanced_classes,
            "class_details": described,
            "parse_error": self.parse_error,
            "details": self.details,
        })
    }
}

/// Runs the schema check for one task
#[derive(Clone)]
pub struct SchemaUpdater {
    generator: Arc<dyn TextGenerator>,
    retry: RetryPolicy,
    template: String,
}

impl SchemaUpdater {
    pub fn new(generator: Arc<dyn TextGenerator>, retry: RetryPolicy, template: impl Into<String>) -> Self {
        Self {
            generator,
            retry,
            template: template.into(),
        }
    }

    /// Check the snapshot against `text`, extending it if the service asks
    ///
    /// A non-additive answer fails with `SchemaViolation` and leaves the
    /// snapshot untouched.
    pub async fn check_and_update(
        &self,
        system: &mut System,
        text: &str,
        ctx: &StageContext<'_>,
    ) -> Result<SchemaCheckOutcome> {
        let classes = serde_json::to_string_pretty(&system.catalog_json())?;
        let prompt = render(&self.template, &[("classes", &classes), ("text", text)]);

        let response = self
            .retry
            .complete(
                self.generator.as_ref(),
                &prompt,
                FormatHint::SchemaCheck,
                ctx.cancel,
                ctx.task_id,
            )
            .await?;

        match SchemaAnswer::parse(&response) {
            SchemaAnswer::Sufficient => {
                debug!(task_id = %ctx.task_id, "Schema is sufficient");
                Ok(SchemaCheckOutcome::unchanged("existing schema is sufficient"))
            }
            SchemaAnswer::Unparseable(reason) => {
                warn!(
                    task_id = %ctx.task_id,
                    error = %reason,
                    "Unparseable schema-check answer, keeping schema unchanged"
                );
                let mut outcome = SchemaCheckOutcome::unchanged("unparseable answer ignored");
                outcome.parse_error = Some(reason);
                Ok(outcome)
            }
            SchemaAnswer::Additions(additions) => {
                let outcome = apply_additions(system, additions)?;
                info!(
                    task_id = %ctx.task_id,
                    added = outcome.added_classes.len(),
                    enhanced = outcome.enhanced_classes.len(),
                    "Schema snapshot extended"
                );
                Ok(outcome)
            }
        }
    }
}

/// Apply an addition set to `system`, all or nothing
pub fn apply_additions(system: &mut System, additions: Vec<ClassDelta>) -> Result<SchemaCheckOutcome> {
    let mut staged = system.snapshot();
    let mut outcome = SchemaCheckOutcome {
        needed: true,
        ..Default::default()
    };

    for mut delta in additions {
        if delta.name.trim().is_empty() {
            return Err(Error::schema_violation("(unnamed)", "class name must not be empty"));
        }
        let definition = delta.resolve_against(staged.get_class_definition(&delta.name));
        let change = staged.add_class_definition(definition)?;
        let name = staged
            .canonical_class_name(&delta.name)
            .unwrap_or(delta.name.as_str())
            .to_string();

        match change {
            ClassChange::Added => {
                outcome.added_classes.push(name);
                delta.operation = DeltaOperation::Add;
            }
            ClassChange::Enhanced => {
                if !outcome.added_classes.contains(&name) && !outcome.enhanced_classes.contains(&name) {
                    outcome.enhanced_classes.push(name);
                }
                delta.operation = DeltaOperation::Update;
            }
            ClassChange::Unchanged => continue,
        }
        outcome.class_deltas.push(delta.into_tightenings());
    }

    outcome.details = format!(
        "{} class(es) added, {} class(es) enhanced",
        outcome.added_classes.len(),
        outcome.enhanced_classes.len()
    );
    *system = staged;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedGenerator;
    use tokio_util::sync::CancellationToken;

    const FLIGHT: &str = r#"{"classes": [{"name": "Flight", "description": "A booked flight",
        "properties": [{"name": "flight_number", "description": "Carrier code", "required": true}]}]}"#;

    fn updater(generator: ScriptedGenerator) -> SchemaUpdater {
        SchemaUpdater::new(
            Arc::new(generator),
            RetryPolicy::immediate(2),
            crate::prompts::PromptSet::builtin().schema_check,
        )
    }

    #[test]
    fn test_parse_sufficient_variants() {
        assert_eq!(SchemaAnswer::parse("SUFFICIENT"), SchemaAnswer::Sufficient);
        assert_eq!(SchemaAnswer::parse("```\nsufficient\n```"), SchemaAnswer::Sufficient);
        assert_eq!(SchemaAnswer::parse(r#"{"classes": []}"#), SchemaAnswer::Sufficient);
    }

    #[test]
    fn test_parse_list_and_map_forms() {
        let SchemaAnswer::Additions(list) = SchemaAnswer::parse(FLIGHT) else {
            panic!("expected additions");
        };
        assert_eq!(list[0].name, "Flight");
        assert_eq!(list[0].properties[0].required, Some(true));
        assert_eq!(list[0].properties[0].value_required, None);

        let map = r#"```json
{"classes": {"Flight": {"description": "A booked flight", "properties": []}}}
```"#;
        let SchemaAnswer::Additions(classes) = SchemaAnswer::parse(map) else {
            panic!("expected additions");
        };
        assert_eq!(classes[0].name, "Flight");
    }

    #[test]
    fn test_parse_garbage_is_unparseable() {
        assert!(matches!(SchemaAnswer::parse("I am not sure"), SchemaAnswer::Unparseable(_)));
        assert!(matches!(SchemaAnswer::parse("{not json}"), SchemaAnswer::Unparseable(_)));
    }

    #[test]
    fn test_apply_additions_is_all_or_nothing() {
        let mut system = System::seeded();
        let before = system.clone();

        let mut weakened = PropertyDelta::new("content_type");
        weakened.required = Some(false);
        let additions = vec![
            ClassDelta::new("Flight"),
            ClassDelta::new("Content").with_property(weakened),
        ];

        let err = apply_additions(&mut system, additions).unwrap_err();
        assert!(matches!(err, Error::SchemaViolation { .. }));
        assert_eq!(system, before);
    }

    #[test]
    fn test_apply_additions_reports_added_and_enhanced() {
        let mut system = System::seeded();
        let additions = vec![
            ClassDelta::new("flight"),
            ClassDelta::new("app").with_property(PropertyDelta::new("rating")),
            ClassDelta::new("Person"),
        ];

        let outcome = apply_additions(&mut system, additions).unwrap();
        assert_eq!(outcome.added_classes, vec!["flight"]);
        assert_eq!(outcome.enhanced_classes, vec!["App"]);
        assert_eq!(outcome.class_deltas.len(), 2);
        assert_eq!(outcome.class_deltas[1].operation, DeltaOperation::Update);
        assert_eq!(outcome.class_deltas[1].properties[0].required, None);
        assert!(system.get_class_definition("App").unwrap().has_property("rating"));
    }

    #[tokio::test]
    async fn test_check_extends_snapshot() {
        let generator = ScriptedGenerator::new().push_text(FormatHint::SchemaCheck, FLIGHT);
        let mut system = System::seeded();
        let cancel = CancellationToken::new();
        let ctx = StageContext::new("task-1", &cancel);

        let outcome = updater(generator)
            .check_and_update(&mut system, "Booked flight LH123", &ctx)
            .await
            .unwrap();

        assert_eq!(outcome.added_classes, vec!["Flight"]);
        assert!(system.has_class("Flight"));
        let payload = outcome.to_payload(&system);
        assert_eq!(payload["added_classes"][0], "Flight");
        assert_eq!(payload["class_details"][0]["name"], "Flight");
    }

    #[tokio::test]
    async fn test_unparseable_answer_records_parse_error() {
        let generator = ScriptedGenerator::new().push_text(FormatHint::SchemaCheck, "hmm, maybe?");
        let mut system = System::seeded();
        let cancel = CancellationToken::new();
        let ctx = StageContext::new("task-1", &cancel);

        let outcome = updater(generator)
            .check_and_update(&mut system, "text", &ctx)
            .await
            .unwrap();

        assert!(!outcome.needed);
        assert!(outcome.parse_error.is_some());
        assert_eq!(system, System::seeded());
    }

    #[tokio::test]
    async fn test_prompt_carries_catalog_and_text() {
        let generator = Arc::new(ScriptedGenerator::new().with_default(FormatHint::SchemaCheck, "SUFFICIENT"));
        let updater = SchemaUpdater::new(
            generator.clone(),
            RetryPolicy::immediate(1),
            "{classes} || {text}",
        );
        let mut system = System::seeded();
        let cancel = CancellationToken::new();
        updater
            .check_and_update(&mut system, "hello there", &StageContext::new("t", &cancel))
            .await
            .unwrap();

        let prompts = generator.prompts(FormatHint::SchemaCheck);
        assert!(prompts[0].contains("\"Person\""));
        assert!(prompts[0].ends_with("|| hello there"));
    }
}
