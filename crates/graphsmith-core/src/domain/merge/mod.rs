//! The merge stage
//!
//! Folds one task's delta into the live knowledge base. Callers must hold
//! the merge lane: exactly one merge runs at a time.

mod report;
mod resolver;
mod smart;
mod structural;

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::domain::KnowledgeBase;
use crate::domain::task::GraphDelta;
use crate::error::Result;

pub use report::{MergeReport, SkippedRelationship, SmartMergeSummary};
pub use resolver::{IdentityDecision, IdentityResolver, PolicyResolver, TieBreak};
pub use smart::{SmartMerger, SmartPlan};
pub use structural::{apply_structural, validate_delta};

/// How deltas are folded into the knowledge base
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Deterministic replay through the graph store
    #[default]
    Structural,
    /// Service-planned merge with structural fallback
    Smart,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structural => "structural",
            Self::Smart => "smart",
        }
    }
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "structural" => Ok(Self::Structural),
            "smart" => Ok(Self::Smart),
            other => Err(format!(
                "unknown merge strategy '{}' (expected structural or smart)",
                other
            )),
        }
    }
}

/// Applies deltas with the configured strategy
#[derive(Clone, Default)]
pub struct Merger {
    smart: Option<SmartMerger>,
}

impl Merger {
    pub fn structural() -> Self {
        Self { smart: None }
    }

    pub fn smart(smart: SmartMerger) -> Self {
        Self { smart: Some(smart) }
    }

    pub fn strategy(&self) -> MergeStrategy {
        if self.smart.is_some() {
            MergeStrategy::Smart
        } else {
            MergeStrategy::Structural
        }
    }

    /// Merge `delta` into `kb`
    ///
    /// A smart plan that cannot be obtained, validated or applied downgrades
    /// to a structural merge of the original delta; the reason ends up in
    /// the report. Only structural failures are returned as errors, and
    /// they leave `kb` unchanged.
    pub async fn merge(&self, kb: &RwLock<KnowledgeBase>, delta: &GraphDelta) -> Result<MergeReport> {
        let Some(smart) = &self.smart else {
            let mut guard = kb.write().await;
            return apply_structural(&mut guard, delta);
        };

        let plan = smart.plan(kb, delta).await;
        let mut guard = kb.write().await;
        let applied = plan.and_then(|plan| {
            let mut report = apply_structural(&mut guard, &plan.delta)?;
            report.requested_strategy = MergeStrategy::Smart;
            report.strategy_used = MergeStrategy::Smart;
            report.smart_summary = Some(plan.summary);
            report.identity_decisions = plan.decisions;
            Ok(report)
        });

        match applied {
            Ok(report) => Ok(report),
            Err(e) => {
                warn!(
                    task_id = %delta.task_id,
                    reason = %e,
                    "Smart merge downgraded to structural merge"
                );
                let mut report = apply_structural(&mut guard, delta)?;
                report.requested_strategy = MergeStrategy::Smart;
                report.downgrade_reason = Some(e.to_string());
                Ok(report)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::task::{EntityDelta, RelationshipDelta};
    use crate::llm::{FormatHint, RetryPolicy, ScriptedGenerator};
    use crate::prompts::PromptSet;

    fn smart_merger(generator: ScriptedGenerator) -> Merger {
        Merger::smart(SmartMerger::new(
            Arc::new(generator),
            RetryPolicy::immediate(1),
            PromptSet::builtin().smart_merge,
            20,
            Arc::new(PolicyResolver::default()),
        ))
    }

    fn delta() -> GraphDelta {
        let mut delta = GraphDelta::new("t1");
        delta
            .entities
            .push(EntityDelta::new("Alex", "A friend").with_class("Person"));
        delta
            .relationships
            .push(RelationshipDelta::new("User", "Alex", "sent a text to"));
        delta
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("Smart".parse::<MergeStrategy>().unwrap(), MergeStrategy::Smart);
        assert!("magic".parse::<MergeStrategy>().is_err());
        assert_eq!(MergeStrategy::default().to_string(), "structural");
        assert_eq!(Merger::default().strategy(), MergeStrategy::Structural);
    }

    #[tokio::test]
    async fn test_structural_merge() {
        let kb = RwLock::new(KnowledgeBase::seeded().unwrap());
        let report = Merger::structural().merge(&kb, &delta()).await.unwrap();

        assert_eq!(report.entities_added, vec!["Alex"]);
        assert_eq!(kb.read().await.graph.relationship_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_smart_plan_downgrades() {
        let generator =
            ScriptedGenerator::new().push_text(FormatHint::MergePlan, r#"{"entities": []}"#);
        let kb = RwLock::new(KnowledgeBase::seeded().unwrap());

        let report = smart_merger(generator).merge(&kb, &delta()).await.unwrap();

        assert!(report.downgraded());
        assert_eq!(report.requested_strategy, MergeStrategy::Smart);
        assert_eq!(report.strategy_used, MergeStrategy::Structural);
        assert_eq!(report.entities_added, vec!["Alex"]);
        assert!(kb.read().await.graph.contains_entity("alex"));
    }

    #[tokio::test]
    async fn test_valid_smart_plan_is_applied() {
        let plan = r#"```json
        {"optimized_classes": [],
         "optimized_entities": [{"name": "Alex", "description": "A close friend", "classes": ["Person"],
                                 "properties": {"Person": {"relation": "friend"}}}],
         "optimized_relationships": [{"source": "User", "target": "Alex", "description": "sent a text to"}],
         "merge_summary": {"conflicts_resolved": 1}}
        ```"#;
        let generator = ScriptedGenerator::new().push_text(FormatHint::MergePlan, plan);
        let kb = RwLock::new(KnowledgeBase::seeded().unwrap());

        let report = smart_merger(generator).merge(&kb, &delta()).await.unwrap();

        assert!(!report.downgraded());
        assert_eq!(report.strategy_used, MergeStrategy::Smart);
        assert_eq!(report.smart_summary.as_ref().unwrap().conflicts_resolved, 1);

        let guard = kb.read().await;
        let alex = guard.graph.get_entity("Alex").unwrap();
        assert_eq!(alex.description, "A close friend");
        assert_eq!(alex.class("Person").unwrap().value("relation"), Some("friend"));
    }

    #[tokio::test]
    async fn test_smart_plan_failing_to_apply_downgrades() {
        // the plan validates but names an undefined property
        let plan = r#"{"optimized_classes": [],
         "optimized_entities": [{"name": "Alex", "classes": ["Person"],
                                 "properties": {"Person": {"shoe_size": "44"}}}],
         "optimized_relationships": [],
         "merge_summary": {}}"#;
        let generator = ScriptedGenerator::new().push_text(FormatHint::MergePlan, plan);
        let kb = RwLock::new(KnowledgeBase::seeded().unwrap());

        let report = smart_merger(generator).merge(&kb, &delta()).await.unwrap();

        assert!(report.downgrade_reason.unwrap().contains("shoe_size"));
        assert_eq!(kb.read().await.graph.relationship_count(), 1);
    }
}
