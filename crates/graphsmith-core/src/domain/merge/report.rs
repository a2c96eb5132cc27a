//! Structural diff produced by a merge

use serde::{Deserialize, Serialize};

use super::MergeStrategy;
use super::resolver::IdentityDecision;

/// Counters reported by smart merge about its own work
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SmartMergeSummary {
    #[serde(default)]
    pub duplicates_found: u32,
    #[serde(default)]
    pub conflicts_resolved: u32,
    #[serde(default)]
    pub names_aligned: u32,
    #[serde(default)]
    pub descriptions_optimized: u32,
    #[serde(default)]
    pub notes: String,
}

/// A relationship left out because an endpoint is not an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRelationship {
    pub source: String,
    pub target: String,
    pub description: String,
    pub reason: String,
}

/// What one merge changed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
    pub task_id: String,
    /// Strategy configured for the merge
    pub requested_strategy: MergeStrategy,
    /// Strategy whose output was applied
    pub strategy_used: MergeStrategy,
    pub classes_added: Vec<String>,
    pub classes_enhanced: Vec<String>,
    pub entities_added: Vec<String>,
    pub entities_updated: Vec<String>,
    pub entities_unchanged: usize,
    pub relationships_added: usize,
    pub relationships_updated: usize,
    pub relationships_skipped: Vec<SkippedRelationship>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downgrade_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smart_summary: Option<SmartMergeSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identity_decisions: Vec<IdentityDecision>,
}

impl MergeReport {
    pub fn new(task_id: impl Into<String>, strategy: MergeStrategy) -> Self {
        Self {
            task_id: task_id.into(),
            requested_strategy: strategy,
            strategy_used: strategy,
            ..Default::default()
        }
    }

    pub fn downgraded(&self) -> bool {
        self.downgrade_reason.is_some()
    }

    /// Whether the merge left the knowledge base as it was
    pub fn is_noop(&self) -> bool {
        self.classes_added.is_empty()
            && self.classes_enhanced.is_empty()
            && self.entities_added.is_empty()
            && self.entities_updated.is_empty()
            && self.relationships_added == 0
            && self.relationships_updated == 0
    }

    /// Stage-result payload for `merging`
    pub fn to_payload(&self) -> serde_json::Value {
        let mut payload = serde_json::to_value(self).unwrap_or_default();
        if let Some(object) = payload.as_object_mut() {
            object.insert("downgraded".to_string(), self.downgraded().into());
            object.insert(
                "relationships_skipped_count".to_string(),
                self.relationships_skipped.len().into(),
            );
        }
        payload
    }
}
