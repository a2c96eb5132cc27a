//! The narrow text-generation contract the pipeline consumes

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What kind of answer a prompt expects
///
/// Implementations may use the hint to pick a response mode (JSON output)
/// or, in the scripted stub, to pick which canned answer to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatHint {
    /// `SUFFICIENT` or a JSON class addition set
    SchemaCheck,
    /// Delimited extraction records
    ExtractionRecords,
    /// Strict JSON merge plan
    MergePlan,
    /// Anything else
    FreeText,
}

impl FormatHint {
    /// Whether the answer must be a JSON object
    pub fn expects_json(&self) -> bool {
        matches!(self, FormatHint::MergePlan)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FormatHint::SchemaCheck => "schema_check",
            FormatHint::ExtractionRecords => "extraction_records",
            FormatHint::MergePlan => "merge_plan",
            FormatHint::FreeText => "free_text",
        }
    }
}

impl std::fmt::Display for FormatHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A service that turns a prompt into text
///
/// Failures are reported as transient (`Error::is_retryable`) or terminal
/// errors; retries are the caller's business.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Complete a prompt
    async fn complete(&self, prompt: &str, hint: FormatHint) -> Result<String>;

    /// Short name used in logs
    fn name(&self) -> &str {
        "generator"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_merge_plan_expects_json() {
        assert!(FormatHint::MergePlan.expects_json());
        assert!(!FormatHint::SchemaCheck.expects_json());
        assert!(!FormatHint::ExtractionRecords.expects_json());
    }

    #[test]
    fn test_hint_display() {
        assert_eq!(FormatHint::ExtractionRecords.to_string(), "extraction_records");
    }
}
