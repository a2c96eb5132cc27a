//! Pipeline stages and the results they record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stage boundary in a task's life
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Started,
    SystemUpdate,
    Extraction,
    Merging,
    Completed,
    Failed,
    Cancelled,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Started,
        Stage::SystemUpdate,
        Stage::Extraction,
        Stage::Merging,
        Stage::Completed,
        Stage::Failed,
        Stage::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::SystemUpdate => "system_update",
            Self::Extraction => "extraction",
            Self::Merging => "merging",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Progress reported when the stage is reached
    pub fn percent(&self) -> u8 {
        match self {
            Self::Started => 0,
            Self::SystemUpdate => 30,
            Self::Extraction => 60,
            Self::Merging => 90,
            Self::Completed | Self::Failed | Self::Cancelled => 100,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == wanted)
            .ok_or_else(|| format!("unknown stage '{}'", s))
    }
}

/// Structured output recorded for one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: Stage,
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl StageResult {
    pub fn new(stage: Stage, payload: serde_json::Value) -> Self {
        Self {
            stage,
            payload,
            recorded_at: Utc::now(),
        }
    }
}

/// What the progress callback receives at each stage boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub message: String,
    pub percent: u8,
    /// Stage result, for `system_update` and `extraction`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl ProgressUpdate {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            percent: stage.percent(),
            result: None,
        }
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names_round_trip() {
        for stage in Stage::ALL {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
        assert_eq!("System-Update".parse::<Stage>().unwrap(), Stage::SystemUpdate);
        assert!("merge".parse::<Stage>().is_err());
    }

    #[test]
    fn test_stage_ordering_follows_pipeline() {
        assert!(Stage::Started < Stage::SystemUpdate);
        assert!(Stage::SystemUpdate < Stage::Extraction);
        assert!(Stage::Extraction < Stage::Merging);
        assert!(Stage::Merging.percent() < Stage::Completed.percent());
    }

    #[test]
    fn test_progress_update_serialization() {
        let update = ProgressUpdate::new(Stage::Extraction, "extracted 3 entities");
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["percent"], 60);
        assert!(json.get("result").is_none());
    }
}
