//! Task records and their lifecycle

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::schema::System;
use crate::error::Error;

use super::delta::GraphDelta;
use super::stage::{ProgressUpdate, Stage, StageResult};

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub const ALL: [TaskState; 5] = [
        TaskState::Pending,
        TaskState::Running,
        TaskState::Completed,
        TaskState::Failed,
        TaskState::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a task did not complete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub code: String,
    pub message: String,
}

impl From<&Error> for TaskError {
    fn from(error: &Error) -> Self {
        Self {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Latest progress report of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub stage: Stage,
    pub message: String,
    pub percent: u8,
}

/// One unit of ingestion: input text plus everything learned while
/// processing it
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub input_text: String,
    /// Private copy of the registry taken at submission
    pub system_snapshot: System,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stage_results: BTreeMap<Stage, StageResult>,
    pub delta: Option<GraphDelta>,
    pub error: Option<TaskError>,
    pub progress: Option<TaskProgress>,
    cancel: CancellationToken,
}

impl Task {
    pub fn new(input_text: impl Into<String>, system_snapshot: System) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            input_text: input_text.into(),
            system_snapshot,
            state: TaskState::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            stage_results: BTreeMap::new(),
            delta: None,
            error: None,
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Token observed by the pipeline at its checkpoints
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Raise the cancellation flag
    pub fn request_cancel(&self) {
        self.cancel.cancel();
    }

    pub fn start(&mut self) {
        self.state = TaskState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn record_stage(&mut self, result: StageResult) {
        self.stage_results.insert(result.stage, result);
    }

    pub fn set_progress(&mut self, stage: Stage, update: &ProgressUpdate) {
        self.progress = Some(TaskProgress {
            stage,
            message: update.message.clone(),
            percent: update.percent,
        });
    }

    pub fn complete(&mut self, delta: GraphDelta) {
        self.delta = Some(delta);
        self.finish(TaskState::Completed);
    }

    pub fn fail(&mut self, error: &Error) {
        self.error = Some(TaskError::from(error));
        self.finish(TaskState::Failed);
    }

    pub fn mark_cancelled(&mut self) {
        self.cancel.cancel();
        self.finish(TaskState::Cancelled);
    }

    fn finish(&mut self, state: TaskState) {
        self.state = state;
        self.finished_at = Some(Utc::now());
    }

    pub fn stage_result(&self, stage: Stage) -> Option<&StageResult> {
        self.stage_results.get(&stage)
    }

    pub fn status(&self) -> TaskStatus {
        TaskStatus {
            id: self.id.clone(),
            state: self.state,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            error: self.error.clone(),
            progress: self.progress.clone(),
            stages: self.stage_results.keys().copied().collect(),
            cancel_requested: self.is_cancel_requested(),
        }
    }
}

/// Serializable view of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub id: String,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<TaskProgress>,
    /// Stages that recorded a result
    pub stages: Vec<Stage>,
    pub cancel_requested: bool,
}
