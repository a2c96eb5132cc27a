//! One task, start to finish
//!
//! Schema check, extraction and merge run strictly in that order. The flag
//! is checked before each service-bound stage and again once the merge lane
//! is held; after that the merge always completes.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::domain::KnowledgeBase;
use crate::domain::extraction::{
    ExtractionOutcome, GraphExtractor, SchemaCheckOutcome, SchemaUpdater, StageContext,
};
use crate::domain::merge::{MergeReport, Merger};
use crate::domain::schema::System;
use crate::domain::task::{
    DeltaOperation, GraphDelta, ProgressUpdate, Stage, StageResult, TaskError, TaskState,
};
use crate::error::{Error, Result};

use super::gauge::MergeGauge;
use super::progress::ProgressHub;
use super::registry::TaskRegistry;

/// Characters of input text kept in delta metadata
const METADATA_TEXT_CHARS: usize = 200;

/// Handles shared between the pipeline and the engine
#[derive(Clone)]
pub struct SharedState {
    pub registry: Arc<TaskRegistry>,
    pub knowledge: Arc<RwLock<KnowledgeBase>>,
    /// Held for the whole of every merge and every load
    pub merge_lane: Arc<Mutex<()>>,
    pub gauge: Arc<MergeGauge>,
    pub progress: ProgressHub,
}

impl SharedState {
    pub fn new(knowledge: KnowledgeBase) -> Self {
        Self {
            registry: Arc::new(TaskRegistry::new()),
            knowledge: Arc::new(RwLock::new(knowledge)),
            merge_lane: Arc::new(Mutex::new(())),
            gauge: Arc::new(MergeGauge::new()),
            progress: ProgressHub::new(),
        }
    }
}

/// Runs tasks through schema check, extraction and merge
pub struct TaskPipeline {
    schema: SchemaUpdater,
    extractor: GraphExtractor,
    merger: Merger,
    shared: SharedState,
}

impl TaskPipeline {
    pub fn new(
        schema: SchemaUpdater,
        extractor: GraphExtractor,
        merger: Merger,
        shared: SharedState,
    ) -> Self {
        Self {
            schema,
            extractor,
            merger,
            shared,
        }
    }

    pub fn shared(&self) -> &SharedState {
        &self.shared
    }

    /// Run a queued task; tasks that are no longer pending are skipped
    pub async fn run(&self, task_id: &str) {
        let claimed = self
            .shared
            .registry
            .update(task_id, |task| {
                (task.state == TaskState::Pending).then(|| {
                    task.start();
                    (
                        task.input_text.clone(),
                        task.system_snapshot.clone(),
                        task.cancel_token(),
                    )
                })
            })
            .flatten();
        let Some((text, mut system, cancel)) = claimed else {
            debug!(task_id = %task_id, "Skipping task that is no longer pending");
            return;
        };

        info!(task_id = %task_id, chars = text.chars().count(), "Task started");
        self.record(
            task_id,
            Stage::Started,
            json!({ "input_chars": text.chars().count() }),
            "Task started",
            false,
        );

        match self.execute(task_id, &text, &mut system, &cancel).await {
            Ok((delta, report)) => {
                let payload = json!({
                    "delta": delta.counts(),
                    "metadata": delta.metadata,
                    "strategy_used": report.strategy_used,
                    "downgraded": report.downgraded(),
                });
                self.shared.registry.update(task_id, |task| {
                    task.record_stage(StageResult::new(Stage::Completed, payload));
                    task.complete(delta);
                });
                info!(task_id = %task_id, "Task completed");
                self.emit_terminal(task_id, Stage::Completed, "Task completed");
            }
            Err(Error::Cancelled(_)) => {
                self.shared.registry.update(task_id, |task| task.mark_cancelled());
                info!(task_id = %task_id, "Task cancelled");
                self.emit_terminal(task_id, Stage::Cancelled, "Task cancelled");
            }
            Err(e) => {
                error!(task_id = %task_id, code = e.code(), error = %e, "Task failed");
                let message = e.to_string();
                self.shared.registry.update(task_id, |task| {
                    task.record_stage(StageResult::new(
                        Stage::Failed,
                        json!({ "error": TaskError::from(&e) }),
                    ));
                    task.fail(&e);
                });
                self.emit_terminal(task_id, Stage::Failed, message);
            }
        }
    }

    async fn execute(
        &self,
        task_id: &str,
        text: &str,
        system: &mut System,
        cancel: &CancellationToken,
    ) -> Result<(GraphDelta, MergeReport)> {
        let ctx = StageContext::new(task_id, cancel);

        checkpoint(task_id, cancel)?;
        let schema = self.schema.check_and_update(system, text, &ctx).await?;
        let snapshot = system.clone();
        self.shared
            .registry
            .update(task_id, |task| task.system_snapshot = snapshot);
        self.record(
            task_id,
            Stage::SystemUpdate,
            schema.to_payload(system),
            schema_message(&schema),
            true,
        );

        checkpoint(task_id, cancel)?;
        let extraction = self.extractor.extract(system, text, &ctx).await?;
        self.record(
            task_id,
            Stage::Extraction,
            extraction.to_payload(),
            format!(
                "Extracted {} entities and {} relationships",
                extraction.entities.len(),
                extraction.relationships.len()
            ),
            true,
        );

        let delta = build_delta(task_id, text, schema, extraction);

        checkpoint(task_id, cancel)?;
        let report = {
            let _lane = self.shared.merge_lane.lock().await;
            checkpoint(task_id, cancel)?;
            let _active = self.shared.gauge.enter();
            self.merger.merge(&self.shared.knowledge, &delta).await?
        };
        self.record(
            task_id,
            Stage::Merging,
            report.to_payload(),
            format!("Merged with {} strategy", report.strategy_used),
            false,
        );

        Ok((delta, report))
    }

    /// Store a stage result, then tell the progress callback
    fn record(
        &self,
        task_id: &str,
        stage: Stage,
        payload: serde_json::Value,
        message: impl Into<String>,
        attach_result: bool,
    ) {
        let mut update = ProgressUpdate::new(stage, message);
        if attach_result {
            update = update.with_result(payload.clone());
        }
        self.shared.registry.update(task_id, |task| {
            task.record_stage(StageResult::new(stage, payload));
            task.set_progress(stage, &update);
        });
        self.shared.progress.emit(task_id, stage, &update);
    }

    fn emit_terminal(&self, task_id: &str, stage: Stage, message: impl Into<String>) {
        let update = ProgressUpdate::new(stage, message);
        self.shared
            .registry
            .update(task_id, |task| task.set_progress(stage, &update));
        self.shared.progress.emit(task_id, stage, &update);
    }
}

fn checkpoint(task_id: &str, cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Cancelled(task_id.to_string()))
    } else {
        Ok(())
    }
}

fn schema_message(outcome: &SchemaCheckOutcome) -> String {
    if outcome.needed {
        format!(
            "Schema extended: {} added, {} enhanced",
            outcome.added_classes.len(),
            outcome.enhanced_classes.len()
        )
    } else {
        "Schema unchanged".to_string()
    }
}

fn build_delta(
    task_id: &str,
    text: &str,
    schema: SchemaCheckOutcome,
    extraction: ExtractionOutcome,
) -> GraphDelta {
    let mut delta = GraphDelta::new(task_id);
    let classes_added = schema
        .class_deltas
        .iter()
        .filter(|class| class.operation == DeltaOperation::Add)
        .count();

    delta.classes = schema.class_deltas;
    delta.entities = extraction.entities;
    delta.relationships = extraction.relationships;
    delta.metadata.insert(
        "input_text".to_string(),
        text.chars().take(METADATA_TEXT_CHARS).collect::<String>().into(),
    );
    delta
        .metadata
        .insert("entities_count".to_string(), delta.entities.len().into());
    delta
        .metadata
        .insert("relationships_count".to_string(), delta.relationships.len().into());
    delta
        .metadata
        .insert("classes_added".to_string(), classes_added.into());
    delta
        .metadata
        .insert("dropped_records".to_string(), extraction.dropped.len().into());
    delta
}
