//! The knowledge engine
//!
//! Entry point for embedding graphsmith: owns the live knowledge base, the
//! task manager and the configured merge strategy.
//!
//! ```no_run
//! # async fn demo() -> graphsmith_core::Result<()> {
//! use graphsmith_core::config::Config;
//! use graphsmith_core::engine::KnowledgeEngine;
//!
//! let engine = KnowledgeEngine::from_config(Config::default())?;
//! engine.start()?;
//! let id = engine.submit_task("Opened a messaging app and sent a text to Alex").await?;
//! let status = engine.wait_for_task(&id).await?;
//! println!("{}", status.state);
//! engine.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{Config, MergeConfig};
use crate::domain::extraction::{GraphExtractor, SchemaUpdater};
use crate::domain::graph::{AuditFinding, NodeDetail, NodeGroup, SearchHit, VisualizationModel};
use crate::domain::merge::{
    IdentityResolver, MergeStrategy, Merger, PolicyResolver, SmartMerger,
};
use crate::domain::task::{GraphDelta, ProgressUpdate, Stage, StageResult, TaskState, TaskStatus};
use crate::domain::{KnowledgeBase, KnowledgeBaseStats};
use crate::error::{Error, Result};
use crate::llm::{LlmClient, RetryPolicy, TextGenerator};
use crate::prompts::PromptSet;
use crate::scheduler::{MergeGaugeSnapshot, SharedState, TaskManager, TaskPipeline};
use crate::storage::{FileSnapshotSink, SnapshotSink, decode_snapshot, encode_snapshot};

/// Counters reported by [`KnowledgeEngine::get_statistics`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatistics {
    #[serde(flatten)]
    pub knowledge: KnowledgeBaseStats,
    pub tasks_by_state: BTreeMap<String, usize>,
    pub merges: MergeGaugeSnapshot,
    pub merge_strategy: MergeStrategy,
    pub running: bool,
}

/// Builder for [`KnowledgeEngine`]
#[derive(Default)]
pub struct KnowledgeEngineBuilder {
    config: Option<Config>,
    generator: Option<Arc<dyn TextGenerator>>,
    knowledge: Option<KnowledgeBase>,
    resolver: Option<Arc<dyn IdentityResolver>>,
    prompts: Option<PromptSet>,
}

impl KnowledgeEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Text-generation service; defaults to an [`LlmClient`] keyed from the environment
    pub fn generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Starting knowledge base; defaults to the seed schema
    pub fn knowledge(mut self, knowledge: KnowledgeBase) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    /// Identity tie-break used by smart merge
    pub fn resolver(mut self, resolver: Arc<dyn IdentityResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn prompts(mut self, prompts: PromptSet) -> Self {
        self.prompts = Some(prompts);
        self
    }

    pub fn build(self) -> Result<KnowledgeEngine> {
        let config = self.config.unwrap_or_default();
        config
            .validate()
            .map_err(|e| Error::ConfigError(format!("{:#}", e)))?;

        let generator: Arc<dyn TextGenerator> = match self.generator {
            Some(generator) => generator,
            None => Arc::new(LlmClient::from_env(config.llm.clone())?),
        };
        let prompts = match self.prompts {
            Some(prompts) => prompts,
            None => PromptSet::load(config.extraction.template_dir.as_deref())?,
        };
        let knowledge = match self.knowledge {
            Some(knowledge) => knowledge,
            None => KnowledgeBase::seeded()?,
        };
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(PolicyResolver::new(config.merge.tie_break)));

        let retry = RetryPolicy::from_config(&config.retry);
        let merger = build_merger(
            &config.merge,
            generator.clone(),
            retry.clone(),
            prompts.smart_merge,
            resolver,
        );
        let shared = SharedState::new(knowledge);
        let pipeline = TaskPipeline::new(
            SchemaUpdater::new(generator.clone(), retry.clone(), prompts.schema_check),
            GraphExtractor::new(generator, retry, prompts.extraction, &config.extraction),
            merger,
            shared.clone(),
        );
        let tasks = TaskManager::new(pipeline, config.scheduler.max_concurrent_tasks);

        info!(
            strategy = %config.merge.strategy,
            workers = config.scheduler.max_concurrent_tasks,
            "Knowledge engine ready"
        );
        Ok(KnowledgeEngine {
            config,
            shared,
            tasks,
        })
    }
}

fn build_merger(
    config: &MergeConfig,
    generator: Arc<dyn TextGenerator>,
    retry: RetryPolicy,
    template: String,
    resolver: Arc<dyn IdentityResolver>,
) -> Merger {
    match config.strategy {
        MergeStrategy::Structural => Merger::structural(),
        MergeStrategy::Smart => Merger::smart(SmartMerger::new(
            generator,
            retry,
            template,
            config.existing_entity_sample,
            resolver,
        )),
    }
}

/// Incremental knowledge-graph construction engine
pub struct KnowledgeEngine {
    config: Config,
    shared: SharedState,
    tasks: TaskManager,
}

impl KnowledgeEngine {
    pub fn builder() -> KnowledgeEngineBuilder {
        KnowledgeEngineBuilder::new()
    }

    /// Engine over the seed schema, talking to the configured service
    pub fn from_config(config: Config) -> Result<Self> {
        Self::builder().config(config).build()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ---- lifecycle ----

    /// Start the worker pool; must be called inside a tokio runtime
    pub fn start(&self) -> Result<()> {
        self.tasks.start()
    }

    /// Let in-flight tasks finish, then join the workers
    pub async fn stop(&self) -> Result<()> {
        self.tasks.stop().await
    }

    pub fn is_running(&self) -> bool {
        self.tasks.is_running()
    }

    // ---- tasks ----

    /// Queue `text` for processing against a snapshot of the current schema
    pub async fn submit_task(&self, text: &str) -> Result<String> {
        let system = self.shared.knowledge.read().await.system.snapshot();
        self.tasks.submit(text, system)
    }

    /// Best-effort cancellation; safe to call from a progress callback
    pub fn cancel_task(&self, task_id: &str) -> bool {
        self.tasks.cancel(task_id)
    }

    pub fn get_task_status(&self, task_id: &str) -> Result<TaskStatus> {
        self.shared.registry.status(task_id)
    }

    pub fn get_task_stage_result(&self, task_id: &str, stage: Stage) -> Result<Option<StageResult>> {
        self.shared.registry.stage_result(task_id, stage)
    }

    pub fn get_task_stage_results(&self, task_id: &str) -> Result<Vec<StageResult>> {
        self.shared.registry.stage_results(task_id)
    }

    /// The delta a completed task produced
    pub fn get_task_delta(&self, task_id: &str) -> Result<Option<GraphDelta>> {
        self.shared
            .registry
            .inspect(task_id, |task| task.delta.clone())
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))
    }

    /// Every known task, in submission order
    pub fn list_tasks(&self) -> Vec<TaskStatus> {
        self.shared.registry.statuses()
    }

    /// Forget a finished task; running or pending tasks are kept
    pub fn discard_task(&self, task_id: &str) -> Result<bool> {
        self.shared.registry.discard(task_id)
    }

    pub fn clear_finished_tasks(&self) -> usize {
        self.shared.registry.clear_finished()
    }

    pub async fn wait_for_task(&self, task_id: &str) -> Result<TaskStatus> {
        self.shared.registry.wait_for(task_id).await
    }

    /// Resolves once every known task is terminal
    pub async fn wait_all(&self) -> Vec<TaskStatus> {
        self.shared.registry.wait_all().await
    }

    // ---- progress ----

    /// Called at every stage boundary with `(task_id, stage, update)`
    pub fn set_progress_callback<F>(&self, callback: F)
    where
        F: Fn(&str, Stage, &ProgressUpdate) + Send + Sync + 'static,
    {
        self.shared.progress.set(Arc::new(callback));
    }

    pub fn clear_progress_callback(&self) {
        self.shared.progress.clear();
    }

    // ---- queries ----

    pub async fn get_statistics(&self) -> EngineStatistics {
        let knowledge = self.shared.knowledge.read().await.stats();
        let tasks_by_state = self
            .shared
            .registry
            .counts_by_state()
            .into_iter()
            .map(|(state, count): (TaskState, usize)| (state.as_str().to_string(), count))
            .collect();

        EngineStatistics {
            knowledge,
            tasks_by_state,
            merges: self.shared.gauge.snapshot(),
            merge_strategy: self.config.merge.strategy,
            running: self.is_running(),
        }
    }

    pub async fn search(&self, keyword: &str, fuzzy: bool, limit: usize) -> Vec<SearchHit> {
        self.shared.knowledge.read().await.query().search(keyword, fuzzy, limit)
    }

    pub async fn get_node_detail(&self, node_id: &str) -> Result<NodeDetail> {
        self.shared.knowledge.read().await.query().node_detail(node_id)
    }

    /// An entity with its class nodes and their masters
    pub async fn entity_group(&self, entity_name: &str) -> Result<NodeGroup> {
        self.shared.knowledge.read().await.query().entity_group(entity_name)
    }

    /// A class master with every instantiation of it
    pub async fn class_group(&self, class_name: &str) -> Result<NodeGroup> {
        self.shared.knowledge.read().await.query().class_group(class_name)
    }

    pub async fn visualization_model(&self) -> VisualizationModel {
        self.shared.knowledge.read().await.to_visualization_model()
    }

    pub async fn audit(&self) -> Vec<AuditFinding> {
        self.shared.knowledge.read().await.audit()
    }

    /// A point-in-time copy of the live knowledge base
    pub async fn knowledge(&self) -> KnowledgeBase {
        self.shared.knowledge.read().await.clone()
    }

    // ---- persistence ----

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.save_to(&FileSnapshotSink::new(path.as_ref())).await
    }

    pub async fn load(&self, path: impl AsRef<Path>) -> Result<()> {
        self.load_from(&FileSnapshotSink::new(path.as_ref())).await
    }

    pub async fn save_to(&self, sink: &dyn SnapshotSink) -> Result<()> {
        let (bytes, stats) = {
            let knowledge = self.shared.knowledge.read().await;
            (encode_snapshot(&knowledge)?, knowledge.stats())
        };
        sink.write_snapshot(&bytes).await?;
        info!(
            location = %sink.describe(),
            entities = stats.entity_count,
            relationships = stats.relationship_count,
            "Knowledge base saved"
        );
        Ok(())
    }

    /// Replace the live knowledge base; waits for any merge in progress
    pub async fn load_from(&self, sink: &dyn SnapshotSink) -> Result<()> {
        let knowledge = decode_snapshot(&sink.read_snapshot().await?)?;
        let stats = knowledge.stats();

        let _lane = self.shared.merge_lane.lock().await;
        *self.shared.knowledge.write().await = knowledge;
        info!(
            source = %sink.describe(),
            classes = stats.class_count,
            entities = stats.entity_count,
            relationships = stats.relationship_count,
            "Knowledge base loaded"
        );
        Ok(())
    }
}
