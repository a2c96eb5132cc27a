//! Task manager
//!
//! A fixed number of workers pull task ids from one queue and run them
//! through the pipeline. Stopping lets in-flight tasks finish; whatever is
//! still queued stays pending until the next start.

use std::sync::{Arc, PoisonError};

use futures_util::future::join_all;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::schema::System;
use crate::domain::task::{ProgressUpdate, Stage, Task, TaskState};
use crate::error::{Error, Result};

use super::pipeline::TaskPipeline;

struct Workers {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Queues tasks and runs them on a bounded worker pool
pub struct TaskManager {
    pipeline: Arc<TaskPipeline>,
    queue_tx: mpsc::UnboundedSender<String>,
    queue_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    workers: std::sync::Mutex<Option<Workers>>,
    max_concurrent: usize,
}

impl TaskManager {
    pub fn new(pipeline: TaskPipeline, max_concurrent: usize) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            pipeline: Arc::new(pipeline),
            queue_tx,
            queue_rx: Arc::new(Mutex::new(queue_rx)),
            workers: std::sync::Mutex::new(None),
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn pipeline(&self) -> &TaskPipeline {
        &self.pipeline
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn is_running(&self) -> bool {
        self.lock_workers().is_some()
    }

    /// Spawn the workers; must be called inside a tokio runtime
    pub fn start(&self) -> Result<()> {
        let mut workers = self.lock_workers();
        if workers.is_some() {
            return Err(Error::SchedulerAlreadyRunning);
        }

        let shutdown = CancellationToken::new();
        let handles = (0..self.max_concurrent)
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    self.pipeline.clone(),
                    self.queue_rx.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();
        *workers = Some(Workers { shutdown, handles });

        info!(workers = self.max_concurrent, "Task manager started");
        Ok(())
    }

    /// Stop taking new work and wait for in-flight tasks
    pub async fn stop(&self) -> Result<()> {
        let workers = self.lock_workers().take().ok_or(Error::SchedulerNotRunning)?;
        workers.shutdown.cancel();

        for joined in join_all(workers.handles).await {
            if let Err(e) = joined {
                warn!(error = %e, "Worker ended abnormally");
            }
        }
        info!(
            pending = self.pipeline.shared().registry.pending_ids().len(),
            "Task manager stopped"
        );
        Ok(())
    }

    /// Queue `text` against a private registry snapshot
    ///
    /// Works whether or not the workers are running.
    pub fn submit(&self, text: &str, system: System) -> Result<String> {
        if text.trim().is_empty() {
            return Err(Error::InvalidInput("task text must not be empty".to_string()));
        }

        let task = Task::new(text, system);
        let id = task.id.clone();
        self.pipeline.shared().registry.insert(task);
        self.queue_tx
            .send(id.clone())
            .map_err(|_| Error::Other("task queue is closed".to_string()))?;

        debug!(task_id = %id, running = self.is_running(), "Task queued");
        Ok(id)
    }

    /// Ask a task to stop
    ///
    /// Pending tasks are cancelled on the spot; running tasks get their flag
    /// raised and stop at the next checkpoint. Returns false for finished or
    /// unknown tasks.
    pub fn cancel(&self, task_id: &str) -> bool {
        let shared = self.pipeline.shared();
        let outcome = shared.registry.update(task_id, |task| match task.state {
            TaskState::Pending => {
                task.mark_cancelled();
                Some(TaskState::Cancelled)
            }
            TaskState::Running => {
                task.request_cancel();
                Some(TaskState::Running)
            }
            _ => None,
        });

        match outcome.flatten() {
            Some(TaskState::Cancelled) => {
                info!(task_id = %task_id, "Pending task cancelled");
                let update = ProgressUpdate::new(Stage::Cancelled, "Task cancelled before it started");
                shared
                    .registry
                    .update(task_id, |task| task.set_progress(Stage::Cancelled, &update));
                shared.progress.emit(task_id, Stage::Cancelled, &update);
                true
            }
            Some(_) => {
                info!(task_id = %task_id, "Cancellation requested for running task");
                true
            }
            None => false,
        }
    }

    fn lock_workers(&self) -> std::sync::MutexGuard<'_, Option<Workers>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn worker_loop(
    worker: usize,
    pipeline: Arc<TaskPipeline>,
    queue: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    shutdown: CancellationToken,
) {
    debug!(worker, "Worker started");
    loop {
        let next = {
            let mut queue = queue.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                id = queue.recv() => id,
            }
        };
        let Some(task_id) = next else {
            break;
        };
        debug!(worker, task_id = %task_id, "Worker picked up task");
        pipeline.run(&task_id).await;
    }
    debug!(worker, "Worker stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::ExtractionConfig;
    use crate::domain::KnowledgeBase;
    use crate::domain::extraction::{GraphExtractor, SchemaUpdater};
    use crate::domain::merge::Merger;
    use crate::llm::{FormatHint, RetryPolicy, ScriptedGenerator};
    use crate::prompts::PromptSet;
    use crate::scheduler::SharedState;

    fn manager(latency: Duration, workers: usize) -> TaskManager {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .with_default(FormatHint::SchemaCheck, "SUFFICIENT")
                .with_default(FormatHint::ExtractionRecords, "entity|Alex|A friend|Person")
                .with_latency(latency),
        );
        let prompts = PromptSet::builtin();
        let pipeline = TaskPipeline::new(
            SchemaUpdater::new(generator.clone(), RetryPolicy::immediate(1), prompts.schema_check),
            GraphExtractor::new(
                generator,
                RetryPolicy::immediate(1),
                prompts.extraction,
                &ExtractionConfig::default(),
            ),
            Merger::structural(),
            SharedState::new(KnowledgeBase::seeded().unwrap()),
        );
        TaskManager::new(pipeline, workers)
    }

    #[tokio::test]
    async fn test_start_twice_and_stop_when_idle() {
        let manager = manager(Duration::ZERO, 2);
        assert!(matches!(manager.stop().await, Err(Error::SchedulerNotRunning)));

        manager.start().unwrap();
        assert!(matches!(manager.start(), Err(Error::SchedulerAlreadyRunning)));
        manager.stop().await.unwrap();
        assert!(!manager.is_running());
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let manager = manager(Duration::ZERO, 1);
        assert!(matches!(
            manager.submit("   ", System::seeded()),
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_submitted_while_stopped_runs_after_start() {
        let manager = manager(Duration::ZERO, 2);
        let id = manager.submit("met Alex", System::seeded()).unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let registry = manager.pipeline().shared().registry.clone();
        assert_eq!(registry.status(&id).unwrap().state, TaskState::Pending);

        manager.start().unwrap();
        let status = registry.wait_for(&id).await.unwrap();
        assert_eq!(status.state, TaskState::Completed);
        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_pending_and_unknown() {
        let manager = manager(Duration::ZERO, 1);
        let id = manager.submit("met Alex", System::seeded()).unwrap();

        assert!(manager.cancel(&id));
        assert!(!manager.cancel(&id));
        assert!(!manager.cancel("no-such-task"));

        manager.start().unwrap();
        let registry = manager.pipeline().shared().registry.clone();
        assert_eq!(registry.wait_for(&id).await.unwrap().state, TaskState::Cancelled);
        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_finishes_in_flight_and_keeps_queue() {
        let manager = manager(Duration::from_millis(50), 1);
        manager.start().unwrap();
        let first = manager.submit("first", System::seeded()).unwrap();
        let second = manager.submit("second", System::seeded()).unwrap();

        let registry = manager.pipeline().shared().registry.clone();
        while registry.status(&first).unwrap().state == TaskState::Pending {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        manager.stop().await.unwrap();

        assert_eq!(registry.status(&first).unwrap().state, TaskState::Completed);
        assert_eq!(registry.status(&second).unwrap().state, TaskState::Pending);

        manager.start().unwrap();
        assert_eq!(registry.wait_for(&second).await.unwrap().state, TaskState::Completed);
        manager.stop().await.unwrap();
    }
}
