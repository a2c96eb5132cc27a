//! Task bookkeeping
//!
//! Guarded separately from the knowledge base so status reads never wait
//! on a merge. Locks are never held across an await point.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::Notify;

use crate::domain::task::{Stage, StageResult, Task, TaskState, TaskStatus};
use crate::error::{Error, Result};

#[derive(Default)]
struct Tasks {
    by_id: HashMap<String, Task>,
    /// Submission order
    order: Vec<String>,
}

/// All tasks known to a task manager
#[derive(Default)]
pub struct TaskRegistry {
    tasks: RwLock<Tasks>,
    changed: Notify,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, task: Task) {
        let mut tasks = self.write();
        tasks.order.push(task.id.clone());
        tasks.by_id.insert(task.id.clone(), task);
    }

    /// Read one task
    pub fn inspect<R>(&self, id: &str, f: impl FnOnce(&Task) -> R) -> Option<R> {
        self.read().by_id.get(id).map(f)
    }

    /// Mutate one task and wake everyone waiting on a state change
    pub fn update<R>(&self, id: &str, f: impl FnOnce(&mut Task) -> R) -> Option<R> {
        let result = self.write().by_id.get_mut(id).map(f);
        self.changed.notify_waiters();
        result
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().by_id.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status(&self, id: &str) -> Result<TaskStatus> {
        self.inspect(id, Task::status)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))
    }

    pub fn stage_result(&self, id: &str, stage: Stage) -> Result<Option<StageResult>> {
        self.inspect(id, |task| task.stage_result(stage).cloned())
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))
    }

    pub fn stage_results(&self, id: &str) -> Result<Vec<StageResult>> {
        self.inspect(id, |task| task.stage_results.values().cloned().collect())
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))
    }

    /// Statuses in submission order
    pub fn statuses(&self) -> Vec<TaskStatus> {
        let tasks = self.read();
        tasks
            .order
            .iter()
            .filter_map(|id| tasks.by_id.get(id))
            .map(Task::status)
            .collect()
    }

    /// Ids of tasks still waiting for a worker
    pub fn pending_ids(&self) -> Vec<String> {
        let tasks = self.read();
        tasks
            .order
            .iter()
            .filter(|id| {
                tasks
                    .by_id
                    .get(*id)
                    .is_some_and(|task| task.state == TaskState::Pending)
            })
            .cloned()
            .collect()
    }

    pub fn counts_by_state(&self) -> BTreeMap<TaskState, usize> {
        let mut counts: BTreeMap<TaskState, usize> =
            TaskState::ALL.into_iter().map(|state| (state, 0)).collect();
        for task in self.read().by_id.values() {
            *counts.entry(task.state).or_default() += 1;
        }
        counts
    }

    /// Drop a finished task; running or queued tasks are kept
    pub fn discard(&self, id: &str) -> Result<bool> {
        let mut tasks = self.write();
        let terminal = tasks
            .by_id
            .get(id)
            .map(|task| task.state.is_terminal())
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
        if terminal {
            tasks.by_id.remove(id);
            tasks.order.retain(|other| other != id);
        }
        Ok(terminal)
    }

    /// Drop every finished task, returning how many went
    pub fn clear_finished(&self) -> usize {
        let mut tasks = self.write();
        let before = tasks.by_id.len();
        tasks.by_id.retain(|_, task| !task.state.is_terminal());
        let Tasks { by_id, order } = &mut *tasks;
        order.retain(|id| by_id.contains_key(id));
        before - by_id.len()
    }

    /// Resolve once the task reaches a terminal state
    pub async fn wait_for(&self, id: &str) -> Result<TaskStatus> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let status = self.status(id)?;
            if status.state.is_terminal() {
                return Ok(status);
            }
            notified.await;
        }
    }

    /// Resolve once every task known now is terminal
    pub async fn wait_all(&self) -> Vec<TaskStatus> {
        let ids: Vec<String> = self.read().order.clone();
        let mut statuses = Vec::with_capacity(ids.len());
        for id in ids {
            // discarded while waiting
            if let Ok(status) = self.wait_for(&id).await {
                statuses.push(status);
            }
        }
        statuses
    }

    fn read(&self) -> RwLockReadGuard<'_, Tasks> {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tasks> {
        self.tasks.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::domain::schema::System;
    use crate::domain::task::GraphDelta;

    fn registry_with(count: usize) -> (TaskRegistry, Vec<String>) {
        let registry = TaskRegistry::new();
        let ids = (0..count)
            .map(|i| {
                let task = Task::new(format!("text {}", i), System::seeded());
                let id = task.id.clone();
                registry.insert(task);
                id
            })
            .collect();
        (registry, ids)
    }

    #[test]
    fn test_statuses_keep_submission_order() {
        let (registry, ids) = registry_with(3);
        let listed: Vec<_> = registry.statuses().into_iter().map(|s| s.id).collect();
        assert_eq!(listed, ids);
        assert_eq!(registry.pending_ids(), ids);
    }

    #[test]
    fn test_unknown_task() {
        let registry = TaskRegistry::new();
        assert!(matches!(registry.status("nope"), Err(Error::TaskNotFound(_))));
        assert!(registry.update("nope", |task| task.start()).is_none());
    }

    #[test]
    fn test_counts_by_state_include_zeroes() {
        let (registry, ids) = registry_with(2);
        registry.update(&ids[0], |task| task.start());

        let counts = registry.counts_by_state();
        assert_eq!(counts[&TaskState::Pending], 1);
        assert_eq!(counts[&TaskState::Running], 1);
        assert_eq!(counts[&TaskState::Completed], 0);
    }

    #[test]
    fn test_discard_and_clear_only_touch_finished_tasks() {
        let (registry, ids) = registry_with(3);
        registry.update(&ids[0], |task| task.mark_cancelled());
        registry.update(&ids[1], |task| task.complete(GraphDelta::new(ids[1].clone())));

        assert!(!registry.discard(&ids[2]).unwrap());
        assert!(registry.discard(&ids[0]).unwrap());
        assert_eq!(registry.clear_finished(), 1);
        assert_eq!(registry.pending_ids(), vec![ids[2].clone()]);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_wait_for_wakes_on_terminal_state() {
        let (registry, ids) = registry_with(1);
        let registry = Arc::new(registry);
        let id = ids[0].clone();

        let finisher = {
            let registry = registry.clone();
            let id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                registry.update(&id, |task| task.start());
                tokio::time::sleep(Duration::from_millis(20)).await;
                registry.update(&id, |task| task.mark_cancelled());
            })
        };

        let status = registry.wait_for(&id).await.unwrap();
        assert_eq!(status.state, TaskState::Cancelled);
        finisher.await.unwrap();
        assert_eq!(registry.wait_all().await.len(), 1);
    }
}
