use crate::Task;
use chrono::Utc;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Task-by-id map shared between pollers and the background units writing progress.
/// Each task has exactly one writer, its own background unit.
#[derive(Clone, Debug, Default)]
pub struct ProgressStore {
    tasks: Arc<RwLock<HashMap<Uuid, Task>>>,
    retention: Option<Duration>,
}

impl ProgressStore {
    /// `retention` bounds how long a finished task stays pollable. `None` keeps tasks forever.
    pub fn new(retention: Option<Duration>) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            retention,
        }
    }

    pub async fn insert(&self, task: Task) {
        let mut tasks = self.tasks.write().await;
        self.purge_locked(&mut tasks);
        tasks.insert(task.id, task);
    }

    /// Snapshot of a task.
    pub async fn get(&self, task_id: Uuid) -> Option<Task> {
        self.tasks.read().await.get(&task_id).cloned()
    }

    /// Apply `f` to the task in place. Returns false if the task is gone.
    pub async fn update<F>(&self, task_id: Uuid, f: F) -> bool
    where
        F: FnOnce(&mut Task),
    {
        match self.tasks.write().await.get_mut(&task_id) {
            Some(task) => {
                f(task);
                true
            }
            None => {
                tracing::warn!("task {} disappeared while running", task_id);
                false
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    /// Drop finished tasks older than the retention window. Returns how many went.
    pub async fn purge_expired(&self) -> usize {
        let mut tasks = self.tasks.write().await;
        self.purge_locked(&mut tasks)
    }

    fn purge_locked(&self, tasks: &mut HashMap<Uuid, Task>) -> usize {
        let Some(retention) = self.retention else {
            return 0;
        };
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return 0;
        };

        let now = Utc::now();
        let before = tasks.len();
        tasks.retain(|_, task| match task.finished_at {
            Some(finished_at) => finished_at + retention > now,
            None => true,
        });

        let purged = before - tasks.len();
        if purged > 0 {
            tracing::debug!("purged {} expired tasks", purged);
        }
        purged
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::TaskStatus;

    #[test_log::test(tokio::test)]
    async fn test_update_and_snapshot() {
        let store = ProgressStore::new(None);
        let task = Task::new("blip", 2);
        let task_id = task.id;
        store.insert(task).await;

        let snapshot = store.get(task_id).await.unwrap();
        assert!(store
            .update(task_id, |task| task.set_status(TaskStatus::ModelLoaded, None))
            .await);

        // snapshots are detached copies
        assert_eq!(snapshot.status, TaskStatus::Processing);
        assert_eq!(store.get(task_id).await.unwrap().status, TaskStatus::ModelLoaded);

        assert!(!store.update(Uuid::new_v4(), |_| {}).await);
    }

    #[test_log::test(tokio::test)]
    async fn test_retention_purges_finished_tasks_only() {
        let store = ProgressStore::new(Some(Duration::ZERO));

        let running = Task::new("blip", 1);
        let running_id = running.id;
        let mut finished = Task::new("blip", 1);
        finished.complete();
        let finished_id = finished.id;

        store.insert(running).await;
        store.insert(finished).await;
        assert_eq!(store.len().await, 2);

        assert_eq!(store.purge_expired().await, 1);
        assert!(store.get(running_id).await.is_some());
        assert!(store.get(finished_id).await.is_none());
    }

    #[test_log::test(tokio::test)]
    async fn test_no_retention_keeps_everything() {
        let store = ProgressStore::new(None);
        let mut finished = Task::new("blip", 1);
        finished.fail("boom".into());
        store.insert(finished).await;

        assert_eq!(store.purge_expired().await, 0);
        assert_eq!(store.len().await, 1);
    }
}
