//! # Task Status Checker
//!
//! Read side of the cooperative kill flag. Submission and harvest loops ask
//! [`TaskStatusChecker::ensure_not_dropped`] at record and page boundaries,
//! or hand a [`CancellationToken`] to [`TaskStatusChecker::spawn_drop_watcher`]
//! and poll the token instead.
//!
//! Answers about unfinished tasks are cached per task for a short TTL.
//! Terminal answers are never cached: a restart may bring the task back.
//! A watcher evicts its task's entry when it exits, and expired entries are
//! swept once the cache grows past [`CACHE_SWEEP_THRESHOLD`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::TaskStatusCheckConfig;
use crate::database::{Repositories, TaskRepository};
use crate::error::{HarvesterError, Result};
use crate::state_machine::TaskState;

/// Cached entries above which expired ones are swept on insert
pub const CACHE_SWEEP_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct CachedStatus {
    checked_at: Instant,
}

pub struct TaskStatusChecker {
    tasks: Arc<dyn TaskRepository>,
    cache: DashMap<i64, CachedStatus>,
    cache_ttl: Duration,
    poll_interval: Duration,
}

impl std::fmt::Debug for TaskStatusChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskStatusChecker")
            .field("cached_tasks", &self.cache.len())
            .field("cache_ttl", &self.cache_ttl)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl TaskStatusChecker {
    pub fn new(repositories: &Repositories, config: &TaskStatusCheckConfig) -> Self {
        Self {
            tasks: repositories.tasks.clone(),
            cache: DashMap::new(),
            cache_ttl: config.cache_ttl(),
            poll_interval: config.poll_interval(),
        }
    }

    pub async fn is_task_dropped(&self, task_id: i64) -> Result<bool> {
        if let Some(cached) = self.cache.get(&task_id).map(|entry| *entry) {
            if cached.checked_at.elapsed() < self.cache_ttl {
                return Ok(false);
            }
        }

        let task = self.tasks.get(task_id).await?;
        if task.state.is_terminal() {
            self.cache.remove(&task_id);
            return Ok(task.state == TaskState::Dropped);
        }

        if self.cache.len() >= CACHE_SWEEP_THRESHOLD {
            let ttl = self.cache_ttl;
            self.cache.retain(|_, status| status.checked_at.elapsed() < ttl);
        }
        self.cache.insert(
            task_id,
            CachedStatus {
                checked_at: Instant::now(),
            },
        );
        Ok(false)
    }

    /// Number of tasks with a cached answer
    pub fn cached_tasks(&self) -> usize {
        self.cache.len()
    }

    /// Fast-fail with [`HarvesterError::TaskDropped`] once the task is killed
    pub async fn ensure_not_dropped(&self, task_id: i64) -> Result<()> {
        if self.is_task_dropped(task_id).await? {
            return Err(HarvesterError::TaskDropped { task_id });
        }
        Ok(())
    }

    /// Cancel `token` as soon as the task is observed DROPPED.
    ///
    /// The watcher exits when the token is cancelled by anyone, so callers
    /// cancel it themselves once their loop is done. The task's cache entry
    /// goes with it.
    pub fn spawn_drop_watcher(
        self: &Arc<Self>,
        task_id: i64,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let checker = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(checker.poll_interval) => {
                        match checker.is_task_dropped(task_id).await {
                            Ok(true) => {
                                info!(task_id, "Task dropped, cancelling in-flight work");
                                token.cancel();
                                break;
                            }
                            Ok(false) => {}
                            Err(e) => warn!(task_id, error = %e, "Unable to check task status"),
                        }
                    }
                }
            }
            checker.cache.remove(&task_id);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewTask;
    use crate::services::TaskStatusUpdater;
    use chrono::Utc;

    fn config(cache_ttl_seconds: u64) -> TaskStatusCheckConfig {
        TaskStatusCheckConfig {
            cache_ttl_seconds,
            poll_interval_seconds: 0,
        }
    }

    async fn insert_task(repositories: &Repositories, task_id: i64) {
        let task = NewTask {
            task_id,
            pipeline: "indexing".to_string(),
            expected_records_number: 1,
            sent_timestamp: Utc::now(),
            restarted: false,
            dataset_id: None,
            harvest_date: None,
            harvesting: false,
        }
        .into_task_info("app");
        TaskStatusUpdater::new(repositories.clone())
            .insert_task(&task, "topic")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_ensure_not_dropped_fails_fast() {
        let repositories = Repositories::in_memory();
        insert_task(&repositories, 1).await;
        let checker = TaskStatusChecker::new(&repositories, &config(0));

        assert!(checker.ensure_not_dropped(1).await.is_ok());

        TaskStatusUpdater::new(repositories.clone())
            .set_task_dropped(1, "killed by user")
            .await
            .unwrap();

        assert_eq!(
            checker.ensure_not_dropped(1).await,
            Err(HarvesterError::TaskDropped { task_id: 1 })
        );
    }

    #[tokio::test]
    async fn test_cached_answer_is_reused_within_ttl() {
        let repositories = Repositories::in_memory();
        insert_task(&repositories, 2).await;
        let checker = TaskStatusChecker::new(&repositories, &config(3600));

        assert!(!checker.is_task_dropped(2).await.unwrap());
        TaskStatusUpdater::new(repositories.clone())
            .set_task_dropped(2, "killed")
            .await
            .unwrap();
        assert!(!checker.is_task_dropped(2).await.unwrap());
    }

    #[tokio::test]
    async fn test_drop_watcher_cancels_token() {
        let repositories = Repositories::in_memory();
        insert_task(&repositories, 3).await;
        let checker = Arc::new(TaskStatusChecker::new(&repositories, &config(0)));
        let token = CancellationToken::new();
        let watcher = checker.spawn_drop_watcher(3, token.clone());

        TaskStatusUpdater::new(repositories.clone())
            .set_task_dropped(3, "killed")
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), token.cancelled())
            .await
            .expect("watcher should cancel the token");
        watcher.await.unwrap();
        assert_eq!(checker.cached_tasks(), 0);
    }

    #[tokio::test]
    async fn test_watcher_evicts_its_task_on_exit() {
        let repositories = Repositories::in_memory();
        insert_task(&repositories, 4).await;
        let checker = Arc::new(TaskStatusChecker::new(&repositories, &config(3600)));

        assert!(!checker.is_task_dropped(4).await.unwrap());
        assert_eq!(checker.cached_tasks(), 1);

        let token = CancellationToken::new();
        let watcher = checker.spawn_drop_watcher(4, token.clone());
        token.cancel();
        watcher.await.unwrap();
        assert_eq!(checker.cached_tasks(), 0);
    }

    #[tokio::test]
    async fn test_terminal_answers_are_not_cached() {
        let repositories = Repositories::in_memory();
        insert_task(&repositories, 5).await;
        TaskStatusUpdater::new(repositories.clone())
            .set_task_dropped(5, "killed")
            .await
            .unwrap();
        let checker = TaskStatusChecker::new(&repositories, &config(3600));

        assert!(checker.is_task_dropped(5).await.unwrap());
        assert_eq!(checker.cached_tasks(), 0);
    }

    #[tokio::test]
    async fn test_unknown_task_is_an_error() {
        let checker = TaskStatusChecker::new(&Repositories::in_memory(), &config(0));
        assert_eq!(
            checker.is_task_dropped(99).await,
            Err(HarvesterError::TaskInfoDoesNotExist { task_id: 99 })
        );
    }
}
