//! # Task Status Updater
//!
//! The only writer of task state. Every state change is validated against
//! [`TaskState::can_transition_to`] and mirrored into the `tasks_by_state`
//! index: the old index row is deleted and a new one, carrying owner, topic
//! and start time, is inserted under the new state.
//!
//! The index is maintained with two independent writes. A crash in between
//! leaves the task briefly missing from the index, which only affects load
//! balancing and ghost scans, never completion.

use chrono::Utc;
use tracing::debug;

use crate::database::{Repositories, TaskStateUpdate};
use crate::error::{HarvesterError, Result};
use crate::logging::log_task_operation;
use crate::models::{TaskByState, TaskCounters, TaskInfo};
use crate::state_machine::TaskState;

#[derive(Debug, Clone)]
pub struct TaskStatusUpdater {
    repositories: Repositories,
}

impl TaskStatusUpdater {
    pub fn new(repositories: Repositories) -> Self {
        Self { repositories }
    }

    /// Persist a freshly submitted task and index it under its topic.
    ///
    /// A restarted task replaces its previous row, counters included, and
    /// leaves the index entry of its previous state. Re-inserting a known
    /// task without the restart flag is rejected.
    pub async fn insert_task(&self, task: &TaskInfo, topic: &str) -> Result<()> {
        if let Some(previous) = self.repositories.tasks.find(task.task_id).await? {
            if !task.restarted {
                return Err(HarvesterError::Validation(format!(
                    "task {} already exists and is not a restart",
                    task.task_id
                )));
            }
            self.repositories
                .tasks_by_state
                .delete(previous.state, &previous.pipeline, previous.task_id)
                .await?;
            debug!(
                task_id = task.task_id,
                previous_state = %previous.state,
                "Restarted task left its previous state"
            );
        }

        self.repositories.tasks.insert(task).await?;
        self.repositories
            .tasks_by_state
            .insert(&TaskByState {
                state: task.state,
                pipeline: task.pipeline.clone(),
                task_id: task.task_id,
                owner_id: task.owner_id.clone(),
                topic_name: topic.to_string(),
                start_time: task.start_timestamp,
            })
            .await?;

        log_task_operation(
            "insert_task",
            task.task_id,
            Some(&task.pipeline),
            task.state.as_str(),
            Some(topic),
        );
        Ok(())
    }

    /// Move a task to `state`.
    ///
    /// Re-applying the current state only refreshes the description. Moving
    /// backwards or out of a terminal state fails with
    /// [`HarvesterError::InvalidStateTransition`].
    pub async fn update_state(
        &self,
        task_id: i64,
        state: TaskState,
        description: &str,
    ) -> Result<()> {
        let task = self.repositories.tasks.get(task_id).await?;

        if task.state == state {
            debug!(task_id, state = %state, "Task already in requested state");
            return self
                .repositories
                .tasks
                .update_state(
                    task_id,
                    &TaskStateUpdate {
                        state,
                        description: description.to_string(),
                        start_timestamp: None,
                        finish_timestamp: None,
                    },
                )
                .await;
        }

        if !task.state.can_transition_to(state) {
            return Err(HarvesterError::InvalidStateTransition {
                task_id,
                from: task.state.to_string(),
                to: state.to_string(),
            });
        }

        let now = Utc::now();
        let update = TaskStateUpdate {
            state,
            description: description.to_string(),
            start_timestamp: (state == TaskState::Processing).then_some(now),
            finish_timestamp: state.is_terminal().then_some(now),
        };
        self.repositories.tasks.update_state(task_id, &update).await?;
        self.move_index_entry(&task, &update).await?;

        log_task_operation(
            "update_state",
            task_id,
            Some(&task.pipeline),
            state.as_str(),
            Some(description),
        );
        Ok(())
    }

    pub async fn set_task_dropped(&self, task_id: i64, reason: &str) -> Result<()> {
        self.update_state(task_id, TaskState::Dropped, reason).await
    }

    pub async fn set_task_completely_processed(&self, task_id: i64, description: &str) -> Result<()> {
        self.update_state(task_id, TaskState::Processed, description)
            .await
    }

    pub async fn update_processed_counts(&self, task_id: i64, counters: &TaskCounters) -> Result<()> {
        self.repositories
            .tasks
            .update_counters(task_id, counters)
            .await
    }

    pub async fn update_expected_size(&self, task_id: i64, expected_records_number: i32) -> Result<()> {
        self.repositories
            .tasks
            .update_expected_size(task_id, expected_records_number)
            .await
    }

    pub async fn update_post_processing_progress(
        &self,
        task_id: i64,
        expected_post_processed_records_number: i32,
        post_processed_records_count: i32,
    ) -> Result<()> {
        self.repositories
            .tasks
            .update_post_processing_progress(
                task_id,
                expected_post_processed_records_number,
                post_processed_records_count,
            )
            .await
    }

    async fn move_index_entry(&self, task: &TaskInfo, update: &TaskStateUpdate) -> Result<()> {
        let index = &self.repositories.tasks_by_state;
        let previous = index
            .find(task.state, &task.pipeline, task.task_id)
            .await?;

        index
            .delete(task.state, &task.pipeline, task.task_id)
            .await?;

        let (owner_id, topic_name, previous_start) = match previous {
            Some(entry) => (entry.owner_id, entry.topic_name, entry.start_time),
            None => (task.owner_id.clone(), String::new(), task.start_timestamp),
        };

        index
            .insert(&TaskByState {
                state: update.state,
                pipeline: task.pipeline.clone(),
                task_id: task.task_id,
                owner_id,
                topic_name,
                start_time: update.start_timestamp.or(previous_start),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewTask;

    fn queued_task(task_id: i64) -> TaskInfo {
        NewTask {
            task_id,
            pipeline: "oai_harvest".to_string(),
            expected_records_number: 2,
            sent_timestamp: Utc::now(),
            restarted: false,
            dataset_id: None,
            harvest_date: None,
            harvesting: false,
        }
        .into_task_info("owner-a")
    }

    #[tokio::test]
    async fn test_state_change_moves_index_entry() {
        let repositories = Repositories::in_memory();
        let updater = TaskStatusUpdater::new(repositories.clone());
        updater
            .insert_task(&queued_task(1), "oai_topic_1")
            .await
            .unwrap();

        updater
            .update_state(1, TaskState::Processing, "started")
            .await
            .unwrap();

        let index = &repositories.tasks_by_state;
        assert!(index
            .find(TaskState::Queued, "oai_harvest", 1)
            .await
            .unwrap()
            .is_none());
        let entry = index
            .find(TaskState::Processing, "oai_harvest", 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.topic_name, "oai_topic_1");
        assert_eq!(entry.owner_id, "owner-a");
        assert!(entry.start_time.is_some());

        let task = repositories.tasks.get(1).await.unwrap();
        assert_eq!(task.state, TaskState::Processing);
        assert!(task.start_timestamp.is_some());
    }

    #[tokio::test]
    async fn test_terminal_tasks_cannot_move() {
        let repositories = Repositories::in_memory();
        let updater = TaskStatusUpdater::new(repositories.clone());
        updater.insert_task(&queued_task(2), "t").await.unwrap();
        updater.set_task_dropped(2, "cancelled").await.unwrap();

        let result = updater
            .set_task_completely_processed(2, "done")
            .await;
        assert!(matches!(
            result,
            Err(HarvesterError::InvalidStateTransition { task_id: 2, .. })
        ));

        let task = repositories.tasks.get(2).await.unwrap();
        assert_eq!(task.state, TaskState::Dropped);
        assert_eq!(task.state_description, "cancelled");
        assert!(task.finish_timestamp.is_some());
    }

    #[tokio::test]
    async fn test_same_state_update_only_refreshes_description() {
        let repositories = Repositories::in_memory();
        let updater = TaskStatusUpdater::new(repositories.clone());
        updater.insert_task(&queued_task(3), "t").await.unwrap();

        updater
            .update_state(3, TaskState::Queued, "still waiting")
            .await
            .unwrap();

        let task = repositories.tasks.get(3).await.unwrap();
        assert_eq!(task.state_description, "still waiting");
        assert_eq!(
            repositories
                .tasks_by_state
                .find_by_state(TaskState::Queued)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_restart_replaces_task_and_its_index_entry() {
        let repositories = Repositories::in_memory();
        let updater = TaskStatusUpdater::new(repositories.clone());
        updater.insert_task(&queued_task(4), "t").await.unwrap();
        updater
            .update_processed_counts(
                4,
                &TaskCounters {
                    processed: 1,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        updater.set_task_dropped(4, "cancelled").await.unwrap();

        let mut restarted = queued_task(4);
        restarted.restarted = true;
        updater.insert_task(&restarted, "t").await.unwrap();

        let index = &repositories.tasks_by_state;
        assert!(index.find_by_state(TaskState::Dropped).await.unwrap().is_empty());
        assert_eq!(index.find_by_state(TaskState::Queued).await.unwrap().len(), 1);

        let task = repositories.tasks.get(4).await.unwrap();
        assert_eq!(task.state, TaskState::Queued);
        assert_eq!(task.counters.total(), 0);
        assert!(task.finish_timestamp.is_none());
    }

    #[tokio::test]
    async fn test_known_task_without_restart_is_rejected() {
        let repositories = Repositories::in_memory();
        let updater = TaskStatusUpdater::new(repositories.clone());
        updater.insert_task(&queued_task(5), "t").await.unwrap();
        updater.set_task_dropped(5, "cancelled").await.unwrap();

        let result = updater.insert_task(&queued_task(5), "t").await;
        assert!(matches!(result, Err(HarvesterError::Validation(_))));
        assert_eq!(
            repositories.tasks.get(5).await.unwrap().state,
            TaskState::Dropped
        );
    }

    #[tokio::test]
    async fn test_missing_task_is_reported() {
        let updater = TaskStatusUpdater::new(Repositories::in_memory());
        let result = updater.set_task_dropped(404, "gone").await;
        assert_eq!(result, Err(HarvesterError::TaskInfoDoesNotExist { task_id: 404 }));
    }
}
