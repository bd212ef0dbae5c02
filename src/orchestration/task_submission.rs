//! # Task Submission Coordinator
//!
//! Entry point of the submission layer. A task is validated before anything
//! is persisted, assigned a topic, stored QUEUED and moved to PROCESSING
//! while its records are fed through the [`RecordDedupSubmitter`].
//!
//! The submission loop watches the task's kill flag. A drop observed during
//! submission unwinds quietly since the task already carries its reason;
//! any other failure drops the task with that failure as the reason.
//!
//! Once every record is fed, the expected size becomes the number of records
//! actually enqueued. Unknown sizes and duplicated input only settle here, so
//! the stored counters are checked again: completion events that arrived
//! during submission may already cover the whole task.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{HarvesterConfig, PostProcessingConfig};
use crate::constants::messages;
use crate::database::Repositories;
use crate::error::{HarvesterError, Result};
use crate::models::{NewTask, TaskInfo};
use crate::services::{
    RecordDedupSubmitter, RecordQueue, SubmissionSummary, SubmittedRecord, TaskRunContext,
    TaskStatusChecker, TaskStatusUpdater, TopicLoadBalancer,
};
use crate::state_machine::{TaskEvent, TaskState, TaskStateMachine};

/// Result of submitting one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReport {
    pub task_id: i64,
    pub topic: String,
    pub state: TaskState,
    pub submitted: usize,
    pub suppressed: usize,
}

pub struct TaskSubmissionCoordinator {
    repositories: Repositories,
    status_updater: TaskStatusUpdater,
    status_checker: Arc<TaskStatusChecker>,
    load_balancer: Arc<TopicLoadBalancer>,
    submitter: RecordDedupSubmitter,
    post_processing: PostProcessingConfig,
    owner_id: String,
}

impl std::fmt::Debug for TaskSubmissionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSubmissionCoordinator")
            .field("owner_id", &self.owner_id)
            .field("load_balancer", &self.load_balancer)
            .finish_non_exhaustive()
    }
}

impl TaskSubmissionCoordinator {
    pub fn new(
        repositories: Repositories,
        config: &HarvesterConfig,
        load_balancer: Arc<TopicLoadBalancer>,
        queue: Arc<dyn RecordQueue>,
    ) -> Self {
        Self {
            status_updater: TaskStatusUpdater::new(repositories.clone()),
            status_checker: Arc::new(TaskStatusChecker::new(
                &repositories,
                &config.task_status_check,
            )),
            submitter: RecordDedupSubmitter::new(&repositories, queue),
            repositories,
            load_balancer,
            post_processing: config.post_processing.clone(),
            owner_id: config.application.owner_id.clone(),
        }
    }

    /// Validate, register and feed a new task.
    ///
    /// Validation and topic selection failures are returned before anything
    /// is stored. Once the task exists, failures are reflected in its state
    /// and the report carries the final state instead of an error.
    pub async fn submit_task<I>(&self, new_task: NewTask, records: I) -> Result<SubmissionReport>
    where
        I: IntoIterator<Item = SubmittedRecord> + Send,
        I::IntoIter: Send,
    {
        new_task.validate()?;
        let topic = self.load_balancer.select_topic(&new_task.pipeline).await?;

        let restarted = new_task.restarted;
        let task = new_task.into_task_info(&self.owner_id);
        let task_id = task.task_id;
        self.status_updater.insert_task(&task, &topic).await?;

        if task.expected_records_number == 0 {
            self.status_updater
                .set_task_completely_processed(task_id, messages::NO_RECORDS_TO_PROCESS)
                .await?;
            return Ok(SubmissionReport {
                task_id,
                topic,
                state: TaskState::Processed,
                submitted: 0,
                suppressed: 0,
            });
        }

        let processing = TaskStateMachine::determine_target_state(task_id, task.state, &TaskEvent::Start)?;
        self.status_updater
            .update_state(task_id, processing, messages::PROCESSING_STARTED)
            .await?;

        let context = TaskRunContext {
            task_id,
            topic: topic.clone(),
            restarted,
            run_start_time: Utc::now(),
        };
        let summary = match self.feed_records(records, &context).await {
            Some(summary) => {
                if let Err(e) = self.settle_expected_size(&task, summary.submitted).await {
                    error!(task_id, error = %e, "Unable to settle expected size");
                    self.drop_task(task_id, &format!("Unable to settle expected size: {e}"))
                        .await;
                }
                summary
            }
            None => SubmissionSummary::default(),
        };
        let state = self.repositories.tasks.get(task_id).await?.state;

        Ok(SubmissionReport {
            task_id,
            topic,
            state,
            submitted: summary.submitted,
            suppressed: summary.suppressed,
        })
    }

    /// Returns `None` when submission stopped early and the task was dropped
    async fn feed_records<I>(&self, records: I, context: &TaskRunContext) -> Option<SubmissionSummary>
    where
        I: IntoIterator<Item = SubmittedRecord> + Send,
        I::IntoIter: Send,
    {
        let task_id = context.task_id;
        let cancel = CancellationToken::new();
        let watcher = self
            .status_checker
            .spawn_drop_watcher(task_id, cancel.clone());

        let result = self.submitter.submit_all(records, context, &cancel).await;
        cancel.cancel();
        if let Err(e) = watcher.await {
            warn!(task_id, error = %e, "Drop watcher terminated abnormally");
        }

        match result {
            Ok(summary) => {
                info!(
                    task_id,
                    topic = %context.topic,
                    submitted = summary.submitted,
                    suppressed = summary.suppressed,
                    "Task records submitted"
                );
                Some(summary)
            }
            Err(HarvesterError::TaskDropped { .. }) => {
                info!(task_id, "Submission stopped, task was dropped");
                None
            }
            Err(e) => {
                error!(task_id, error = %e, "Submission failed");
                self.drop_task(task_id, &format!("Submission failed: {e}"))
                    .await;
                None
            }
        }
    }

    /// Store the enqueued record count as the expected size and finish the
    /// task when its records are already accounted for.
    async fn settle_expected_size(&self, task: &TaskInfo, submitted: usize) -> Result<()> {
        let task_id = task.task_id;
        let expected = i32::try_from(submitted).map_err(|_| {
            HarvesterError::Validation(format!("task {task_id} submitted too many records"))
        })?;
        self.status_updater
            .update_expected_size(task_id, expected)
            .await?;

        let stored = self.repositories.tasks.get(task_id).await?;
        if !stored.state.is_active() {
            return Ok(());
        }

        if expected == 0 {
            info!(task_id, "No record entered the pipeline");
            return self
                .status_updater
                .set_task_completely_processed(task_id, messages::NO_RECORDS_TO_PROCESS)
                .await;
        }

        if stored.counters.total() < expected {
            return Ok(());
        }

        let event = TaskEvent::LastRecordFinished {
            post_processing: self
                .post_processing
                .is_post_processing_pipeline(&stored.pipeline),
        };
        let target = TaskStateMachine::determine_target_state(task_id, stored.state, &event)?;
        let description = match target {
            TaskState::ReadyForPostProcessing => messages::READY_FOR_POST_PROCESSING,
            _ => messages::COMPLETELY_PROCESSED,
        };
        match self
            .status_updater
            .update_state(task_id, target, description)
            .await
        {
            Ok(()) => {
                info!(
                    task_id,
                    expected,
                    state = %target,
                    "Task finished while its records were submitted"
                );
                Ok(())
            }
            // the tracker finished it in the meantime
            Err(HarvesterError::InvalidStateTransition { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn drop_task(&self, task_id: i64, reason: &str) {
        if let Err(e) = self.status_updater.set_task_dropped(task_id, reason).await {
            error!(task_id, error = %e, "Unable to drop task after failed submission");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskCounters;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingQueue {
        enqueued: Mutex<Vec<(String, String)>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl RecordQueue for RecordingQueue {
        async fn enqueue(&self, topic: &str, _task_id: i64, record: &SubmittedRecord) -> Result<()> {
            if self.fail_on.as_deref() == Some(record.record_id.as_str()) {
                return Err(HarvesterError::Database("queue unavailable".to_string()));
            }
            self.enqueued
                .lock()
                .push((topic.to_string(), record.record_id.clone()));
            Ok(())
        }
    }

    fn config() -> HarvesterConfig {
        let mut config = HarvesterConfig::default();
        config
            .topics
            .insert("enrichment".to_string(), vec!["enrichment_1".to_string()]);
        config
    }

    fn coordinator(
        repositories: &Repositories,
        queue: Arc<dyn RecordQueue>,
    ) -> TaskSubmissionCoordinator {
        let config = config();
        let balancer = Arc::new(TopicLoadBalancer::with_seed(repositories, config.topics.clone(), 7));
        TaskSubmissionCoordinator::new(repositories.clone(), &config, balancer, queue)
    }

    fn new_task(task_id: i64, expected: i32) -> NewTask {
        NewTask {
            task_id,
            pipeline: "enrichment".to_string(),
            expected_records_number: expected,
            sent_timestamp: Utc::now(),
            restarted: false,
            dataset_id: None,
            harvest_date: None,
            harvesting: false,
        }
    }

    fn records(ids: &[&str]) -> Vec<SubmittedRecord> {
        ids.iter().map(|id| SubmittedRecord::new(*id)).collect()
    }

    /// Queue whose records finish as soon as they are enqueued
    struct InstantQueue {
        repositories: Repositories,
        finished: Mutex<TaskCounters>,
    }

    #[async_trait]
    impl RecordQueue for InstantQueue {
        async fn enqueue(&self, _topic: &str, task_id: i64, _record: &SubmittedRecord) -> Result<()> {
            let counters = {
                let mut finished = self.finished.lock();
                finished.increment(false, false, false);
                *finished
            };
            self.repositories.tasks.update_counters(task_id, &counters).await
        }
    }

    #[tokio::test]
    async fn test_duplicate_input_settles_expected_size() {
        let repositories = Repositories::in_memory();
        let queue = Arc::new(RecordingQueue::default());

        let report = coordinator(&repositories, queue.clone())
            .submit_task(new_task(1, 3), records(&["a", "b", "a"]))
            .await
            .unwrap();

        assert_eq!(report.topic, "enrichment_1");
        assert_eq!(report.state, TaskState::Processing);
        assert_eq!(report.submitted, 2);
        assert_eq!(report.suppressed, 1);
        assert_eq!(queue.enqueued.lock().len(), 2);

        let task = repositories.tasks.get(1).await.unwrap();
        assert_eq!(task.expected_records_number, 2);
    }

    #[tokio::test]
    async fn test_records_finished_during_submission_complete_task() {
        let repositories = Repositories::in_memory();
        let queue = Arc::new(InstantQueue {
            repositories: repositories.clone(),
            finished: Mutex::new(TaskCounters::default()),
        });

        let report = coordinator(&repositories, queue)
            .submit_task(new_task(6, -1), records(&["a", "b"]))
            .await
            .unwrap();

        assert_eq!(report.state, TaskState::Processed);
        let task = repositories.tasks.get(6).await.unwrap();
        assert_eq!(task.expected_records_number, 2);
        assert_eq!(task.state_description, messages::COMPLETELY_PROCESSED);
    }

    #[tokio::test]
    async fn test_unknown_size_without_records_completes() {
        let repositories = Repositories::in_memory();
        let report = coordinator(&repositories, Arc::new(RecordingQueue::default()))
            .submit_task(new_task(7, -1), Vec::new())
            .await
            .unwrap();

        assert_eq!(report.state, TaskState::Processed);
        let task = repositories.tasks.get(7).await.unwrap();
        assert_eq!(task.expected_records_number, 0);
        assert_eq!(task.state_description, messages::NO_RECORDS_TO_PROCESS);
    }

    #[tokio::test]
    async fn test_zero_record_task_completes_immediately() {
        let repositories = Repositories::in_memory();
        let report = coordinator(&repositories, Arc::new(RecordingQueue::default()))
            .submit_task(new_task(2, 0), Vec::new())
            .await
            .unwrap();

        assert_eq!(report.state, TaskState::Processed);
        let task = repositories.tasks.get(2).await.unwrap();
        assert_eq!(task.state_description, messages::NO_RECORDS_TO_PROCESS);
    }

    #[tokio::test]
    async fn test_invalid_task_is_rejected_before_storage() {
        let repositories = Repositories::in_memory();
        let mut task = new_task(3, 1);
        task.pipeline = String::new();

        let result = coordinator(&repositories, Arc::new(RecordingQueue::default()))
            .submit_task(task, records(&["a"]))
            .await;

        assert!(matches!(result, Err(HarvesterError::Validation(_))));
        assert!(repositories.tasks.find(3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_pipeline_has_no_topic() {
        let repositories = Repositories::in_memory();
        let mut task = new_task(4, 1);
        task.pipeline = "unknown".to_string();

        let result = coordinator(&repositories, Arc::new(RecordingQueue::default()))
            .submit_task(task, records(&["a"]))
            .await;
        assert!(matches!(result, Err(HarvesterError::NoTopicsConfigured { .. })));
    }

    #[tokio::test]
    async fn test_queue_failure_drops_task_with_reason() {
        let repositories = Repositories::in_memory();
        let queue = Arc::new(RecordingQueue {
            fail_on: Some("b".to_string()),
            ..RecordingQueue::default()
        });

        let report = coordinator(&repositories, queue)
            .submit_task(new_task(5, 3), records(&["a", "b", "c"]))
            .await
            .unwrap();

        assert_eq!(report.state, TaskState::Dropped);
        let task = repositories.tasks.get(5).await.unwrap();
        assert!(task.state_description.contains("queue unavailable"));
    }
}
