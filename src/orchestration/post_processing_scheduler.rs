//! # Post-Processing Scheduler
//!
//! Promotes tasks parked in READY_FOR_POST_PROCESSING into the bounded
//! post-processing phase. Each cycle:
//!
//! 1. lists READY and IN_POST_PROCESSING tasks from the `tasks_by_state` index,
//! 2. moves each READY task to IN_POST_PROCESSING and stamps the diagnostics,
//! 3. runs the [`PostProcessor`] registered for the task's pipeline, at most
//!    `max_concurrent_tasks` at a time,
//! 4. finishes the task PROCESSED, or DROPPED with the failure reason.
//!
//! A pipeline without a registered processor has nothing left to do, so its
//! tasks go straight to PROCESSED. Processors receive a cancellation token
//! that fires when the task is killed while post-processing runs.
//!
//! Exactly one scheduler should run per deployment; READY tasks are not
//! leased between processes. An IN_POST_PROCESSING task this scheduler is
//! not running was orphaned by a crash or a failed final write, and is run
//! again. Processors must therefore tolerate being resumed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashSet;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{HarvesterConfig, PostProcessingConfig};
use crate::constants::messages;
use crate::database::Repositories;
use crate::error::{HarvesterError, Result};
use crate::models::TaskInfo;
use crate::services::{TaskStatusChecker, TaskStatusUpdater};
use crate::state_machine::{TaskEvent, TaskState, TaskStateMachine};

/// Post-processed records between two progress writes
pub(crate) const PROGRESS_UPDATE_INTERVAL: i32 = 100;

/// Second phase of a pipeline, run once every record finished
#[async_trait]
pub trait PostProcessor: Send + Sync {
    fn handles(&self, pipeline: &str) -> bool;

    /// Returning [`HarvesterError::TaskDropped`] means the task was killed
    /// and is already DROPPED.
    async fn post_process(&self, task: &TaskInfo, cancel: &CancellationToken) -> Result<()>;
}

/// Final state of one post-processed task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostProcessingOutcome {
    pub task_id: i64,
    pub state: TaskState,
}

pub struct PostProcessingScheduler {
    repositories: Repositories,
    status_updater: TaskStatusUpdater,
    status_checker: Arc<TaskStatusChecker>,
    processors: Vec<Arc<dyn PostProcessor>>,
    config: PostProcessingConfig,
    in_flight: DashSet<i64>,
}

impl std::fmt::Debug for PostProcessingScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostProcessingScheduler")
            .field("config", &self.config)
            .field("processors", &self.processors.len())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl PostProcessingScheduler {
    pub fn new(
        repositories: Repositories,
        config: &HarvesterConfig,
        processors: Vec<Arc<dyn PostProcessor>>,
    ) -> Self {
        Self {
            status_updater: TaskStatusUpdater::new(repositories.clone()),
            status_checker: Arc::new(TaskStatusChecker::new(
                &repositories,
                &config.task_status_check,
            )),
            repositories,
            processors,
            config: config.post_processing.clone(),
            in_flight: DashSet::new(),
        }
    }

    /// One scheduling cycle over every READY or orphaned task
    pub async fn run_once(&self) -> Result<Vec<PostProcessingOutcome>> {
        let index = &self.repositories.tasks_by_state;
        let mut candidates = index
            .find_by_state(TaskState::InPostProcessing)
            .await?;
        candidates.extend(
            index
                .find_by_state(TaskState::ReadyForPostProcessing)
                .await?,
        );

        let task_ids: Vec<i64> = candidates
            .into_iter()
            .map(|entry| entry.task_id)
            .filter(|task_id| self.in_flight.insert(*task_id))
            .collect();

        if task_ids.is_empty() {
            return Ok(Vec::new());
        }
        debug!(tasks = task_ids.len(), "Starting post-processing of ready tasks");

        let outcomes: Vec<Option<PostProcessingOutcome>> = stream::iter(task_ids)
            .map(|task_id| async move {
                let outcome = self.process_task(task_id).await;
                self.in_flight.remove(&task_id);
                match outcome {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(task_id, error = %e, "Post-processing could not be scheduled");
                        None
                    }
                }
            })
            .buffer_unordered(self.config.max_concurrent_tasks.max(1))
            .collect()
            .await;

        Ok(outcomes.into_iter().flatten().collect())
    }

    async fn process_task(&self, task_id: i64) -> Result<Option<PostProcessingOutcome>> {
        let task = self.repositories.tasks.get(task_id).await?;
        let in_post_processing = match task.state {
            TaskState::ReadyForPostProcessing => {
                let target = TaskStateMachine::determine_target_state(
                    task_id,
                    task.state,
                    &TaskEvent::BeginPostProcessing,
                )?;
                self.status_updater
                    .update_state(task_id, target, messages::IN_POST_PROCESSING)
                    .await?;
                target
            }
            TaskState::InPostProcessing => {
                warn!(task_id, pipeline = %task.pipeline, "Resuming orphaned post-processing");
                task.state
            }
            state => {
                debug!(task_id, state = %state, "Task left post-processing states");
                return Ok(None);
            }
        };
        let completed =
            TaskStateMachine::determine_target_state(task_id, in_post_processing, &TaskEvent::Complete)?;

        let Some(processor) = self
            .processors
            .iter()
            .find(|processor| processor.handles(&task.pipeline))
        else {
            self.status_updater
                .update_state(task_id, completed, messages::COMPLETELY_PROCESSED)
                .await?;
            return Ok(Some(PostProcessingOutcome {
                task_id,
                state: completed,
            }));
        };

        if let Err(e) = self
            .repositories
            .diagnostics
            .update_post_processing_start_time(task_id, Utc::now())
            .await
        {
            warn!(task_id, error = %e, "Unable to record post-processing start time");
        }
        info!(task_id, pipeline = %task.pipeline, "Post-processing started");

        let cancel = CancellationToken::new();
        let watcher = self.status_checker.spawn_drop_watcher(task_id, cancel.clone());
        let result = processor.post_process(&task, &cancel).await;
        cancel.cancel();
        if let Err(e) = watcher.await {
            warn!(task_id, error = %e, "Drop watcher terminated abnormally");
        }

        let state = match result {
            Ok(()) => {
                self.status_updater
                    .update_state(task_id, completed, messages::COMPLETELY_PROCESSED)
                    .await?;
                info!(task_id, "Post-processing completed");
                completed
            }
            Err(HarvesterError::TaskDropped { .. }) => {
                info!(task_id, "Post-processing interrupted by task drop");
                TaskState::Dropped
            }
            Err(e) => {
                let reason = HarvesterError::PostProcessing {
                    task_id,
                    reason: e.to_string(),
                }
                .to_string();
                error!(task_id, error = %e, "Post-processing failed");
                self.status_updater.set_task_dropped(task_id, &reason).await?;
                TaskState::Dropped
            }
        };

        Ok(Some(PostProcessingOutcome { task_id, state }))
    }

    /// Run scheduling cycles until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        if !self.config.enabled {
            info!("Post-processing scheduler disabled");
            return;
        }

        let mut interval_timer = interval(self.config.check_interval());
        info!(
            interval_seconds = self.config.check_interval_seconds,
            max_concurrent_tasks = self.config.max_concurrent_tasks,
            "Starting post-processing scheduler"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Post-processing scheduler stopped");
                    break;
                }
                _ = interval_timer.tick() => {
                    match self.run_once().await {
                        Ok(outcomes) if !outcomes.is_empty() => {
                            info!(tasks = outcomes.len(), "Post-processing cycle completed");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Post-processing cycle failed"),
                    }
                }
            }
        }
    }
}
