//! # Task Completion Tracker
//!
//! Consumes record completion events, counts each record at most once and
//! detects the last record of a task.
//!
//! ## Handling one event
//!
//! 1. A ledger entry already SUCCESS/ERROR means duplicate delivery: only the
//!    last-progress diagnostic is refreshed.
//! 2. Events for tasks that left QUEUED/PROCESSING are discarded.
//! 3. The per-task counters are incremented and the event is classified.
//! 4. The grouped write runs as ordered independent writes, each retried on
//!    its own: notification, counters, diagnostics, error aggregation and
//!    finally the ledger entry.
//! 5. The last record moves the task to PROCESSED, or to
//!    READY_FOR_POST_PROCESSING for post-processing pipelines.
//!
//! Every write is idempotent under redelivery. The notification is keyed by
//! resource number, counters are monotonic snapshots and the ledger is
//! written last, so a crash part way through leads to at most one extra
//! increment on redelivery and never to a lost completion.
//!
//! Any failure after retries drops the task with a reason instead of leaving
//! it silently stuck.
//!
//! ## Routing
//!
//! Counters are kept in an in-process cache seeded from the store. Events of
//! one task must therefore be routed to a single tracker instance, the same
//! way the pipeline groups notifications by task id. A cache entry belongs to
//! one run of the task and is reseeded when the task's start time changes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::notification_classifier::{classify, NotificationClass, RecordCompletionEvent};
use super::retry_policy::RetryPolicy;
use crate::constants::messages;
use crate::database::Repositories;
use crate::error::{HarvesterError, Result};
use crate::logging::log_record_operation;
use crate::models::{Notification, TaskCounters, TaskInfo};
use crate::services::{ErrorAggregator, TaskStatusUpdater};
use crate::state_machine::{TaskEvent, TaskState, TaskStateMachine};

/// What the tracker did with an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TrackingOutcome {
    /// The record was already counted in this run
    Duplicate,
    /// The task no longer accepts record events
    Discarded { state: TaskState },
    /// Counted, more records outstanding
    Counted {
        class: NotificationClass,
        counters: TaskCounters,
    },
    /// Counted and the task reached its terminal pipeline state
    Completed {
        class: NotificationClass,
        counters: TaskCounters,
        state: TaskState,
    },
    /// Handling failed and the task was dropped
    TaskDropped { reason: String },
}

/// Counters of the current run of a task
#[derive(Debug, Clone, Copy)]
struct RunCounters {
    run_started: Option<DateTime<Utc>>,
    counters: TaskCounters,
}

impl RunCounters {
    fn seeded(task: &TaskInfo) -> Self {
        Self {
            run_started: task.start_timestamp,
            counters: task.counters,
        }
    }
}

pub struct TaskCompletionTracker {
    repositories: Repositories,
    status_updater: TaskStatusUpdater,
    error_aggregator: ErrorAggregator,
    retry_policy: RetryPolicy,
    counters: DashMap<i64, Arc<Mutex<RunCounters>>>,
}

impl std::fmt::Debug for TaskCompletionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCompletionTracker")
            .field("tracked_tasks", &self.counters.len())
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}

impl TaskCompletionTracker {
    pub fn new(
        repositories: Repositories,
        error_aggregator: ErrorAggregator,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            status_updater: TaskStatusUpdater::new(repositories.clone()),
            repositories,
            error_aggregator,
            retry_policy,
            counters: DashMap::new(),
        }
    }

    /// Handle one record completion event.
    ///
    /// Only a missing task (or a store failure while loading it) is returned
    /// as an error; failures while counting drop the task instead.
    pub async fn handle(&self, event: &RecordCompletionEvent) -> Result<TrackingOutcome> {
        let task_id = event.task_id;

        let ledger = self
            .retry_policy
            .execute("find_processed_record", || {
                self.repositories
                    .processed_records
                    .find(task_id, &event.record_id)
            })
            .await?;
        if ledger.as_ref().is_some_and(|entry| entry.is_finished()) {
            debug!(task_id, record_id = %event.record_id, "Duplicate completion event");
            self.touch_last_progress(task_id).await;
            return Ok(TrackingOutcome::Duplicate);
        }

        let task = self
            .retry_policy
            .execute("find_task", || self.repositories.tasks.get(task_id))
            .await?;
        if !task.state.is_active() {
            debug!(task_id, state = %task.state, "Discarding event for inactive task");
            self.counters.remove(&task_id);
            return Ok(TrackingOutcome::Discarded { state: task.state });
        }

        let (class, counters) = self.count(&task, event);

        if let Err(e) = self.persist(&task, event, &class, &counters).await {
            let reason = format!("Unable to process record {}: {e}", event.record_id);
            return Ok(self.drop_task(task_id, reason).await);
        }

        log_record_operation(
            "record_finished",
            task_id,
            &event.record_id,
            event.record_state().as_str(),
        );

        match class.terminal_event() {
            None => Ok(TrackingOutcome::Counted { class, counters }),
            Some(terminal_event) => {
                match self.finish_task(&task, &terminal_event, &counters).await {
                    Ok(state) => {
                        self.counters.remove(&task_id);
                        Ok(TrackingOutcome::Completed {
                            class,
                            counters,
                            state,
                        })
                    }
                    Err(e) => {
                        error!(task_id, error = %e, "Unable to end the task");
                        Ok(self
                            .drop_task(task_id, messages::UNABLE_TO_END_TASK.to_string())
                            .await)
                    }
                }
            }
        }
    }

    /// Counters currently cached for a task
    pub fn cached_counters(&self, task_id: i64) -> Option<TaskCounters> {
        self.counters.get(&task_id).map(|entry| entry.lock().counters)
    }

    fn count(&self, task: &TaskInfo, event: &RecordCompletionEvent) -> (NotificationClass, TaskCounters) {
        let cell = self
            .counters
            .entry(task.task_id)
            .or_insert_with(|| Arc::new(Mutex::new(RunCounters::seeded(task))))
            .clone();

        let mut run = cell.lock();
        if run.run_started != task.start_timestamp {
            *run = RunCounters::seeded(task);
        }
        run.counters
            .increment(event.is_error(), event.marked_as_deleted, event.ignored);
        let snapshot = run.counters;
        drop(run);

        (
            classify(event, &snapshot, task.expected_records_number),
            snapshot,
        )
    }

    async fn persist(
        &self,
        task: &TaskInfo,
        event: &RecordCompletionEvent,
        class: &NotificationClass,
        counters: &TaskCounters,
    ) -> Result<()> {
        let task_id = task.task_id;
        let now = Utc::now();
        let state = event.record_state();

        let notification = Notification::new(
            task_id,
            counters.total(),
            &task.pipeline,
            &event.record_id,
            state,
            &event.info_text,
            event.notification_additional_info(now),
            &event.result_resource,
            event.processing_time_ms(now),
        );
        self.retry_policy
            .execute("insert_notification", || {
                self.repositories.notifications.insert(&notification)
            })
            .await?;

        self.retry_policy
            .execute("update_counters", || {
                self.status_updater.update_processed_counts(task_id, counters)
            })
            .await?;

        self.touch_last_progress(task_id).await;

        if class.is_error {
            self.retry_policy
                .execute("record_error", || {
                    self.error_aggregator.record_error(
                        task_id,
                        event.error_message(),
                        &event.record_id,
                        event.error_additional_info(),
                    )
                })
                .await?;
        }

        self.retry_policy
            .execute("update_processed_record", || {
                self.repositories.processed_records.update_state(
                    task_id,
                    &event.record_id,
                    state,
                    &event.info_text,
                    &event.additional_info,
                )
            })
            .await
    }

    async fn finish_task(
        &self,
        task: &TaskInfo,
        terminal_event: &TaskEvent,
        counters: &TaskCounters,
    ) -> Result<TaskState> {
        let task_id = task.task_id;
        let target = TaskStateMachine::determine_target_state(task_id, task.state, terminal_event)?;
        let description = match target {
            TaskState::ReadyForPostProcessing => messages::READY_FOR_POST_PROCESSING,
            _ => messages::COMPLETELY_PROCESSED,
        };

        self.retry_policy
            .execute("update_task_state", || {
                self.status_updater.update_state(task_id, target, description)
            })
            .await?;

        if let Err(e) = self
            .repositories
            .diagnostics
            .update_finish_on_pipeline_time(task_id, Utc::now())
            .await
        {
            warn!(task_id, error = %e, "Unable to record pipeline finish time");
        }

        info!(
            task_id,
            pipeline = %task.pipeline,
            state = %target,
            counters = %counters.as_text(),
            "Task finished pipeline stage"
        );
        Ok(target)
    }

    async fn drop_task(&self, task_id: i64, reason: String) -> TrackingOutcome {
        self.counters.remove(&task_id);
        match self.status_updater.set_task_dropped(task_id, &reason).await {
            Ok(()) => warn!(task_id, reason = %reason, "Task dropped"),
            Err(HarvesterError::InvalidStateTransition { .. }) => {
                debug!(task_id, "Task already terminal, not dropping")
            }
            Err(e) => error!(task_id, error = %e, reason = %reason, "Unable to drop task"),
        }
        TrackingOutcome::TaskDropped { reason }
    }

    async fn touch_last_progress(&self, task_id: i64) {
        if let Err(e) = self
            .repositories
            .diagnostics
            .update_last_record_finished_on_pipeline_time(task_id, Utc::now())
            .await
        {
            warn!(task_id, error = %e, "Unable to update last progress time");
        }
    }
}
