//! # Record Dedup Submitter
//!
//! Gate in front of the pipeline queues. A record enters a topic only if the
//! processed-record ledger does not already show it as submitted in the
//! current task run. The ledger row is written before the record is
//! enqueued, which is what guarantees that "queued" always precedes the
//! record's completion event.
//!
//! ## Restarts
//!
//! A restarted task re-submits only records whose ledger entry predates the
//! start of the current run. Records already touched by the current run are
//! suppressed, so a restart can itself be restarted without duplicates.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::database::{ProcessedRecordRepository, Repositories, TaskDiagnosticRepository};
use crate::error::{HarvesterError, Result};
use crate::logging::log_record_operation;
use crate::models::ProcessedRecord;

/// Record as handed to the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedRecord {
    pub record_id: String,
    /// Source reported the record as deleted
    pub marked_as_deleted: bool,
}

impl SubmittedRecord {
    pub fn new(record_id: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            marked_as_deleted: false,
        }
    }

    pub fn deleted(record_id: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            marked_as_deleted: true,
        }
    }
}

/// Queue of one pipeline topic
#[async_trait]
pub trait RecordQueue: Send + Sync {
    async fn enqueue(&self, topic: &str, task_id: i64, record: &SubmittedRecord) -> Result<()>;
}

/// Identity of the current run of a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRunContext {
    pub task_id: i64,
    pub topic: String,
    pub restarted: bool,
    pub run_start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmissionSummary {
    pub submitted: usize,
    pub suppressed: usize,
}

pub struct RecordDedupSubmitter {
    processed_records: Arc<dyn ProcessedRecordRepository>,
    diagnostics: Arc<dyn TaskDiagnosticRepository>,
    queue: Arc<dyn RecordQueue>,
}

impl std::fmt::Debug for RecordDedupSubmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordDedupSubmitter").finish_non_exhaustive()
    }
}

impl RecordDedupSubmitter {
    pub fn new(repositories: &Repositories, queue: Arc<dyn RecordQueue>) -> Self {
        Self {
            processed_records: repositories.processed_records.clone(),
            diagnostics: repositories.diagnostics.clone(),
            queue,
        }
    }

    /// Enqueue `record` unless the current run already submitted it.
    ///
    /// Returns `true` when the record was actually enqueued.
    pub async fn submit(&self, record: &SubmittedRecord, context: &TaskRunContext) -> Result<bool> {
        let existing = self
            .processed_records
            .find(context.task_id, &record.record_id)
            .await?;

        let attempt_number = match existing {
            None => 0,
            Some(entry) if context.restarted && entry.start_time < context.run_start_time => {
                entry.attempt_number + 1
            }
            Some(_) => {
                log_record_operation("submit", context.task_id, &record.record_id, "suppressed");
                return Ok(false);
            }
        };

        self.processed_records
            .upsert(&ProcessedRecord::queued(
                context.task_id,
                &record.record_id,
                attempt_number,
                Utc::now(),
            ))
            .await?;
        self.queue
            .enqueue(&context.topic, context.task_id, record)
            .await?;

        if let Err(e) = self
            .diagnostics
            .increment_started_records(context.task_id)
            .await
        {
            warn!(task_id = context.task_id, error = %e, "Unable to update started records count");
        }

        log_record_operation("submit", context.task_id, &record.record_id, "enqueued");
        Ok(true)
    }

    /// Submit records one by one, checking `cancel` before each of them.
    ///
    /// A cancelled token unwinds with [`HarvesterError::TaskDropped`].
    pub async fn submit_all<I>(
        &self,
        records: I,
        context: &TaskRunContext,
        cancel: &CancellationToken,
    ) -> Result<SubmissionSummary>
    where
        I: IntoIterator<Item = SubmittedRecord> + Send,
        I::IntoIter: Send,
    {
        let mut summary = SubmissionSummary::default();
        for record in records {
            if cancel.is_cancelled() {
                debug!(
                    task_id = context.task_id,
                    submitted = summary.submitted,
                    "Submission interrupted by task drop"
                );
                return Err(HarvesterError::TaskDropped {
                    task_id: context.task_id,
                });
            }

            if self.submit(&record, context).await? {
                summary.submitted += 1;
            } else {
                summary.suppressed += 1;
            }
        }
        Ok(summary)
    }
}
