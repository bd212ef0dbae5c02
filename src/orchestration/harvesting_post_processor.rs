//! # Harvesting Post-Processor
//!
//! After a harvest run every record of the dataset that the run did not see
//! again (its latest harvest predates the task's harvest date) is gone at the
//! source. Such a record is either forgotten outright, when no environment
//! ever indexed it, or reported to the [`DeletedRecordSink`] so downstream
//! environments can remove it.
//!
//! Reports are tracked in the processed-record ledger under the harvesting
//! task, so re-running post-processing after a crash never reports a record
//! twice.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::post_processing_scheduler::{PostProcessor, PROGRESS_UPDATE_INTERVAL};
use crate::database::Repositories;
use crate::error::{HarvesterError, Result};
use crate::logging::log_record_operation;
use crate::models::{HarvestedRecord, ProcessedRecord, TaskInfo};
use crate::services::TaskStatusUpdater;
use crate::state_machine::RecordState;

const REPORTED_AS_DELETED: &str = "Reported as deleted";

/// Receiver of records that disappeared from their source
#[async_trait]
pub trait DeletedRecordSink: Send + Sync {
    async fn report_deleted(&self, dataset_id: &str, record_id: &str, task_id: i64) -> Result<()>;
}

pub struct HarvestingPostProcessor {
    repositories: Repositories,
    status_updater: TaskStatusUpdater,
    sink: Arc<dyn DeletedRecordSink>,
    pipelines: Vec<String>,
}

impl std::fmt::Debug for HarvestingPostProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarvestingPostProcessor")
            .field("pipelines", &self.pipelines)
            .finish_non_exhaustive()
    }
}

impl HarvestingPostProcessor {
    pub fn new(
        repositories: Repositories,
        sink: Arc<dyn DeletedRecordSink>,
        pipelines: Vec<String>,
    ) -> Self {
        Self {
            status_updater: TaskStatusUpdater::new(repositories.clone()),
            repositories,
            sink,
            pipelines,
        }
    }

    /// Returns `true` when the record was reported by this call
    async fn handle_record(&self, task_id: i64, record: &HarvestedRecord) -> Result<bool> {
        if !record.is_indexed_in_some_environment() {
            self.repositories
                .harvested_records
                .delete(&record.dataset_id, &record.record_id)
                .await?;
            log_record_operation("post_process", task_id, &record.record_id, "forgotten");
            return Ok(false);
        }

        let ledger = self
            .repositories
            .processed_records
            .find(task_id, &record.record_id)
            .await?;
        if ledger.is_some_and(|entry| entry.is_finished()) {
            log_record_operation("post_process", task_id, &record.record_id, "already_reported");
            return Ok(false);
        }

        self.sink
            .report_deleted(&record.dataset_id, &record.record_id, task_id)
            .await?;

        let mut entry = ProcessedRecord::queued(task_id, &record.record_id, 0, Utc::now());
        entry.state = RecordState::Success;
        entry.info_text = REPORTED_AS_DELETED.to_string();
        self.repositories.processed_records.upsert(&entry).await?;

        log_record_operation("post_process", task_id, &record.record_id, "reported_deleted");
        Ok(true)
    }
}

#[async_trait]
impl PostProcessor for HarvestingPostProcessor {
    fn handles(&self, pipeline: &str) -> bool {
        self.pipelines.iter().any(|p| p == pipeline)
    }

    async fn post_process(&self, task: &TaskInfo, cancel: &CancellationToken) -> Result<()> {
        let task_id = task.task_id;
        let (Some(dataset_id), Some(harvest_date)) = (task.dataset_id.as_deref(), task.harvest_date)
        else {
            return Err(HarvesterError::PostProcessing {
                task_id,
                reason: "harvesting task without dataset or harvest date".to_string(),
            });
        };

        let stale: Vec<HarvestedRecord> = self
            .repositories
            .harvested_records
            .find_by_dataset(dataset_id)
            .await?
            .into_iter()
            .filter(|record| record.latest_harvest_date < harvest_date)
            .collect();

        let expected = i32::try_from(stale.len()).unwrap_or(i32::MAX);
        self.status_updater
            .update_post_processing_progress(task_id, expected, 0)
            .await?;
        debug!(task_id, dataset_id, expected, "Records missing from the latest harvest");

        let mut handled = 0;
        let mut reported = 0;
        for record in &stale {
            if cancel.is_cancelled() {
                self.status_updater
                    .update_post_processing_progress(task_id, expected, handled)
                    .await?;
                return Err(HarvesterError::TaskDropped { task_id });
            }

            if self.handle_record(task_id, record).await? {
                reported += 1;
            }
            handled += 1;

            if handled % PROGRESS_UPDATE_INTERVAL == 0 {
                if let Err(e) = self
                    .status_updater
                    .update_post_processing_progress(task_id, expected, handled)
                    .await
                {
                    warn!(task_id, error = %e, "Unable to store post-processing progress");
                }
            }
        }

        self.status_updater
            .update_post_processing_progress(task_id, expected, handled)
            .await?;
        info!(task_id, dataset_id, handled, reported, "Harvest post-processing finished");
        Ok(())
    }
}
