//! # Indexing Post-Processor
//!
//! An indexing task replaces the whole dataset in its target environment.
//! Once its records went through the pipeline, the harvested-record table is
//! brought in line with what the environment now holds:
//!
//! - a record indexed successfully by the task gets its latest harvest date
//!   and hash stored as the environment's version,
//! - any other record of the dataset loses the environment's version, since
//!   the environment no longer holds it.
//!
//! Incremental harvesting compares new harvests against these columns, and
//! harvesting post-processing uses them to tell indexed records from ones
//! that were never published.
//!
//! Both writes are idempotent, so a resumed run simply repeats them.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::post_processing_scheduler::{PostProcessor, PROGRESS_UPDATE_INTERVAL};
use crate::database::Repositories;
use crate::error::{HarvesterError, Result};
use crate::logging::log_record_operation;
use crate::models::{HarvestedRecord, IndexingEnvironment, TaskInfo};
use crate::services::TaskStatusUpdater;
use crate::state_machine::RecordState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnvironmentChange {
    Indexed,
    Cleaned,
    Unchanged,
}

pub struct IndexingPostProcessor {
    repositories: Repositories,
    status_updater: TaskStatusUpdater,
    environments: HashMap<String, IndexingEnvironment>,
}

impl std::fmt::Debug for IndexingPostProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexingPostProcessor")
            .field("environments", &self.environments)
            .finish_non_exhaustive()
    }
}

impl IndexingPostProcessor {
    /// `environments` maps each indexing pipeline to the environment it writes
    pub fn new(repositories: Repositories, environments: HashMap<String, IndexingEnvironment>) -> Self {
        Self {
            status_updater: TaskStatusUpdater::new(repositories.clone()),
            repositories,
            environments,
        }
    }

    async fn handle_record(
        &self,
        task_id: i64,
        environment: IndexingEnvironment,
        record: &HarvestedRecord,
    ) -> Result<EnvironmentChange> {
        let indexed_by_task = self
            .repositories
            .processed_records
            .find(task_id, &record.record_id)
            .await?
            .is_some_and(|entry| entry.state == RecordState::Success);

        if indexed_by_task {
            self.repositories
                .harvested_records
                .update_indexing_environment(
                    &record.dataset_id,
                    &record.record_id,
                    environment,
                    record.latest_harvest_date,
                    record.latest_harvest_hash.as_deref(),
                )
                .await?;
            log_record_operation("post_process", task_id, &record.record_id, "indexed");
            return Ok(EnvironmentChange::Indexed);
        }

        if record.indexed_harvest_date(environment).is_some() {
            self.repositories
                .harvested_records
                .clean_environment(&record.dataset_id, &record.record_id, environment)
                .await?;
            log_record_operation("post_process", task_id, &record.record_id, "cleaned");
            return Ok(EnvironmentChange::Cleaned);
        }

        Ok(EnvironmentChange::Unchanged)
    }
}

#[async_trait]
impl PostProcessor for IndexingPostProcessor {
    fn handles(&self, pipeline: &str) -> bool {
        self.environments.contains_key(pipeline)
    }

    async fn post_process(&self, task: &TaskInfo, cancel: &CancellationToken) -> Result<()> {
        let task_id = task.task_id;
        let environment = *self.environments.get(&task.pipeline).ok_or_else(|| {
            HarvesterError::PostProcessing {
                task_id,
                reason: format!("pipeline {} indexes no environment", task.pipeline),
            }
        })?;
        let Some(dataset_id) = task.dataset_id.as_deref() else {
            return Err(HarvesterError::PostProcessing {
                task_id,
                reason: "indexing task without dataset".to_string(),
            });
        };

        let records = self
            .repositories
            .harvested_records
            .find_by_dataset(dataset_id)
            .await?;
        let expected = i32::try_from(records.len()).unwrap_or(i32::MAX);
        self.status_updater
            .update_post_processing_progress(task_id, expected, 0)
            .await?;
        debug!(task_id, dataset_id, %environment, expected, "Aligning indexed versions");

        let mut handled = 0;
        let mut indexed = 0;
        let mut cleaned = 0;
        for record in &records {
            if cancel.is_cancelled() {
                self.status_updater
                    .update_post_processing_progress(task_id, expected, handled)
                    .await?;
                return Err(HarvesterError::TaskDropped { task_id });
            }

            match self.handle_record(task_id, environment, record).await? {
                EnvironmentChange::Indexed => indexed += 1,
                EnvironmentChange::Cleaned => cleaned += 1,
                EnvironmentChange::Unchanged => {}
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
        info!(
            task_id,
            dataset_id,
            %environment,
            indexed,
            cleaned,
            "Indexing post-processing finished"
        );
        Ok(())
    }
}
