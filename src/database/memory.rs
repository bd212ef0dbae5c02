//! # In-Memory Store
//!
//! Process-local implementation of every repository trait on top of
//! `DashMap`. Each method touches a single shard and never holds a map guard
//! across an await point, which mirrors the single-row write granularity of
//! the distributed store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::{
    ErrorRepository, HarvestedRecordRepository, NotificationRepository, ProcessedRecordRepository,
    TaskDiagnosticRepository, TaskRepository, TaskStateUpdate, TasksByStateRepository,
};
use crate::error::{HarvesterError, Result};
use crate::models::{
    ErrorNotification, ErrorType, HarvestedRecord, IndexingEnvironment, Notification,
    ProcessedRecord, TaskByState, TaskCounters, TaskDiagnosticInfo, TaskInfo,
};
use crate::state_machine::{RecordState, TaskState};

type TaskByStateKey = (TaskState, String, i64);

#[derive(Debug, Default)]
pub struct InMemoryStore {
    tasks: DashMap<i64, TaskInfo>,
    tasks_by_state: DashMap<TaskByStateKey, TaskByState>,
    processed_records: DashMap<(i64, String), ProcessedRecord>,
    notifications: DashMap<(i64, i32), BTreeMap<i32, Notification>>,
    error_types: DashMap<(i64, Uuid), i64>,
    error_samples: DashMap<(i64, Uuid), Vec<ErrorNotification>>,
    harvested_records: DashMap<(String, String), HarvestedRecord>,
    diagnostics: DashMap<i64, TaskDiagnosticInfo>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_task<F>(&self, task_id: i64, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut TaskInfo),
    {
        let mut task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(HarvesterError::TaskInfoDoesNotExist { task_id })?;
        mutate(task.value_mut());
        Ok(())
    }

    fn with_harvested_record<F>(&self, dataset_id: &str, record_id: &str, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut HarvestedRecord),
    {
        let key = (dataset_id.to_string(), record_id.to_string());
        let mut record = self.harvested_records.get_mut(&key).ok_or_else(|| {
            HarvesterError::Validation(format!(
                "harvested record {record_id} of dataset {dataset_id} does not exist"
            ))
        })?;
        mutate(record.value_mut());
        Ok(())
    }

    fn with_diagnostics<F>(&self, task_id: i64, mutate: F)
    where
        F: FnOnce(&mut TaskDiagnosticInfo),
    {
        let mut info = self
            .diagnostics
            .entry(task_id)
            .or_insert_with(|| TaskDiagnosticInfo::new(task_id));
        mutate(info.value_mut());
    }
}

#[async_trait]
impl TaskRepository for InMemoryStore {
    async fn insert(&self, task: &TaskInfo) -> Result<()> {
        self.tasks.insert(task.task_id, task.clone());
        Ok(())
    }

    async fn find(&self, task_id: i64) -> Result<Option<TaskInfo>> {
        Ok(self.tasks.get(&task_id).map(|task| task.value().clone()))
    }

    async fn update_state(&self, task_id: i64, update: &TaskStateUpdate) -> Result<()> {
        self.with_task(task_id, |task| {
            task.state = update.state;
            task.state_description = update.description.clone();
            if let Some(start) = update.start_timestamp {
                task.start_timestamp = Some(start);
            }
            if let Some(finish) = update.finish_timestamp {
                task.finish_timestamp = Some(finish);
            }
        })
    }

    async fn update_counters(&self, task_id: i64, counters: &TaskCounters) -> Result<()> {
        self.with_task(task_id, |task| {
            if counters.total() > task.counters.total() {
                task.counters = *counters;
            }
        })
    }

    async fn update_expected_size(&self, task_id: i64, expected_records_number: i32) -> Result<()> {
        self.with_task(task_id, |task| {
            task.expected_records_number = expected_records_number
        })
    }

    async fn update_post_processing_progress(
        &self,
        task_id: i64,
        expected_post_processed_records_number: i32,
        post_processed_records_count: i32,
    ) -> Result<()> {
        self.with_task(task_id, |task| {
            task.expected_post_processed_records_number = expected_post_processed_records_number;
            task.post_processed_records_count = post_processed_records_count;
        })
    }
}

#[async_trait]
impl TasksByStateRepository for InMemoryStore {
    async fn insert(&self, entry: &TaskByState) -> Result<()> {
        self.tasks_by_state.insert(
            (entry.state, entry.pipeline.clone(), entry.task_id),
            entry.clone(),
        );
        Ok(())
    }

    async fn delete(&self, state: TaskState, pipeline: &str, task_id: i64) -> Result<()> {
        self.tasks_by_state
            .remove(&(state, pipeline.to_string(), task_id));
        Ok(())
    }

    async fn find(
        &self,
        state: TaskState,
        pipeline: &str,
        task_id: i64,
    ) -> Result<Option<TaskByState>> {
        Ok(self
            .tasks_by_state
            .get(&(state, pipeline.to_string(), task_id))
            .map(|entry| entry.value().clone()))
    }

    async fn find_by_state(&self, state: TaskState) -> Result<Vec<TaskByState>> {
        let mut entries: Vec<TaskByState> = self
            .tasks_by_state
            .iter()
            .filter(|entry| entry.key().0 == state)
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by_key(|entry| entry.task_id);
        Ok(entries)
    }

    async fn find_by_state_and_pipeline(
        &self,
        state: TaskState,
        pipeline: &str,
    ) -> Result<Vec<TaskByState>> {
        let mut entries: Vec<TaskByState> = self
            .tasks_by_state
            .iter()
            .filter(|entry| entry.key().0 == state && entry.key().1 == pipeline)
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by_key(|entry| entry.task_id);
        Ok(entries)
    }
}

#[async_trait]
impl ProcessedRecordRepository for InMemoryStore {
    async fn find(&self, task_id: i64, record_id: &str) -> Result<Option<ProcessedRecord>> {
        Ok(self
            .processed_records
            .get(&(task_id, record_id.to_string()))
            .map(|record| record.value().clone()))
    }

    async fn upsert(&self, record: &ProcessedRecord) -> Result<()> {
        self.processed_records
            .insert((record.task_id, record.record_id.clone()), record.clone());
        Ok(())
    }

    async fn update_state(
        &self,
        task_id: i64,
        record_id: &str,
        state: RecordState,
        info_text: &str,
        additional_info: &str,
    ) -> Result<()> {
        let mut record = self
            .processed_records
            .entry((task_id, record_id.to_string()))
            .or_insert_with(|| ProcessedRecord::queued(task_id, record_id, 0, Utc::now()));
        record.state = state;
        record.info_text = info_text.to_string();
        record.additional_info = additional_info.to_string();
        Ok(())
    }
}

#[async_trait]
impl NotificationRepository for InMemoryStore {
    async fn insert(&self, notification: &Notification) -> Result<()> {
        self.notifications
            .entry((notification.task_id, notification.bucket_number))
            .or_default()
            .insert(notification.resource_number, notification.clone());
        Ok(())
    }

    async fn find_in_bucket(
        &self,
        task_id: i64,
        bucket_number: i32,
        from: i32,
        to: i32,
    ) -> Result<Vec<Notification>> {
        if from > to {
            return Ok(Vec::new());
        }
        Ok(self
            .notifications
            .get(&(task_id, bucket_number))
            .map(|bucket| bucket.range(from..=to).map(|(_, n)| n.clone()).collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl ErrorRepository for InMemoryStore {
    async fn increment_error_type(&self, task_id: i64, error_type: Uuid) -> Result<i64> {
        let mut occurrences = self.error_types.entry((task_id, error_type)).or_insert(0);
        *occurrences += 1;
        Ok(*occurrences)
    }

    async fn count_samples(&self, task_id: i64, error_type: Uuid) -> Result<usize> {
        Ok(self
            .error_samples
            .get(&(task_id, error_type))
            .map_or(0, |samples| samples.len()))
    }

    async fn insert_sample(&self, sample: &ErrorNotification) -> Result<()> {
        self.error_samples
            .entry((sample.task_id, sample.error_type))
            .or_default()
            .push(sample.clone());
        Ok(())
    }

    async fn list_error_types(&self, task_id: i64) -> Result<Vec<ErrorType>> {
        let mut types: Vec<ErrorType> = self
            .error_types
            .iter()
            .filter(|entry| entry.key().0 == task_id)
            .map(|entry| ErrorType {
                task_id,
                error_type: entry.key().1,
                occurrences: *entry.value(),
            })
            .collect();
        types.sort_by_key(|error_type| error_type.error_type);
        Ok(types)
    }

    async fn find_samples(
        &self,
        task_id: i64,
        error_type: Uuid,
        limit: usize,
    ) -> Result<Vec<ErrorNotification>> {
        Ok(self
            .error_samples
            .get(&(task_id, error_type))
            .map(|samples| samples.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl HarvestedRecordRepository for InMemoryStore {
    async fn find(&self, dataset_id: &str, record_id: &str) -> Result<Option<HarvestedRecord>> {
        Ok(self
            .harvested_records
            .get(&(dataset_id.to_string(), record_id.to_string()))
            .map(|record| record.value().clone()))
    }

    async fn insert(&self, record: &HarvestedRecord) -> Result<()> {
        self.harvested_records.insert(
            (record.dataset_id.clone(), record.record_id.clone()),
            record.clone(),
        );
        Ok(())
    }

    async fn update_latest_harvest(
        &self,
        dataset_id: &str,
        record_id: &str,
        harvest_date: DateTime<Utc>,
        harvest_hash: Option<&str>,
    ) -> Result<()> {
        self.with_harvested_record(dataset_id, record_id, |record| {
            record.latest_harvest_date = harvest_date;
            record.latest_harvest_hash = harvest_hash.map(str::to_string);
        })
    }

    async fn update_indexing_environment(
        &self,
        dataset_id: &str,
        record_id: &str,
        environment: IndexingEnvironment,
        harvest_date: DateTime<Utc>,
        harvest_hash: Option<&str>,
    ) -> Result<()> {
        self.with_harvested_record(dataset_id, record_id, |record| {
            record.mark_indexed(environment, harvest_date, harvest_hash.map(str::to_string))
        })
    }

    async fn clean_environment(
        &self,
        dataset_id: &str,
        record_id: &str,
        environment: IndexingEnvironment,
    ) -> Result<()> {
        self.with_harvested_record(dataset_id, record_id, |record| {
            record.clear_environment(environment)
        })
    }

    async fn find_by_dataset(&self, dataset_id: &str) -> Result<Vec<HarvestedRecord>> {
        let mut records: Vec<HarvestedRecord> = self
            .harvested_records
            .iter()
            .filter(|entry| entry.key().0 == dataset_id)
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| a.record_id.cmp(&b.record_id));
        Ok(records)
    }

    async fn delete(&self, dataset_id: &str, record_id: &str) -> Result<()> {
        self.harvested_records
            .remove(&(dataset_id.to_string(), record_id.to_string()));
        Ok(())
    }
}

#[async_trait]
impl TaskDiagnosticRepository for InMemoryStore {
    async fn find(&self, task_id: i64) -> Result<Option<TaskDiagnosticInfo>> {
        Ok(self
            .diagnostics
            .get(&task_id)
            .map(|info| info.value().clone()))
    }

    async fn increment_started_records(&self, task_id: i64) -> Result<()> {
        self.with_diagnostics(task_id, |info| info.started_records_count += 1);
        Ok(())
    }

    async fn update_last_record_finished_on_pipeline_time(
        &self,
        task_id: i64,
        time: DateTime<Utc>,
    ) -> Result<()> {
        self.with_diagnostics(task_id, |info| {
            info.last_record_finished_on_pipeline_time = Some(time)
        });
        Ok(())
    }

    async fn update_finish_on_pipeline_time(&self, task_id: i64, time: DateTime<Utc>) -> Result<()> {
        self.with_diagnostics(task_id, |info| info.finish_on_pipeline_time = Some(time));
        Ok(())
    }

    async fn update_post_processing_start_time(
        &self,
        task_id: i64,
        time: DateTime<Utc>,
    ) -> Result<()> {
        self.with_diagnostics(task_id, |info| info.post_processing_start_time = Some(time));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewTask;

    fn task(task_id: i64) -> TaskInfo {
        NewTask {
            task_id,
            pipeline: "oai_harvest".to_string(),
            expected_records_number: 3,
            sent_timestamp: Utc::now(),
            restarted: false,
            dataset_id: None,
            harvest_date: None,
            harvesting: false,
        }
        .into_task_info("test-app")
    }

    #[tokio::test]
    async fn test_task_updates_require_existing_task() {
        let store = InMemoryStore::new();
        let result = TaskRepository::update_expected_size(&store, 9, 5).await;
        assert_eq!(result, Err(HarvesterError::TaskInfoDoesNotExist { task_id: 9 }));

        TaskRepository::insert(&store, &task(9)).await.unwrap();
        TaskRepository::update_expected_size(&store, 9, 5).await.unwrap();
        let stored = TaskRepository::get(&store, 9).await.unwrap();
        assert_eq!(stored.expected_records_number, 5);
    }

    #[tokio::test]
    async fn test_stale_counter_snapshots_are_ignored() {
        let store = InMemoryStore::new();
        TaskRepository::insert(&store, &task(4)).await.unwrap();

        let newer = TaskCounters {
            processed: 2,
            ..Default::default()
        };
        let older = TaskCounters {
            processed: 1,
            ..Default::default()
        };
        store.update_counters(4, &newer).await.unwrap();
        store.update_counters(4, &older).await.unwrap();

        let stored = TaskRepository::get(&store, 4).await.unwrap();
        assert_eq!(stored.counters, newer);
    }

    #[tokio::test]
    async fn test_notification_range_scan_is_ordered() {
        let store = InMemoryStore::new();
        for resource_number in [3, 1, 2, 10_001] {
            let notification = Notification::new(
                1,
                resource_number,
                "oai_harvest",
                format!("record-{resource_number}"),
                RecordState::Success,
                "",
                "",
                "",
                5,
            );
            NotificationRepository::insert(&store, &notification)
                .await
                .unwrap();
        }

        let bucket = store.find_in_bucket(1, 0, 1, 3).await.unwrap();
        let numbers: Vec<i32> = bucket.iter().map(|n| n.resource_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);

        let next_bucket = store.find_in_bucket(1, 1, 10_000, 10_005).await.unwrap();
        assert_eq!(next_bucket.len(), 1);
    }

    #[tokio::test]
    async fn test_indexing_environment_columns_are_written_and_cleaned() {
        let store = InMemoryStore::new();
        let harvested = Utc::now();
        HarvestedRecordRepository::insert(
            &store,
            &HarvestedRecord::first_sighting("d", "r", harvested, Some("h1".to_string())),
        )
        .await
        .unwrap();

        store
            .update_indexing_environment("d", "r", IndexingEnvironment::Published, harvested, Some("h1"))
            .await
            .unwrap();
        let record = HarvestedRecordRepository::find(&store, "d", "r").await.unwrap().unwrap();
        assert_eq!(record.published_harvest_date, Some(harvested));
        assert_eq!(record.published_harvest_hash.as_deref(), Some("h1"));
        assert_eq!(record.preview_harvest_date, None);

        store
            .clean_environment("d", "r", IndexingEnvironment::Published)
            .await
            .unwrap();
        let record = HarvestedRecordRepository::find(&store, "d", "r").await.unwrap().unwrap();
        assert!(!record.is_indexed_in_some_environment());

        let missing = store
            .clean_environment("d", "unknown", IndexingEnvironment::Preview)
            .await;
        assert!(matches!(missing, Err(HarvesterError::Validation(_))));
    }

    #[tokio::test]
    async fn test_tasks_by_state_filters_by_pipeline() {
        let store = InMemoryStore::new();
        for (task_id, pipeline) in [(1, "oai_harvest"), (2, "oai_harvest"), (3, "indexing")] {
            TasksByStateRepository::insert(
                &store,
                &TaskByState {
                    state: TaskState::Processing,
                    pipeline: pipeline.to_string(),
                    task_id,
                    owner_id: "app".to_string(),
                    topic_name: "topic".to_string(),
                    start_time: None,
                },
            )
            .await
            .unwrap();
        }

        let harvests = store
            .find_by_state_and_pipeline(TaskState::Processing, "oai_harvest")
            .await
            .unwrap();
        assert_eq!(harvests.len(), 2);
        assert_eq!(store.find_by_state(TaskState::Processing).await.unwrap().len(), 3);
        assert!(store.find_by_state(TaskState::Queued).await.unwrap().is_empty());
    }
}
