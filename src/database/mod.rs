//! # Persistence Layer
//!
//! One repository trait per record family. The store behind them is assumed
//! to be eventually consistent and offers no multi-row transactions, so every
//! method is a single independent write or read. Callers that need grouped
//! writes order them explicitly and rely on the processed-record ledger as the
//! idempotency guard.
//!
//! Two implementations are provided:
//! - [`memory::InMemoryStore`] for tests and single-process deployments
//! - [`postgres::PgStore`] backed by sqlx against the schema in `migrations/`
//!
//! Components never reach for a global store; they receive a [`Repositories`]
//! bundle at construction time.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{HarvesterError, Result};
use crate::models::{
    ErrorNotification, ErrorType, HarvestedRecord, IndexingEnvironment, Notification,
    ProcessedRecord, TaskByState, TaskCounters, TaskDiagnosticInfo, TaskInfo,
};
use crate::state_machine::{RecordState, TaskState};

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

/// State change of a task. `None` timestamps leave the stored value untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskStateUpdate {
    pub state: TaskState,
    pub description: String,
    pub start_timestamp: Option<DateTime<Utc>>,
    pub finish_timestamp: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert a task or fully replace an existing row, counters and
    /// timestamps included
    async fn insert(&self, task: &TaskInfo) -> Result<()>;

    async fn find(&self, task_id: i64) -> Result<Option<TaskInfo>>;

    /// Like [`TaskRepository::find`], but a missing task is an error
    async fn get(&self, task_id: i64) -> Result<TaskInfo> {
        self.find(task_id)
            .await?
            .ok_or(HarvesterError::TaskInfoDoesNotExist { task_id })
    }

    async fn update_state(&self, task_id: i64, update: &TaskStateUpdate) -> Result<()>;

    /// Store a counter snapshot. Snapshots written out of order never move
    /// the stored total backwards: a snapshot whose total does not exceed
    /// the stored one is ignored.
    async fn update_counters(&self, task_id: i64, counters: &TaskCounters) -> Result<()>;

    async fn update_expected_size(&self, task_id: i64, expected_records_number: i32) -> Result<()>;

    async fn update_post_processing_progress(
        &self,
        task_id: i64,
        expected_post_processed_records_number: i32,
        post_processed_records_count: i32,
    ) -> Result<()>;
}

#[async_trait]
pub trait TasksByStateRepository: Send + Sync {
    async fn insert(&self, entry: &TaskByState) -> Result<()>;

    async fn delete(&self, state: TaskState, pipeline: &str, task_id: i64) -> Result<()>;

    async fn find(
        &self,
        state: TaskState,
        pipeline: &str,
        task_id: i64,
    ) -> Result<Option<TaskByState>>;

    async fn find_by_state(&self, state: TaskState) -> Result<Vec<TaskByState>>;

    async fn find_by_state_and_pipeline(
        &self,
        state: TaskState,
        pipeline: &str,
    ) -> Result<Vec<TaskByState>>;
}

#[async_trait]
pub trait ProcessedRecordRepository: Send + Sync {
    async fn find(&self, task_id: i64, record_id: &str) -> Result<Option<ProcessedRecord>>;

    /// Insert or fully replace the ledger entry of a record
    async fn upsert(&self, record: &ProcessedRecord) -> Result<()>;

    async fn update_state(
        &self,
        task_id: i64,
        record_id: &str,
        state: RecordState,
        info_text: &str,
        additional_info: &str,
    ) -> Result<()>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn insert(&self, notification: &Notification) -> Result<()>;

    /// Notifications of one bucket with `from <= resource_number <= to`,
    /// ordered by resource number
    async fn find_in_bucket(
        &self,
        task_id: i64,
        bucket_number: i32,
        from: i32,
        to: i32,
    ) -> Result<Vec<Notification>>;
}

#[async_trait]
pub trait ErrorRepository: Send + Sync {
    /// Add one occurrence and return the new total
    async fn increment_error_type(&self, task_id: i64, error_type: Uuid) -> Result<i64>;

    async fn count_samples(&self, task_id: i64, error_type: Uuid) -> Result<usize>;

    async fn insert_sample(&self, sample: &ErrorNotification) -> Result<()>;

    async fn list_error_types(&self, task_id: i64) -> Result<Vec<ErrorType>>;

    async fn find_samples(
        &self,
        task_id: i64,
        error_type: Uuid,
        limit: usize,
    ) -> Result<Vec<ErrorNotification>>;
}

#[async_trait]
pub trait HarvestedRecordRepository: Send + Sync {
    async fn find(&self, dataset_id: &str, record_id: &str) -> Result<Option<HarvestedRecord>>;

    async fn insert(&self, record: &HarvestedRecord) -> Result<()>;

    async fn update_latest_harvest(
        &self,
        dataset_id: &str,
        record_id: &str,
        harvest_date: DateTime<Utc>,
        harvest_hash: Option<&str>,
    ) -> Result<()>;

    /// Store the harvest now indexed in `environment`
    async fn update_indexing_environment(
        &self,
        dataset_id: &str,
        record_id: &str,
        environment: IndexingEnvironment,
        harvest_date: DateTime<Utc>,
        harvest_hash: Option<&str>,
    ) -> Result<()>;

    /// Forget what is indexed in `environment`
    async fn clean_environment(
        &self,
        dataset_id: &str,
        record_id: &str,
        environment: IndexingEnvironment,
    ) -> Result<()>;

    async fn find_by_dataset(&self, dataset_id: &str) -> Result<Vec<HarvestedRecord>>;

    async fn delete(&self, dataset_id: &str, record_id: &str) -> Result<()>;
}

#[async_trait]
pub trait TaskDiagnosticRepository: Send + Sync {
    async fn find(&self, task_id: i64) -> Result<Option<TaskDiagnosticInfo>>;

    async fn increment_started_records(&self, task_id: i64) -> Result<()>;

    async fn update_last_record_finished_on_pipeline_time(
        &self,
        task_id: i64,
        time: DateTime<Utc>,
    ) -> Result<()>;

    async fn update_finish_on_pipeline_time(&self, task_id: i64, time: DateTime<Utc>) -> Result<()>;

    async fn update_post_processing_start_time(
        &self,
        task_id: i64,
        time: DateTime<Utc>,
    ) -> Result<()>;
}

/// Handles to every repository, passed explicitly to each component
#[derive(Clone)]
pub struct Repositories {
    pub tasks: Arc<dyn TaskRepository>,
    pub tasks_by_state: Arc<dyn TasksByStateRepository>,
    pub processed_records: Arc<dyn ProcessedRecordRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
    pub errors: Arc<dyn ErrorRepository>,
    pub harvested_records: Arc<dyn HarvestedRecordRepository>,
    pub diagnostics: Arc<dyn TaskDiagnosticRepository>,
}

impl Repositories {
    /// Use one store for every record family
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: TaskRepository
            + TasksByStateRepository
            + ProcessedRecordRepository
            + NotificationRepository
            + ErrorRepository
            + HarvestedRecordRepository
            + TaskDiagnosticRepository
            + 'static,
    {
        Self {
            tasks: store.clone(),
            tasks_by_state: store.clone(),
            processed_records: store.clone(),
            notifications: store.clone(),
            errors: store.clone(),
            harvested_records: store.clone(),
            diagnostics: store,
        }
    }

    pub fn in_memory() -> Self {
        Self::from_store(Arc::new(InMemoryStore::new()))
    }

    #[cfg(feature = "postgres")]
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self::from_store(Arc::new(PgStore::new(pool)))
    }
}

impl std::fmt::Debug for Repositories {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repositories").finish_non_exhaustive()
    }
}
