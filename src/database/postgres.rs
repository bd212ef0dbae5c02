//! # Postgres Store
//!
//! sqlx implementation of the repository traits against the schema in
//! `migrations/`. Queries are checked at runtime so the crate builds without
//! a live database; rows are mapped by hand with [`Row::try_get`].

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use super::{
    ErrorRepository, HarvestedRecordRepository, NotificationRepository, ProcessedRecordRepository,
    TaskDiagnosticRepository, TaskRepository, TaskStateUpdate, TasksByStateRepository,
};
use crate::config::DatabaseConfig;
use crate::error::{HarvesterError, Result};
use crate::models::{
    ErrorNotification, ErrorType, HarvestedRecord, IndexingEnvironment, Notification,
    ProcessedRecord, TaskByState, TaskCounters, TaskDiagnosticInfo, TaskInfo,
};
use crate::state_machine::{RecordState, TaskState};

const TASK_COLUMNS: &str = "task_id, pipeline, state, state_description, expected_records_number, \
     processed_records_count, ignored_records_count, deleted_records_count, \
     processed_errors_count, deleted_errors_count, expected_post_processed_records_number, \
     post_processed_records_count, sent_timestamp, start_timestamp, finish_timestamp, \
     restarted, owner_id, dataset_id, harvest_date";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool sized from configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = config.database_url().ok_or_else(|| {
            HarvesterError::Configuration(
                "database url is not configured (database.url or DATABASE_URL)".to_string(),
            )
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&url)
            .await?;

        info!(
            max_connections = config.max_connections,
            "Connected harvester store to Postgres"
        );
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_task_state(value: &str) -> Result<TaskState> {
    TaskState::from_str(value).map_err(HarvesterError::Database)
}

fn parse_record_state(value: &str) -> Result<RecordState> {
    RecordState::from_str(value).map_err(HarvesterError::Database)
}

fn task_from_row(row: &PgRow) -> Result<TaskInfo> {
    let state: String = row.try_get("state")?;
    Ok(TaskInfo {
        task_id: row.try_get("task_id")?,
        pipeline: row.try_get("pipeline")?,
        state: parse_task_state(&state)?,
        state_description: row.try_get("state_description")?,
        expected_records_number: row.try_get("expected_records_number")?,
        counters: TaskCounters {
            processed: row.try_get("processed_records_count")?,
            ignored: row.try_get("ignored_records_count")?,
            deleted: row.try_get("deleted_records_count")?,
            processed_errors: row.try_get("processed_errors_count")?,
            deleted_errors: row.try_get("deleted_errors_count")?,
        },
        expected_post_processed_records_number: row
            .try_get("expected_post_processed_records_number")?,
        post_processed_records_count: row.try_get("post_processed_records_count")?,
        sent_timestamp: row.try_get("sent_timestamp")?,
        start_timestamp: row.try_get("start_timestamp")?,
        finish_timestamp: row.try_get("finish_timestamp")?,
        restarted: row.try_get("restarted")?,
        owner_id: row.try_get("owner_id")?,
        dataset_id: row.try_get("dataset_id")?,
        harvest_date: row.try_get("harvest_date")?,
    })
}

fn task_by_state_from_row(row: &PgRow) -> Result<TaskByState> {
    let state: String = row.try_get("state")?;
    Ok(TaskByState {
        state: parse_task_state(&state)?,
        pipeline: row.try_get("pipeline")?,
        task_id: row.try_get("task_id")?,
        owner_id: row.try_get("owner_id")?,
        topic_name: row.try_get("topic_name")?,
        start_time: row.try_get("start_time")?,
    })
}

fn processed_record_from_row(row: &PgRow) -> Result<ProcessedRecord> {
    let state: String = row.try_get("state")?;
    Ok(ProcessedRecord {
        task_id: row.try_get("task_id")?,
        record_id: row.try_get("record_id")?,
        attempt_number: row.try_get("attempt_number")?,
        state: parse_record_state(&state)?,
        start_time: row.try_get("start_time")?,
        info_text: row.try_get("info_text")?,
        additional_info: row.try_get("additional_info")?,
    })
}

fn notification_from_row(row: &PgRow) -> Result<Notification> {
    let state: String = row.try_get("state")?;
    Ok(Notification {
        task_id: row.try_get("task_id")?,
        bucket_number: row.try_get("bucket_number")?,
        resource_number: row.try_get("resource_number")?,
        pipeline: row.try_get("pipeline")?,
        resource: row.try_get("resource")?,
        state: parse_record_state(&state)?,
        info_text: row.try_get("info_text")?,
        additional_info: row.try_get("additional_info")?,
        result_resource: row.try_get("result_resource")?,
        processing_time_ms: row.try_get("processing_time_ms")?,
    })
}

fn harvested_record_from_row(row: &PgRow) -> Result<HarvestedRecord> {
    Ok(HarvestedRecord {
        dataset_id: row.try_get("dataset_id")?,
        record_id: row.try_get("record_id")?,
        latest_harvest_date: row.try_get("latest_harvest_date")?,
        latest_harvest_hash: row.try_get("latest_harvest_hash")?,
        preview_harvest_date: row.try_get("preview_harvest_date")?,
        preview_harvest_hash: row.try_get("preview_harvest_hash")?,
        published_harvest_date: row.try_get("published_harvest_date")?,
        published_harvest_hash: row.try_get("published_harvest_hash")?,
    })
}

/// Date and hash columns of an indexing environment
fn environment_columns(environment: IndexingEnvironment) -> (&'static str, &'static str) {
    match environment {
        IndexingEnvironment::Preview => ("preview_harvest_date", "preview_harvest_hash"),
        IndexingEnvironment::Published => ("published_harvest_date", "published_harvest_hash"),
    }
}

/// Fail updates that matched no harvested record row
fn require_harvested_row(rows_affected: u64, dataset_id: &str, record_id: &str) -> Result<()> {
    if rows_affected == 0 {
        return Err(HarvesterError::Validation(format!(
            "harvested record {record_id} of dataset {dataset_id} does not exist"
        )));
    }
    Ok(())
}

/// Fail updates that matched no task row
fn require_task_row(rows_affected: u64, task_id: i64) -> Result<()> {
    if rows_affected == 0 {
        return Err(HarvesterError::TaskInfoDoesNotExist { task_id });
    }
    Ok(())
}

#[async_trait]
impl TaskRepository for PgStore {
    async fn insert(&self, task: &TaskInfo) -> Result<()> {
        let sql = format!(
            "INSERT INTO tasks ({TASK_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19) \
             ON CONFLICT (task_id) DO UPDATE SET \
             pipeline = EXCLUDED.pipeline, state = EXCLUDED.state, \
             state_description = EXCLUDED.state_description, \
             expected_records_number = EXCLUDED.expected_records_number, \
             processed_records_count = EXCLUDED.processed_records_count, \
             ignored_records_count = EXCLUDED.ignored_records_count, \
             deleted_records_count = EXCLUDED.deleted_records_count, \
             processed_errors_count = EXCLUDED.processed_errors_count, \
             deleted_errors_count = EXCLUDED.deleted_errors_count, \
             expected_post_processed_records_number = EXCLUDED.expected_post_processed_records_number, \
             post_processed_records_count = EXCLUDED.post_processed_records_count, \
             sent_timestamp = EXCLUDED.sent_timestamp, start_timestamp = EXCLUDED.start_timestamp, \
             finish_timestamp = EXCLUDED.finish_timestamp, restarted = EXCLUDED.restarted, \
             owner_id = EXCLUDED.owner_id, dataset_id = EXCLUDED.dataset_id, \
             harvest_date = EXCLUDED.harvest_date"
        );
        sqlx::query(&sql)
            .bind(task.task_id)
            .bind(&task.pipeline)
            .bind(task.state.as_str())
            .bind(&task.state_description)
            .bind(task.expected_records_number)
            .bind(task.counters.processed)
            .bind(task.counters.ignored)
            .bind(task.counters.deleted)
            .bind(task.counters.processed_errors)
            .bind(task.counters.deleted_errors)
            .bind(task.expected_post_processed_records_number)
            .bind(task.post_processed_records_count)
            .bind(task.sent_timestamp)
            .bind(task.start_timestamp)
            .bind(task.finish_timestamp)
            .bind(task.restarted)
            .bind(&task.owner_id)
            .bind(&task.dataset_id)
            .bind(task.harvest_date)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find(&self, task_id: i64) -> Result<Option<TaskInfo>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = $1");
        let row = sqlx::query(&sql)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn update_state(&self, task_id: i64, update: &TaskStateUpdate) -> Result<()> {
        let result = sqlx::query(
            "UPDATE tasks SET state = $2, state_description = $3, \
             start_timestamp = COALESCE($4, start_timestamp), \
             finish_timestamp = COALESCE($5, finish_timestamp) \
             WHERE task_id = $1",
        )
        .bind(task_id)
        .bind(update.state.as_str())
        .bind(&update.description)
        .bind(update.start_timestamp)
        .bind(update.finish_timestamp)
        .execute(&self.pool)
        .await?;
        require_task_row(result.rows_affected(), task_id)
    }

    async fn update_counters(&self, task_id: i64, counters: &TaskCounters) -> Result<()> {
        sqlx::query(
            "UPDATE tasks SET processed_records_count = $2, ignored_records_count = $3, \
             deleted_records_count = $4, processed_errors_count = $5, deleted_errors_count = $6 \
             WHERE task_id = $1 \
             AND processed_records_count + ignored_records_count + deleted_records_count < $7",
        )
        .bind(task_id)
        .bind(counters.processed)
        .bind(counters.ignored)
        .bind(counters.deleted)
        .bind(counters.processed_errors)
        .bind(counters.deleted_errors)
        .bind(counters.total())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_expected_size(&self, task_id: i64, expected_records_number: i32) -> Result<()> {
        let result = sqlx::query("UPDATE tasks SET expected_records_number = $2 WHERE task_id = $1")
            .bind(task_id)
            .bind(expected_records_number)
            .execute(&self.pool)
            .await?;
        require_task_row(result.rows_affected(), task_id)
    }

    async fn update_post_processing_progress(
        &self,
        task_id: i64,
        expected_post_processed_records_number: i32,
        post_processed_records_count: i32,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE tasks SET expected_post_processed_records_number = $2, \
             post_processed_records_count = $3 WHERE task_id = $1",
        )
        .bind(task_id)
        .bind(expected_post_processed_records_number)
        .bind(post_processed_records_count)
        .execute(&self.pool)
        .await?;
        require_task_row(result.rows_affected(), task_id)
    }
}

#[async_trait]
impl TasksByStateRepository for PgStore {
    async fn insert(&self, entry: &TaskByState) -> Result<()> {
        sqlx::query(
            "INSERT INTO tasks_by_state (state, pipeline, task_id, owner_id, topic_name, start_time) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (state, pipeline, task_id) DO UPDATE SET \
             owner_id = EXCLUDED.owner_id, topic_name = EXCLUDED.topic_name, \
             start_time = EXCLUDED.start_time",
        )
        .bind(entry.state.as_str())
        .bind(&entry.pipeline)
        .bind(entry.task_id)
        .bind(&entry.owner_id)
        .bind(&entry.topic_name)
        .bind(entry.start_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, state: TaskState, pipeline: &str, task_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM tasks_by_state WHERE state = $1 AND pipeline = $2 AND task_id = $3")
            .bind(state.as_str())
            .bind(pipeline)
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find(
        &self,
        state: TaskState,
        pipeline: &str,
        task_id: i64,
    ) -> Result<Option<TaskByState>> {
        let row = sqlx::query(
            "SELECT state, pipeline, task_id, owner_id, topic_name, start_time FROM tasks_by_state \
             WHERE state = $1 AND pipeline = $2 AND task_id = $3",
        )
        .bind(state.as_str())
        .bind(pipeline)
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(task_by_state_from_row).transpose()
    }

    async fn find_by_state(&self, state: TaskState) -> Result<Vec<TaskByState>> {
        let rows = sqlx::query(
            "SELECT state, pipeline, task_id, owner_id, topic_name, start_time FROM tasks_by_state \
             WHERE state = $1 ORDER BY task_id",
        )
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_by_state_from_row).collect()
    }

    async fn find_by_state_and_pipeline(
        &self,
        state: TaskState,
        pipeline: &str,
    ) -> Result<Vec<TaskByState>> {
        let rows = sqlx::query(
            "SELECT state, pipeline, task_id, owner_id, topic_name, start_time FROM tasks_by_state \
             WHERE state = $1 AND pipeline = $2 ORDER BY task_id",
        )
        .bind(state.as_str())
        .bind(pipeline)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_by_state_from_row).collect()
    }
}

#[async_trait]
impl ProcessedRecordRepository for PgStore {
    async fn find(&self, task_id: i64, record_id: &str) -> Result<Option<ProcessedRecord>> {
        let row = sqlx::query(
            "SELECT task_id, record_id, attempt_number, state, start_time, info_text, additional_info \
             FROM processed_records WHERE task_id = $1 AND record_id = $2",
        )
        .bind(task_id)
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(processed_record_from_row).transpose()
    }

    async fn upsert(&self, record: &ProcessedRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO processed_records \
             (task_id, record_id, attempt_number, state, start_time, info_text, additional_info) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (task_id, record_id) DO UPDATE SET \
             attempt_number = EXCLUDED.attempt_number, state = EXCLUDED.state, \
             start_time = EXCLUDED.start_time, info_text = EXCLUDED.info_text, \
             additional_info = EXCLUDED.additional_info",
        )
        .bind(record.task_id)
        .bind(&record.record_id)
        .bind(record.attempt_number)
        .bind(record.state.as_str())
        .bind(record.start_time)
        .bind(&record.info_text)
        .bind(&record.additional_info)
        .execute(&self.pool)
        .await?;
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
        sqlx::query(
            "INSERT INTO processed_records \
             (task_id, record_id, attempt_number, state, start_time, info_text, additional_info) \
             VALUES ($1, $2, 0, $3, NOW(), $4, $5) \
             ON CONFLICT (task_id, record_id) DO UPDATE SET \
             state = EXCLUDED.state, info_text = EXCLUDED.info_text, \
             additional_info = EXCLUDED.additional_info",
        )
        .bind(task_id)
        .bind(record_id)
        .bind(state.as_str())
        .bind(info_text)
        .bind(additional_info)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl NotificationRepository for PgStore {
    async fn insert(&self, notification: &Notification) -> Result<()> {
        sqlx::query(
            "INSERT INTO notifications \
             (task_id, bucket_number, resource_number, pipeline, resource, state, info_text, \
              additional_info, result_resource, processing_time_ms) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (task_id, bucket_number, resource_number) DO NOTHING",
        )
        .bind(notification.task_id)
        .bind(notification.bucket_number)
        .bind(notification.resource_number)
        .bind(&notification.pipeline)
        .bind(&notification.resource)
        .bind(notification.state.as_str())
        .bind(&notification.info_text)
        .bind(&notification.additional_info)
        .bind(&notification.result_resource)
        .bind(notification.processing_time_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_in_bucket(
        &self,
        task_id: i64,
        bucket_number: i32,
        from: i32,
        to: i32,
    ) -> Result<Vec<Notification>> {
        let rows = sqlx::query(
            "SELECT task_id, bucket_number, resource_number, pipeline, resource, state, info_text, \
             additional_info, result_resource, processing_time_ms FROM notifications \
             WHERE task_id = $1 AND bucket_number = $2 AND resource_number BETWEEN $3 AND $4 \
             ORDER BY resource_number",
        )
        .bind(task_id)
        .bind(bucket_number)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(notification_from_row).collect()
    }
}

#[async_trait]
impl ErrorRepository for PgStore {
    async fn increment_error_type(&self, task_id: i64, error_type: Uuid) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO error_types (task_id, error_type, occurrences) VALUES ($1, $2, 1) \
             ON CONFLICT (task_id, error_type) \
             DO UPDATE SET occurrences = error_types.occurrences + 1 \
             RETURNING occurrences",
        )
        .bind(task_id)
        .bind(error_type)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("occurrences")?)
    }

    async fn count_samples(&self, task_id: i64, error_type: Uuid) -> Result<usize> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS samples FROM error_notifications \
             WHERE task_id = $1 AND error_type = $2",
        )
        .bind(task_id)
        .bind(error_type)
        .fetch_one(&self.pool)
        .await?;
        let samples: i64 = row.try_get("samples")?;
        Ok(usize::try_from(samples).unwrap_or_default())
    }

    async fn insert_sample(&self, sample: &ErrorNotification) -> Result<()> {
        sqlx::query(
            "INSERT INTO error_notifications \
             (task_id, error_type, resource, error_message, additional_info) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (task_id, error_type, resource) DO NOTHING",
        )
        .bind(sample.task_id)
        .bind(sample.error_type)
        .bind(&sample.resource)
        .bind(&sample.error_message)
        .bind(&sample.additional_info)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_error_types(&self, task_id: i64) -> Result<Vec<ErrorType>> {
        let rows = sqlx::query(
            "SELECT task_id, error_type, occurrences FROM error_types \
             WHERE task_id = $1 ORDER BY error_type",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(ErrorType {
                    task_id: row.try_get("task_id")?,
                    error_type: row.try_get("error_type")?,
                    occurrences: row.try_get("occurrences")?,
                })
            })
            .collect()
    }

    async fn find_samples(
        &self,
        task_id: i64,
        error_type: Uuid,
        limit: usize,
    ) -> Result<Vec<ErrorNotification>> {
        let rows = sqlx::query(
            "SELECT task_id, error_type, resource, error_message, additional_info \
             FROM error_notifications WHERE task_id = $1 AND error_type = $2 LIMIT $3",
        )
        .bind(task_id)
        .bind(error_type)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(ErrorNotification {
                    task_id: row.try_get("task_id")?,
                    error_type: row.try_get("error_type")?,
                    error_message: row.try_get("error_message")?,
                    resource: row.try_get("resource")?,
                    additional_info: row.try_get("additional_info")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl HarvestedRecordRepository for PgStore {
    async fn find(&self, dataset_id: &str, record_id: &str) -> Result<Option<HarvestedRecord>> {
        let row = sqlx::query(
            "SELECT dataset_id, record_id, latest_harvest_date, latest_harvest_hash, \
             preview_harvest_date, preview_harvest_hash, published_harvest_date, \
             published_harvest_hash FROM harvested_records \
             WHERE dataset_id = $1 AND record_id = $2",
        )
        .bind(dataset_id)
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(harvested_record_from_row).transpose()
    }

    async fn insert(&self, record: &HarvestedRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO harvested_records \
             (dataset_id, record_id, latest_harvest_date, latest_harvest_hash, \
              preview_harvest_date, preview_harvest_hash, published_harvest_date, \
              published_harvest_hash) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (dataset_id, record_id) DO UPDATE SET \
             latest_harvest_date = EXCLUDED.latest_harvest_date, \
             latest_harvest_hash = EXCLUDED.latest_harvest_hash, \
             preview_harvest_date = EXCLUDED.preview_harvest_date, \
             preview_harvest_hash = EXCLUDED.preview_harvest_hash, \
             published_harvest_date = EXCLUDED.published_harvest_date, \
             published_harvest_hash = EXCLUDED.published_harvest_hash",
        )
        .bind(&record.dataset_id)
        .bind(&record.record_id)
        .bind(record.latest_harvest_date)
        .bind(&record.latest_harvest_hash)
        .bind(record.preview_harvest_date)
        .bind(&record.preview_harvest_hash)
        .bind(record.published_harvest_date)
        .bind(&record.published_harvest_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_latest_harvest(
        &self,
        dataset_id: &str,
        record_id: &str,
        harvest_date: DateTime<Utc>,
        harvest_hash: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE harvested_records SET latest_harvest_date = $3, latest_harvest_hash = $4 \
             WHERE dataset_id = $1 AND record_id = $2",
        )
        .bind(dataset_id)
        .bind(record_id)
        .bind(harvest_date)
        .bind(harvest_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_indexing_environment(
        &self,
        dataset_id: &str,
        record_id: &str,
        environment: IndexingEnvironment,
        harvest_date: DateTime<Utc>,
        harvest_hash: Option<&str>,
    ) -> Result<()> {
        let (date_column, hash_column) = environment_columns(environment);
        let sql = format!(
            "UPDATE harvested_records SET {date_column} = $3, {hash_column} = $4 \
             WHERE dataset_id = $1 AND record_id = $2"
        );
        let result = sqlx::query(&sql)
            .bind(dataset_id)
            .bind(record_id)
            .bind(harvest_date)
            .bind(harvest_hash)
            .execute(&self.pool)
            .await?;
        require_harvested_row(result.rows_affected(), dataset_id, record_id)
    }

    async fn clean_environment(
        &self,
        dataset_id: &str,
        record_id: &str,
        environment: IndexingEnvironment,
    ) -> Result<()> {
        let (date_column, hash_column) = environment_columns(environment);
        let sql = format!(
            "UPDATE harvested_records SET {date_column} = NULL, {hash_column} = NULL \
             WHERE dataset_id = $1 AND record_id = $2"
        );
        let result = sqlx::query(&sql)
            .bind(dataset_id)
            .bind(record_id)
            .execute(&self.pool)
            .await?;
        require_harvested_row(result.rows_affected(), dataset_id, record_id)
    }

    async fn find_by_dataset(&self, dataset_id: &str) -> Result<Vec<HarvestedRecord>> {
        let rows = sqlx::query(
            "SELECT dataset_id, record_id, latest_harvest_date, latest_harvest_hash, \
             preview_harvest_date, preview_harvest_hash, published_harvest_date, \
             published_harvest_hash FROM harvested_records \
             WHERE dataset_id = $1 ORDER BY record_id",
        )
        .bind(dataset_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(harvested_record_from_row).collect()
    }

    async fn delete(&self, dataset_id: &str, record_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM harvested_records WHERE dataset_id = $1 AND record_id = $2")
            .bind(dataset_id)
            .bind(record_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TaskDiagnosticRepository for PgStore {
    async fn find(&self, task_id: i64) -> Result<Option<TaskDiagnosticInfo>> {
        let row = sqlx::query(
            "SELECT task_id, started_records_count, last_record_finished_on_pipeline_time, \
             finish_on_pipeline_time, post_processing_start_time \
             FROM task_diagnostic_info WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            Ok(TaskDiagnosticInfo {
                task_id: row.try_get("task_id")?,
                started_records_count: row.try_get("started_records_count")?,
                last_record_finished_on_pipeline_time: row
                    .try_get("last_record_finished_on_pipeline_time")?,
                finish_on_pipeline_time: row.try_get("finish_on_pipeline_time")?,
                post_processing_start_time: row.try_get("post_processing_start_time")?,
            })
        })
        .transpose()
    }

    async fn increment_started_records(&self, task_id: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO task_diagnostic_info (task_id, started_records_count) VALUES ($1, 1) \
             ON CONFLICT (task_id) DO UPDATE SET \
             started_records_count = task_diagnostic_info.started_records_count + 1",
        )
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_last_record_finished_on_pipeline_time(
        &self,
        task_id: i64,
        time: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO task_diagnostic_info (task_id, last_record_finished_on_pipeline_time) \
             VALUES ($1, $2) ON CONFLICT (task_id) DO UPDATE SET \
             last_record_finished_on_pipeline_time = EXCLUDED.last_record_finished_on_pipeline_time",
        )
        .bind(task_id)
        .bind(time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_finish_on_pipeline_time(&self, task_id: i64, time: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO task_diagnostic_info (task_id, finish_on_pipeline_time) \
             VALUES ($1, $2) ON CONFLICT (task_id) DO UPDATE SET \
             finish_on_pipeline_time = EXCLUDED.finish_on_pipeline_time",
        )
        .bind(task_id)
        .bind(time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_post_processing_start_time(
        &self,
        task_id: i64,
        time: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO task_diagnostic_info (task_id, post_processing_start_time) \
             VALUES ($1, $2) ON CONFLICT (task_id) DO UPDATE SET \
             post_processing_start_time = EXCLUDED.post_processing_start_time",
        )
        .bind(task_id)
        .bind(time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
