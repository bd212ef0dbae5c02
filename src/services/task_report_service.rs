//! # Task Report Service
//!
//! Read-only queries for operational tooling: task progress, paged error
//! reports with capped samples, the general error summary and notification
//! range scans.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{notification_bucket_number, NOTIFICATION_BUCKET_SIZE};
use crate::database::Repositories;
use crate::error::{HarvesterError, Result};
use crate::models::{Notification, TaskCounters};
use crate::services::ErrorAggregator;
use crate::state_machine::TaskState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub task_id: i64,
    pub pipeline: String,
    pub state: TaskState,
    pub state_description: String,
    pub expected_records_number: i32,
    pub counters: TaskCounters,
    pub progress_percentage: Option<f64>,
    pub expected_post_processed_records_number: i32,
    pub post_processed_records_count: i32,
    pub sent_timestamp: DateTime<Utc>,
    pub start_timestamp: Option<DateTime<Utc>>,
    pub finish_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSample {
    pub resource: String,
    pub additional_info: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub error_type: Uuid,
    pub message: String,
    pub occurrences: i64,
    pub samples: Vec<ErrorSample>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub task_id: i64,
    pub errors: Vec<ErrorDetails>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub error_type: Uuid,
    pub message: String,
    pub occurrences: i64,
}

#[derive(Debug)]
pub struct TaskReportService {
    repositories: Repositories,
    error_aggregator: ErrorAggregator,
    default_sample_limit: usize,
}

impl TaskReportService {
    pub fn new(
        repositories: Repositories,
        error_aggregator: ErrorAggregator,
        default_sample_limit: usize,
    ) -> Self {
        Self {
            repositories,
            error_aggregator,
            default_sample_limit,
        }
    }

    pub async fn task_progress(&self, task_id: i64) -> Result<TaskProgress> {
        let task = self.repositories.tasks.get(task_id).await?;
        Ok(TaskProgress {
            progress_percentage: task.progress_percentage(),
            task_id: task.task_id,
            pipeline: task.pipeline,
            state: task.state,
            state_description: task.state_description,
            expected_records_number: task.expected_records_number,
            counters: task.counters,
            expected_post_processed_records_number: task.expected_post_processed_records_number,
            post_processed_records_count: task.post_processed_records_count,
            sent_timestamp: task.sent_timestamp,
            start_timestamp: task.start_timestamp,
            finish_timestamp: task.finish_timestamp,
        })
    }

    /// Error types of a task with up to `sample_limit` samples each.
    ///
    /// `error_type` narrows the report to one bucket; an unknown bucket is
    /// reported as a validation error.
    pub async fn error_report(
        &self,
        task_id: i64,
        error_type: Option<Uuid>,
        sample_limit: Option<usize>,
    ) -> Result<ErrorReport> {
        self.repositories.tasks.get(task_id).await?;
        let limit = sample_limit.unwrap_or(self.default_sample_limit);

        let mut types = self.error_aggregator.list_error_types(task_id).await?;
        if let Some(wanted) = error_type {
            types.retain(|t| t.error_type == wanted);
            if types.is_empty() {
                return Err(HarvesterError::Validation(format!(
                    "task {task_id} has no error type {wanted}"
                )));
            }
        }

        let mut errors = Vec::with_capacity(types.len());
        for error in types {
            let samples = self
                .error_aggregator
                .sample_details(task_id, error.error_type, limit)
                .await?;
            // all samples of a bucket share the message
            let message = samples
                .first()
                .map(|sample| sample.error_message.clone())
                .unwrap_or_default();
            errors.push(ErrorDetails {
                error_type: error.error_type,
                message,
                occurrences: error.occurrences,
                samples: samples
                    .into_iter()
                    .map(|sample| ErrorSample {
                        resource: sample.resource,
                        additional_info: sample.additional_info,
                    })
                    .collect(),
            });
        }

        Ok(ErrorReport { task_id, errors })
    }

    /// Every error type of a task with its occurrence count
    pub async fn general_error_summary(&self, task_id: i64) -> Result<Vec<ErrorSummary>> {
        self.repositories.tasks.get(task_id).await?;
        let mut summary = Vec::new();
        for error in self.error_aggregator.list_error_types(task_id).await? {
            let message = self
                .error_aggregator
                .first_message_for(task_id, error.error_type)
                .await?
                .unwrap_or_default();
            summary.push(ErrorSummary {
                error_type: error.error_type,
                message,
                occurrences: error.occurrences,
            });
        }
        Ok(summary)
    }

    /// Notifications with `from <= resource_number <= to`, across buckets
    pub async fn notifications(&self, task_id: i64, from: i32, to: i32) -> Result<Vec<Notification>> {
        if from > to {
            return Err(HarvesterError::Validation(format!(
                "invalid notification range {from}..={to}"
            )));
        }

        let mut notifications = Vec::new();
        for bucket in notification_bucket_number(from)..=notification_bucket_number(to) {
            let bucket_start = bucket * NOTIFICATION_BUCKET_SIZE;
            let bucket_end = bucket_start + NOTIFICATION_BUCKET_SIZE - 1;
            notifications.extend(
                self.repositories
                    .notifications
                    .find_in_bucket(task_id, bucket, from.max(bucket_start), to.min(bucket_end))
                    .await?,
            );
        }
        Ok(notifications)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ErrorReportingConfig;
    use crate::models::NewTask;
    use crate::state_machine::RecordState;

    async fn service_with_task() -> (Repositories, TaskReportService) {
        let repositories = Repositories::in_memory();
        let task = NewTask {
            task_id: 1,
            pipeline: "indexing".to_string(),
            expected_records_number: 4,
            sent_timestamp: Utc::now(),
            restarted: false,
            dataset_id: None,
            harvest_date: None,
            harvesting: false,
        }
        .into_task_info("app");
        repositories.tasks.insert(&task).await.unwrap();

        let aggregator = ErrorAggregator::new(&repositories, &ErrorReportingConfig::default());
        let service = TaskReportService::new(repositories.clone(), aggregator, 2);
        (repositories, service)
    }

    #[tokio::test]
    async fn test_error_report_and_summary() {
        let (repositories, service) = service_with_task().await;
        let aggregator = ErrorAggregator::new(&repositories, &ErrorReportingConfig::default());
        for i in 0..3 {
            aggregator
                .record_error(1, "invalid EDM", &format!("r{i}"), "")
                .await
                .unwrap();
        }
        aggregator.record_error(1, "timeout", "r9", "").await.unwrap();

        let report = service.error_report(1, None, None).await.unwrap();
        assert_eq!(report.errors.len(), 2);
        let edm = report
            .errors
            .iter()
            .find(|e| e.message == "invalid EDM")
            .unwrap();
        assert_eq!(edm.occurrences, 3);
        assert_eq!(edm.samples.len(), 2);

        let narrowed = service
            .error_report(1, Some(edm.error_type), Some(10))
            .await
            .unwrap();
        assert_eq!(narrowed.errors.len(), 1);
        assert_eq!(narrowed.errors[0].samples.len(), 3);

        let summary = service.general_error_summary(1).await.unwrap();
        let total: i64 = summary.iter().map(|s| s.occurrences).sum();
        assert_eq!(total, 4);
    }

    #[tokio::test]
    async fn test_reports_for_missing_task() {
        let (_, service) = service_with_task().await;
        assert_eq!(
            service.task_progress(2).await,
            Err(HarvesterError::TaskInfoDoesNotExist { task_id: 2 })
        );
        assert!(service.error_report(2, None, None).await.is_err());
    }

    #[tokio::test]
    async fn test_notification_range_spans_buckets() {
        let (repositories, service) = service_with_task().await;
        for resource_number in [9_998, 9_999, 10_000, 10_001] {
            repositories
                .notifications
                .insert(&Notification::new(
                    1,
                    resource_number,
                    "indexing",
                    format!("r{resource_number}"),
                    RecordState::Success,
                    "",
                    "",
                    "",
                    1,
                ))
                .await
                .unwrap();
        }

        let range = service.notifications(1, 9_999, 10_000).await.unwrap();
        let numbers: Vec<i32> = range.iter().map(|n| n.resource_number).collect();
        assert_eq!(numbers, vec![9_999, 10_000]);
    }
}
