//! # Error Aggregator
//!
//! Groups record failures of a task into error types. The error type id is a
//! name-based UUID of the message, so equal messages land in the same bucket
//! on every process without coordination.
//!
//! Occurrences are always counted. Sample rows are only stored while the
//! bucket holds fewer than the configured maximum, so one pathological error
//! cannot flood storage for a task with millions of failing records. The
//! count-then-insert check is not atomic; concurrent writers may overshoot the
//! cap by a few rows.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::config::ErrorReportingConfig;
use crate::database::{ErrorRepository, Repositories};
use crate::error::Result;
use crate::models::{ErrorNotification, ErrorType};

/// Stable error type id for an error message
pub fn error_type_id(message: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, message.as_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedError {
    pub error_type: Uuid,
    pub occurrences: i64,
    pub sample_stored: bool,
}

#[derive(Clone)]
pub struct ErrorAggregator {
    errors: Arc<dyn ErrorRepository>,
    max_samples_per_type: usize,
}

impl std::fmt::Debug for ErrorAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorAggregator")
            .field("max_samples_per_type", &self.max_samples_per_type)
            .finish()
    }
}

impl ErrorAggregator {
    pub fn new(repositories: &Repositories, config: &ErrorReportingConfig) -> Self {
        Self {
            errors: repositories.errors.clone(),
            max_samples_per_type: config.max_error_samples_per_type,
        }
    }

    pub async fn record_error(
        &self,
        task_id: i64,
        message: &str,
        resource: &str,
        additional_info: &str,
    ) -> Result<RecordedError> {
        let error_type = error_type_id(message);
        let occurrences = self.errors.increment_error_type(task_id, error_type).await?;

        let stored_samples = self.errors.count_samples(task_id, error_type).await?;
        let sample_stored = stored_samples < self.max_samples_per_type;
        if sample_stored {
            self.errors
                .insert_sample(&ErrorNotification {
                    task_id,
                    error_type,
                    error_message: message.to_string(),
                    resource: resource.to_string(),
                    additional_info: additional_info.to_string(),
                })
                .await?;
        } else {
            debug!(
                task_id,
                error_type = %error_type,
                occurrences,
                "Error sample cap reached, counting only"
            );
        }

        Ok(RecordedError {
            error_type,
            occurrences,
            sample_stored,
        })
    }

    pub async fn list_error_types(&self, task_id: i64) -> Result<Vec<ErrorType>> {
        self.errors.list_error_types(task_id).await
    }

    pub async fn sample_details(
        &self,
        task_id: i64,
        error_type: Uuid,
        limit: usize,
    ) -> Result<Vec<ErrorNotification>> {
        self.errors.find_samples(task_id, error_type, limit).await
    }

    /// Message shared by every sample of an error type
    pub async fn first_message_for(&self, task_id: i64, error_type: Uuid) -> Result<Option<String>> {
        Ok(self
            .errors
            .find_samples(task_id, error_type, 1)
            .await?
            .into_iter()
            .next()
            .map(|sample| sample.error_message))
    }
}
