//! Error types for the harvesting coordination core.
//!

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HarvesterError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Task info does not exist: {task_id}")]
    TaskInfoDoesNotExist { task_id: i64 },
    #[error("Task {task_id} dropped")]
    TaskDropped { task_id: i64 },
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Invalid state transition for task {task_id}: {from} -> {to}")]
    InvalidStateTransition {
        task_id: i64,
        from: String,
        to: String,
    },
    #[error("No topics configured for pipeline {pipeline}")]
    NoTopicsConfigured { pipeline: String },
    #[error("Post-processing failed for task {task_id}: {reason}")]
    PostProcessing { task_id: i64, reason: String },
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HarvesterError {
    /// Store unavailability is the only failure worth retrying; everything
    /// else is deterministic and would fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }

    pub fn is_task_dropped(&self) -> bool {
        matches!(self, Self::TaskDropped { .. })
    }
}

impl From<serde_json::Error> for HarvesterError {
    fn from(error: serde_json::Error) -> Self {
        HarvesterError::Serialization(format!("JSON serialization error: {error}"))
    }
}

impl From<sqlx::Error> for HarvesterError {
    fn from(err: sqlx::Error) -> Self {
        HarvesterError::Database(err.to_string())
    }
}

impl From<crate::config::ConfigurationError> for HarvesterError {
    fn from(err: crate::config::ConfigurationError) -> Self {
        HarvesterError::Configuration(err.to_string())
    }
}

pub type Result<T> = anyhow::Result<T, HarvesterError>;
