//! # Error Type Models
//!
//! `error_types` holds one occurrence counter per (task, error type);
//! `error_notifications` holds a capped sample of the records that failed
//! with that error type.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorType {
    pub task_id: i64,
    pub error_type: Uuid,
    pub occurrences: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotification {
    pub task_id: i64,
    pub error_type: Uuid,
    pub error_message: String,
    pub resource: String,
    pub additional_info: String,
}
