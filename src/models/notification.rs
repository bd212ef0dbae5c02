//! # Notification Model
//!
//! Append-only outcome of one record, keyed by
//! `(task_id, bucket_number, resource_number)` so that a task with millions of
//! records is spread over bounded range partitions.

use serde::{Deserialize, Serialize};

use crate::constants::notification_bucket_number;
use crate::state_machine::RecordState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub task_id: i64,
    pub bucket_number: i32,
    pub resource_number: i32,
    pub pipeline: String,
    pub resource: String,
    pub state: RecordState,
    pub info_text: String,
    pub additional_info: String,
    pub result_resource: String,
    pub processing_time_ms: i64,
}

impl Notification {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_id: i64,
        resource_number: i32,
        pipeline: impl Into<String>,
        resource: impl Into<String>,
        state: RecordState,
        info_text: impl Into<String>,
        additional_info: impl Into<String>,
        result_resource: impl Into<String>,
        processing_time_ms: i64,
    ) -> Self {
        Self {
            task_id,
            bucket_number: notification_bucket_number(resource_number),
            resource_number,
            pipeline: pipeline.into(),
            resource: resource.into(),
            state,
            info_text: info_text.into(),
            additional_info: additional_info.into(),
            result_resource: result_resource.into(),
            processing_time_ms,
        }
    }
}
