//! # Task Diagnostic Info Model
//!
//! Opportunistically written progress signals, read by ghost detection and
//! operational tooling only. Nothing in the completion logic depends on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDiagnosticInfo {
    pub task_id: i64,
    pub started_records_count: i32,
    pub last_record_finished_on_pipeline_time: Option<DateTime<Utc>>,
    pub finish_on_pipeline_time: Option<DateTime<Utc>>,
    pub post_processing_start_time: Option<DateTime<Utc>>,
}

impl TaskDiagnosticInfo {
    pub fn new(task_id: i64) -> Self {
        Self {
            task_id,
            ..Default::default()
        }
    }

    /// Most recent evidence of pipeline activity
    pub fn last_progress(&self) -> Option<DateTime<Utc>> {
        self.last_record_finished_on_pipeline_time
            .max(self.finish_on_pipeline_time)
    }
}
