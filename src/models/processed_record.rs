//! # Processed Record Model
//!
//! Per-(task, record) idempotency ledger. Its existence for a pair is the
//! at-most-once submission guarantee; its SUCCESS/ERROR state is the
//! exactly-once counting guarantee.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state_machine::RecordState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub task_id: i64,
    pub record_id: String,
    pub attempt_number: i32,
    pub state: RecordState,
    /// When the record was (re)submitted to the pipeline
    pub start_time: DateTime<Utc>,
    pub info_text: String,
    pub additional_info: String,
}

impl ProcessedRecord {
    /// Fresh ledger entry for a record entering the pipeline
    pub fn queued(
        task_id: i64,
        record_id: impl Into<String>,
        attempt_number: i32,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            record_id: record_id.into(),
            attempt_number,
            state: RecordState::Queued,
            start_time,
            info_text: String::new(),
            additional_info: String::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }
}
