//! # Notification Classifier
//!
//! Pure mapping of a record completion event onto one handling variant:
//! `{ordinary, last record} x {success, error} x {standard, post-processing}`.
//! The tracker dispatches on the returned [`NotificationClass`]; nothing here
//! touches the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{PROCESSING_TIME_LABEL, UNKNOWN_EXPECTED_RECORDS_NUMBER};
use crate::models::TaskCounters;
use crate::state_machine::{RecordState, TaskEvent};

/// Per-record completion event emitted by a pipeline worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCompletionEvent {
    pub task_id: i64,
    pub record_id: String,
    pub outcome: RecordState,
    pub info_text: String,
    pub additional_info: String,
    pub result_resource: String,
    /// Normalized error message; its presence turns the event into an error
    pub unified_error_message: Option<String>,
    /// Raw exception text reported next to a unified error message
    pub exception_error_message: Option<String>,
    pub processing_start_time_ms: i64,
    pub marked_as_deleted: bool,
    pub ignored: bool,
    /// The owning task belongs to a post-processing pipeline
    pub post_processing_task: bool,
}

impl RecordCompletionEvent {
    pub fn success(task_id: i64, record_id: impl Into<String>) -> Self {
        Self {
            task_id,
            record_id: record_id.into(),
            outcome: RecordState::Success,
            info_text: String::new(),
            additional_info: String::new(),
            result_resource: String::new(),
            unified_error_message: None,
            exception_error_message: None,
            processing_start_time_ms: Utc::now().timestamp_millis(),
            marked_as_deleted: false,
            ignored: false,
            post_processing_task: false,
        }
    }

    pub fn error(task_id: i64, record_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            outcome: RecordState::Error,
            info_text: message.into(),
            ..Self::success(task_id, record_id)
        }
    }

    pub fn is_error(&self) -> bool {
        self.outcome == RecordState::Error || self.unified_error_message.is_some()
    }

    /// Ledger and notification state of the record
    pub fn record_state(&self) -> RecordState {
        if self.is_error() {
            RecordState::Error
        } else {
            RecordState::Success
        }
    }

    /// Message that identifies the error type
    pub fn error_message(&self) -> &str {
        self.unified_error_message
            .as_deref()
            .unwrap_or(&self.info_text)
    }

    /// Detail stored with an error sample
    pub fn error_additional_info(&self) -> &str {
        match (&self.unified_error_message, &self.exception_error_message) {
            (Some(_), Some(exception)) => exception,
            _ => &self.additional_info,
        }
    }

    pub fn processing_time_ms(&self, now: DateTime<Utc>) -> i64 {
        (now.timestamp_millis() - self.processing_start_time_ms).max(0)
    }

    /// Additional info as stored in the notification
    pub fn notification_additional_info(&self, now: DateTime<Utc>) -> String {
        format!(
            "{} {} {}",
            self.additional_info,
            PROCESSING_TIME_LABEL,
            self.processing_time_ms(now)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordPosition {
    Ordinary,
    LastRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Standard,
    PostProcessing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationClass {
    pub is_error: bool,
    pub position: RecordPosition,
    pub kind: TaskKind,
}

impl NotificationClass {
    pub fn is_last_record(&self) -> bool {
        self.position == RecordPosition::LastRecord
    }

    /// Task event fired by this notification, if it completes the task
    pub fn terminal_event(&self) -> Option<TaskEvent> {
        self.is_last_record().then_some(TaskEvent::LastRecordFinished {
            post_processing: self.kind == TaskKind::PostProcessing,
        })
    }
}

/// Classify an event given the task counters after counting it.
///
/// A task of unknown size never reaches its last record through events.
pub fn classify(
    event: &RecordCompletionEvent,
    counters_after: &TaskCounters,
    expected_records_number: i32,
) -> NotificationClass {
    let is_last = expected_records_number != UNKNOWN_EXPECTED_RECORDS_NUMBER
        && counters_after.total() == expected_records_number;

    NotificationClass {
        is_error: event.is_error(),
        position: if is_last {
            RecordPosition::LastRecord
        } else {
            RecordPosition::Ordinary
        },
        kind: if event.post_processing_task {
            TaskKind::PostProcessing
        } else {
            TaskKind::Standard
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(total: i32) -> TaskCounters {
        TaskCounters {
            processed: total,
            ..Default::default()
        }
    }

    #[test]
    fn test_unified_error_message_marks_error() {
        let mut event = RecordCompletionEvent::success(1, "r");
        assert!(!event.is_error());

        event.unified_error_message = Some("Validation failed".to_string());
        event.exception_error_message = Some("line 12: unexpected element".to_string());
        event.additional_info = "ignored".to_string();

        assert!(event.is_error());
        assert_eq!(event.record_state(), RecordState::Error);
        assert_eq!(event.error_message(), "Validation failed");
        assert_eq!(event.error_additional_info(), "line 12: unexpected element");
    }

    #[test]
    fn test_plain_error_uses_info_text() {
        let mut event = RecordCompletionEvent::error(1, "r", "timeout");
        event.additional_info = "stack".to_string();
        assert_eq!(event.error_message(), "timeout");
        assert_eq!(event.error_additional_info(), "stack");
    }

    #[test]
    fn test_last_record_variants() {
        let event = RecordCompletionEvent::success(1, "r");
        let class = classify(&event, &counters(2), 2);
        assert_eq!(class.position, RecordPosition::LastRecord);
        assert_eq!(
            class.terminal_event(),
            Some(TaskEvent::LastRecordFinished {
                post_processing: false
            })
        );

        let mut harvest = RecordCompletionEvent::error(1, "r", "bad");
        harvest.post_processing_task = true;
        let class = classify(&harvest, &counters(2), 2);
        assert!(class.is_error);
        assert_eq!(class.kind, TaskKind::PostProcessing);
        assert_eq!(
            class.terminal_event(),
            Some(TaskEvent::LastRecordFinished {
                post_processing: true
            })
        );

        let class = classify(&event, &counters(1), 2);
        assert_eq!(class.position, RecordPosition::Ordinary);
        assert!(class.terminal_event().is_none());
    }

    #[test]
    fn test_unknown_size_never_completes() {
        let event = RecordCompletionEvent::success(1, "r");
        let class = classify(&event, &counters(-1), UNKNOWN_EXPECTED_RECORDS_NUMBER);
        assert_eq!(class.position, RecordPosition::Ordinary);
    }

    #[test]
    fn test_notification_additional_info_carries_processing_time() {
        let mut event = RecordCompletionEvent::success(1, "r");
        event.additional_info = "ok".to_string();
        let now = Utc::now();
        event.processing_start_time_ms = now.timestamp_millis() - 250;
        assert_eq!(event.notification_additional_info(now), "ok Processing time: 250");
    }
}
