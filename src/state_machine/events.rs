use serde::{Deserialize, Serialize};

/// Events that can trigger task state transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TaskEvent {
    /// Records start flowing into the pipeline
    Start,
    /// The last expected record finished; post-processing tasks park in
    /// READY_FOR_POST_PROCESSING instead of completing
    LastRecordFinished { post_processing: bool },
    /// The post-processing phase picked the task up
    BeginPostProcessing,
    /// All work done
    Complete,
    /// Cancellation, unrecoverable submission error or failed finalization
    Drop(String),
}

impl TaskEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::LastRecordFinished { .. } => "last_record_finished",
            Self::BeginPostProcessing => "begin_post_processing",
            Self::Complete => "complete",
            Self::Drop(_) => "drop",
        }
    }

    /// Extract the reason if this is a drop event
    pub fn drop_reason(&self) -> Option<&str> {
        match self {
            Self::Drop(reason) => Some(reason),
            _ => None,
        }
    }

    /// Create a drop event with the given reason
    pub fn drop_with_reason(reason: impl Into<String>) -> Self {
        Self::Drop(reason.into())
    }
}
