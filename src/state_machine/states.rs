use serde::{Deserialize, Serialize};
use std::fmt;

/// Task lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Task accepted, records not yet flowing
    Queued,
    /// Records are being submitted to and processed by the pipeline
    Processing,
    /// Every record finished in the pipeline, waiting for the post-processing phase
    ReadyForPostProcessing,
    /// Post-processing phase running
    InPostProcessing,
    /// Task completed
    Processed,
    /// Task cancelled or failed
    Dropped,
}

impl TaskState {
    pub const ALL: [TaskState; 6] = [
        Self::Queued,
        Self::Processing,
        Self::ReadyForPostProcessing,
        Self::InPostProcessing,
        Self::Processed,
        Self::Dropped,
    ];

    /// States in which a worker process or queue still owns the task
    pub const ACTIVE: [TaskState; 2] = [Self::Queued, Self::Processing];

    /// Every non-terminal state
    pub const UNFINISHED: [TaskState; 4] = [
        Self::Queued,
        Self::Processing,
        Self::ReadyForPostProcessing,
        Self::InPostProcessing,
    ];

    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::Dropped)
    }

    /// Check if this is an active state (task is being processed or waits in a queue)
    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    /// Forward-only transition table. DROPPED is reachable from every
    /// non-terminal state; nothing leaves a terminal state.
    pub fn can_transition_to(&self, target: TaskState) -> bool {
        use TaskState::*;
        match (self, target) {
            (from, _) if from.is_terminal() => false,
            (_, Dropped) => true,
            (Queued, Processing | ReadyForPostProcessing | Processed) => true,
            (Processing, ReadyForPostProcessing | Processed) => true,
            (ReadyForPostProcessing, InPostProcessing) => true,
            (InPostProcessing, Processed) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Processing => "PROCESSING",
            Self::ReadyForPostProcessing => "READY_FOR_POST_PROCESSING",
            Self::InPostProcessing => "IN_POST_PROCESSING",
            Self::Processed => "PROCESSED",
            Self::Dropped => "DROPPED",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|state| state.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Invalid task state: {s}"))
    }
}

impl Default for TaskState {
    fn default() -> Self {
        Self::Queued
    }
}

/// Per-record ledger states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordState {
    Queued,
    Success,
    Error,
}

impl RecordState {
    /// A finished record is never rewritten within the same task run
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "QUEUED" => Ok(Self::Queued),
            "SUCCESS" => Ok(Self::Success),
            "ERROR" => Ok(Self::Error),
            _ => Err(format!("Invalid record state: {s}")),
        }
    }
}
