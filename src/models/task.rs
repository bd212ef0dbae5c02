//! # Task Model
//!
//! One user-submitted bulk processing job over a set of records.
//!
//! ## Overview
//!
//! A task is created at submission time in QUEUED, mutated by the completion
//! tracker (counters, terminal transition) and the post-processing scheduler,
//! and is immutable once PROCESSED or DROPPED.
//!
//! ## Database Schema
//!
//! Maps to the `tasks` table (see `migrations/`):
//! - `task_id`: Primary key (BIGINT)
//! - `pipeline`: pipeline name (TEXT)
//! - `state` / `state_description`: current state and human readable reason
//! - `expected_records_number`: `-1` when unknown
//! - one column per [`TaskCounters`] field
//!
//! The `tasks_by_state` secondary index ([`TaskByState`]) lets active and
//! ready tasks be enumerated without scanning every task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::UNKNOWN_EXPECTED_RECORDS_NUMBER;
use crate::error::{HarvesterError, Result};
use crate::state_machine::TaskState;

/// Running per-task totals.
///
/// `processed`, `ignored` and `deleted` partition the handled records, so
/// their sum is the number of distinct records that reached a terminal
/// outcome. The two error counters are sub-counts of `processed` and
/// `deleted` respectively.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounters {
    pub processed: i32,
    pub ignored: i32,
    pub deleted: i32,
    pub processed_errors: i32,
    pub deleted_errors: i32,
}

impl TaskCounters {
    /// Number of distinct records handled so far
    pub fn total(&self) -> i32 {
        self.processed + self.ignored + self.deleted
    }

    pub fn errors(&self) -> i32 {
        self.processed_errors + self.deleted_errors
    }

    /// Count one finished record
    pub fn increment(&mut self, is_error: bool, marked_as_deleted: bool, ignored: bool) {
        if marked_as_deleted {
            self.deleted += 1;
            if is_error {
                self.deleted_errors += 1;
            }
        } else if ignored {
            self.ignored += 1;
        } else {
            self.processed += 1;
            if is_error {
                self.processed_errors += 1;
            }
        }
    }

    pub fn as_text(&self) -> String {
        format!(
            "processed={}, ignored={}, deleted={}, processed_errors={}, deleted_errors={}",
            self.processed, self.ignored, self.deleted, self.processed_errors, self.deleted_errors
        )
    }
}

/// Persisted task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: i64,
    pub pipeline: String,
    pub state: TaskState,
    pub state_description: String,
    pub expected_records_number: i32,
    pub counters: TaskCounters,
    pub expected_post_processed_records_number: i32,
    pub post_processed_records_count: i32,
    pub sent_timestamp: DateTime<Utc>,
    pub start_timestamp: Option<DateTime<Utc>>,
    pub finish_timestamp: Option<DateTime<Utc>>,
    pub restarted: bool,
    pub owner_id: String,
    /// Source dataset of harvesting tasks
    pub dataset_id: Option<String>,
    /// Date of the harvest run a harvesting task performs
    pub harvest_date: Option<DateTime<Utc>>,
}

impl TaskInfo {
    pub fn has_known_size(&self) -> bool {
        self.expected_records_number != UNKNOWN_EXPECTED_RECORDS_NUMBER
    }

    /// Completion percentage, when the expected size is known
    pub fn progress_percentage(&self) -> Option<f64> {
        if !self.has_known_size() {
            return None;
        }
        if self.expected_records_number == 0 {
            return Some(100.0);
        }
        Some(f64::from(self.counters.total()) * 100.0 / f64::from(self.expected_records_number))
    }
}

/// Task as submitted, before it is persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub task_id: i64,
    pub pipeline: String,
    pub expected_records_number: i32,
    pub sent_timestamp: DateTime<Utc>,
    pub restarted: bool,
    pub dataset_id: Option<String>,
    pub harvest_date: Option<DateTime<Utc>>,
    /// Harvesting tasks need a dataset and harvest date for incremental
    /// categorization and post-processing
    pub harvesting: bool,
}

impl NewTask {
    /// Reject malformed parameters before anything is queued
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.trim().is_empty() {
            return Err(HarvesterError::Validation(format!(
                "task {} has no pipeline name",
                self.task_id
            )));
        }
        if self.expected_records_number < UNKNOWN_EXPECTED_RECORDS_NUMBER {
            return Err(HarvesterError::Validation(format!(
                "task {} has invalid expected records number {}",
                self.task_id, self.expected_records_number
            )));
        }
        if self.harvesting {
            if self.dataset_id.as_deref().map_or(true, |d| d.trim().is_empty()) {
                return Err(HarvesterError::Validation(format!(
                    "harvesting task {} requires a dataset id",
                    self.task_id
                )));
            }
            if self.harvest_date.is_none() {
                return Err(HarvesterError::Validation(format!(
                    "harvesting task {} requires a harvest date",
                    self.task_id
                )));
            }
        }
        Ok(())
    }

    pub fn into_task_info(self, owner_id: &str) -> TaskInfo {
        TaskInfo {
            task_id: self.task_id,
            pipeline: self.pipeline,
            state: TaskState::Queued,
            state_description: "Task submitted".to_string(),
            expected_records_number: self.expected_records_number,
            counters: TaskCounters::default(),
            expected_post_processed_records_number: UNKNOWN_EXPECTED_RECORDS_NUMBER,
            post_processed_records_count: 0,
            sent_timestamp: self.sent_timestamp,
            start_timestamp: None,
            finish_timestamp: None,
            restarted: self.restarted,
            owner_id: owner_id.to_string(),
            dataset_id: self.dataset_id,
            harvest_date: self.harvest_date,
        }
    }
}

/// Row of the `tasks_by_state` secondary index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskByState {
    pub state: TaskState,
    pub pipeline: String,
    pub task_id: i64,
    pub owner_id: String,
    pub topic_name: String,
    pub start_time: Option<DateTime<Utc>>,
}
