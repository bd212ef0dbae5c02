//! # Data Layer Models
//!
//! One module per persisted record family. The models are plain data; the
//! repositories in [`crate::database`] own the storage mapping.
//!
//! - [`task`] - tasks, running counters and the tasks-by-state index
//! - [`processed_record`] - per-(task, record) idempotency ledger
//! - [`notification`] - append-only per-record outcomes
//! - [`error_type`] - error occurrence counters and capped samples
//! - [`harvested_record`] - last-known state of harvested records
//! - [`task_diagnostic_info`] - progress signals for ghost detection

pub mod error_type;
pub mod harvested_record;
pub mod notification;
pub mod processed_record;
pub mod task;
pub mod task_diagnostic_info;

pub use error_type::{ErrorNotification, ErrorType};
pub use harvested_record::{HarvestedRecord, IndexingEnvironment};
pub use notification::Notification;
pub use processed_record::ProcessedRecord;
pub use task::{NewTask, TaskByState, TaskCounters, TaskInfo};
pub use task_diagnostic_info::TaskDiagnosticInfo;
