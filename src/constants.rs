//! # System Constants
//!
//! Fixed values that define the operational boundaries of the harvesting
//! coordination core. Tunable values live in [`crate::config`]; the ones
//! here are part of the persisted layout or of the record-level contract
//! with the pipeline and must not change between deployments.

/// Expected record count of a task whose size is not known up front.
pub const UNKNOWN_EXPECTED_RECORDS_NUMBER: i32 = -1;

/// Number of notifications stored in one range partition.
pub const NOTIFICATION_BUCKET_SIZE: i32 = 10_000;

/// Default cap on sampled error detail rows per (task, error type).
pub const MAXIMUM_ERRORS_THRESHOLD_FOR_ONE_ERROR_TYPE: usize = 100;

/// Slack added to a record date-stamp before comparing it with the date the
/// record was last indexed in an environment.
pub const DEFAULT_DATE_STAMP_BUFFER_HOURS: i64 = 48;

/// Suffix key appended to a notification's additional info.
pub const PROCESSING_TIME_LABEL: &str = "Processing time:";

/// Task state descriptions persisted next to state changes
pub mod messages {
    pub const COMPLETELY_PROCESSED: &str = "Completely processed";
    pub const READY_FOR_POST_PROCESSING: &str =
        "Ready for post processing after pipeline stage is finished";
    pub const IN_POST_PROCESSING: &str = "Post-processing in progress";
    pub const UNABLE_TO_END_TASK: &str = "Unable to end the task";
    pub const PROCESSING_STARTED: &str = "Records are being submitted to the pipeline";
    pub const NO_RECORDS_TO_PROCESS: &str = "Task completed without records to process";
}

/// Tracing targets used for operational log records
pub mod log_targets {
    pub const TASK_OPERATION: &str = "harvester::task";
    pub const RECORD_OPERATION: &str = "harvester::record";
}

/// Computes the notification range partition for a resource number.
pub fn notification_bucket_number(resource_number: i32) -> i32 {
    resource_number / NOTIFICATION_BUCKET_SIZE
}
