//! # Orchestration
//!
//! Task-level coordination on top of the [`services`](crate::services) layer.
//!
//! ## Core Components
//!
//! - **NotificationClassifier**: tags a record completion event as ordinary or
//!   last-record, success or error, standard or post-processing task
//! - **TaskCompletionTracker**: counts every record at most once and performs
//!   the terminal transition on the last record
//! - **RetryPolicy**: bounded backoff around single store writes
//! - **GhostTaskDetector**: periodic out-of-band timeout for abandoned tasks
//! - **PostProcessingScheduler**: runs the post-processing phase of READY tasks
//! - **HarvestingPostProcessor**: reports records that vanished from a harvested source
//! - **IndexingPostProcessor**: records which harvest each environment now holds
//! - **TaskSubmissionCoordinator**: validates, registers and feeds new tasks

pub mod ghost_task_detector;
pub mod harvesting_post_processor;
pub mod indexing_post_processor;
pub mod notification_classifier;
pub mod post_processing_scheduler;
pub mod retry_policy;
pub mod task_completion_tracker;
pub mod task_submission;

pub use ghost_task_detector::{is_ghost, GhostTask, GhostTaskDetector, GhostThresholds};
pub use harvesting_post_processor::{DeletedRecordSink, HarvestingPostProcessor};
pub use indexing_post_processor::IndexingPostProcessor;
pub use notification_classifier::{
    classify, NotificationClass, RecordCompletionEvent, RecordPosition, TaskKind,
};
pub use post_processing_scheduler::{PostProcessingOutcome, PostProcessingScheduler, PostProcessor};
pub use retry_policy::RetryPolicy;
pub use task_completion_tracker::{TaskCompletionTracker, TrackingOutcome};
pub use task_submission::{SubmissionReport, TaskSubmissionCoordinator};
