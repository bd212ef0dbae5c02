//! # Services
//!
//! Building blocks used by the orchestration layer and exposed to the
//! submission layer and operational tooling. Each service owns narrow
//! repository handles taken from an explicitly passed
//! [`Repositories`](crate::database::Repositories) bundle.

pub mod error_aggregator;
pub mod harvest_categorizer;
pub mod record_dedup_submitter;
pub mod task_report_service;
pub mod task_status_checker;
pub mod task_status_updater;
pub mod topic_load_balancer;

pub use error_aggregator::{error_type_id, ErrorAggregator, RecordedError};
pub use harvest_categorizer::{
    CategorizationParameters, CategorizationResult, EligibilityRule, HarvestCategorizer,
};
pub use record_dedup_submitter::{
    RecordDedupSubmitter, RecordQueue, SubmissionSummary, SubmittedRecord, TaskRunContext,
};
pub use task_report_service::{
    ErrorDetails, ErrorReport, ErrorSample, ErrorSummary, TaskProgress, TaskReportService,
};
pub use task_status_checker::TaskStatusChecker;
pub use task_status_updater::TaskStatusUpdater;
pub use topic_load_balancer::{choose_topic, TopicLoadBalancer};
