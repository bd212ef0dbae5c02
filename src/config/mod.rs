//! # Harvester Configuration System
//!
//! Typed configuration for every component of the coordination core. Values
//! come from `config/harvester.yaml`, an optional per-environment overlay and
//! `HARVESTER__SECTION__KEY` environment variables (see [`ConfigManager`]).
//! Every section carries serde defaults so a partial file is always valid.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use harvester_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let max_samples = manager.config().error_reporting.max_error_samples_per_type;
//! let topics = manager.config().topics_for("oai_harvest");
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::constants::{DEFAULT_DATE_STAMP_BUFFER_HOURS, MAXIMUM_ERRORS_THRESHOLD_FOR_ONE_ERROR_TYPE};
use crate::models::IndexingEnvironment;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `config/harvester.yaml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HarvesterConfig {
    /// Identity of this process
    pub application: ApplicationConfig,

    /// Database connection settings for the Postgres store
    pub database: DatabaseConfig,

    /// Error sampling limits
    pub error_reporting: ErrorReportingConfig,

    /// Incremental harvest eligibility settings
    pub categorization: CategorizationConfig,

    /// Interchangeable work queues per pipeline
    pub topics: HashMap<String, Vec<String>>,

    /// Abandoned task detection
    pub ghost_detection: GhostDetectionConfig,

    /// Post-processing phase scheduling
    pub post_processing: PostProcessingConfig,

    /// Retry policy for individual store writes
    pub retry: RetryConfig,

    /// Kill flag polling
    pub task_status_check: TaskStatusCheckConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Owning-process identifier stored with every task this process submits
    pub owner_id: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            owner_id: format!("harvester-{}", std::process::id()),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            acquire_timeout_seconds: 30,
        }
    }
}

impl DatabaseConfig {
    /// Explicit url wins, then `DATABASE_URL`
    pub fn database_url(&self) -> Option<String> {
        self.url
            .clone()
            .or_else(|| std::env::var("DATABASE_URL").ok())
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ErrorReportingConfig {
    /// Sample rows kept per (task, error type); occurrences are always counted
    pub max_error_samples_per_type: usize,
    /// Samples returned by a report when the caller does not ask for a limit
    pub default_sample_limit: usize,
}

impl Default for ErrorReportingConfig {
    fn default() -> Self {
        Self {
            max_error_samples_per_type: MAXIMUM_ERRORS_THRESHOLD_FOR_ONE_ERROR_TYPE,
            default_sample_limit: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CategorizationConfig {
    pub date_stamp_buffer_hours: i64,
}

impl Default for CategorizationConfig {
    fn default() -> Self {
        Self {
            date_stamp_buffer_hours: DEFAULT_DATE_STAMP_BUFFER_HOURS,
        }
    }
}

impl CategorizationConfig {
    pub fn date_stamp_buffer(&self) -> chrono::Duration {
        chrono::Duration::hours(self.date_stamp_buffer_hours)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GhostDetectionConfig {
    pub enabled: bool,
    pub detection_interval_seconds: u64,
    /// Tasks younger than this are never ghosts
    pub short_threshold_hours: i64,
    /// Tasks older than this are always ghosts
    pub long_threshold_days: i64,
    /// Progress signals older than this do not count as recent
    pub progress_staleness_minutes: i64,
    /// Mark detected ghosts DROPPED instead of only reporting them
    pub drop_ghost_tasks: bool,
}

impl Default for GhostDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            detection_interval_seconds: 3600,
            short_threshold_hours: 24,
            long_threshold_days: 70,
            progress_staleness_minutes: 10,
            drop_ghost_tasks: false,
        }
    }
}

impl GhostDetectionConfig {
    pub fn short_threshold(&self) -> chrono::Duration {
        chrono::Duration::hours(self.short_threshold_hours)
    }

    pub fn long_threshold(&self) -> chrono::Duration {
        chrono::Duration::days(self.long_threshold_days)
    }

    pub fn progress_staleness(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.progress_staleness_minutes)
    }

    pub fn detection_interval(&self) -> Duration {
        Duration::from_secs(self.detection_interval_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PostProcessingConfig {
    pub enabled: bool,
    pub check_interval_seconds: u64,
    /// Upper bound on tasks post-processed at the same time by this process
    pub max_concurrent_tasks: usize,
    /// Harvesting pipelines; their tasks end in READY_FOR_POST_PROCESSING
    pub pipelines: Vec<String>,
    /// Indexing pipelines and the environment each one writes to; their
    /// tasks end in READY_FOR_POST_PROCESSING as well
    pub indexing_pipelines: HashMap<String, IndexingEnvironment>,
}

impl Default for PostProcessingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_seconds: 60,
            max_concurrent_tasks: 2,
            pipelines: vec!["oai_harvest".to_string(), "http_harvest".to_string()],
            indexing_pipelines: HashMap::from([
                ("indexing_preview".to_string(), IndexingEnvironment::Preview),
                ("indexing_publish".to_string(), IndexingEnvironment::Published),
            ]),
        }
    }
}

impl PostProcessingConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }

    pub fn is_post_processing_pipeline(&self, pipeline: &str) -> bool {
        self.pipelines.iter().any(|p| p == pipeline) || self.indexing_pipelines.contains_key(pipeline)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter_enabled: bool,
    /// Maximum jitter percentage (0.0 to 1.0)
    pub max_jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
            multiplier: 2.0,
            jitter_enabled: true,
            max_jitter: 0.1,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TaskStatusCheckConfig {
    pub cache_ttl_seconds: u64,
    pub poll_interval_seconds: u64,
}

impl Default for TaskStatusCheckConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 5,
            poll_interval_seconds: 5,
        }
    }
}

impl TaskStatusCheckConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}

impl HarvesterConfig {
    /// Topics configured for a pipeline; empty when the pipeline is unknown
    pub fn topics_for(&self, pipeline: &str) -> &[String] {
        self.topics.get(pipeline).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Validate cross-field invariants that serde cannot express
    pub fn validate(&self) -> ConfigResult<()> {
        if self.error_reporting.max_error_samples_per_type == 0 {
            return Err(ConfigurationError::invalid_value(
                "error_reporting.max_error_samples_per_type",
                "0",
                "at least one sample per error type must be kept",
            ));
        }

        if let Some((pipeline, _)) = self.topics.iter().find(|(_, topics)| topics.is_empty()) {
            return Err(ConfigurationError::invalid_value(
                format!("topics.{pipeline}"),
                "[]",
                "a configured pipeline needs at least one topic",
            ));
        }

        if self.ghost_detection.short_threshold() >= self.ghost_detection.long_threshold() {
            return Err(ConfigurationError::invalid_value(
                "ghost_detection.short_threshold_hours",
                self.ghost_detection.short_threshold_hours.to_string(),
                "short threshold must be below the long threshold",
            ));
        }

        if self.post_processing.max_concurrent_tasks == 0 {
            return Err(ConfigurationError::invalid_value(
                "post_processing.max_concurrent_tasks",
                "0",
                "must allow at least one task",
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "retry.max_attempts",
                "0",
                "at least one attempt is required",
            ));
        }

        if !(0.0..=1.0).contains(&self.retry.max_jitter) {
            return Err(ConfigurationError::invalid_value(
                "retry.max_jitter",
                self.retry.max_jitter.to_string(),
                "must be between 0.0 and 1.0",
            ));
        }

        Ok(())
    }
}
