#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Harvester Core
//!
//! Coordination core for bulk record processing pipelines: tracks the
//! progress of user-submitted tasks, detects when the last record of a task
//! finished, aggregates per-record errors and keeps incremental harvests from
//! reprocessing unchanged records.
//!
//! ## Overview
//!
//! Parallel pipeline workers emit one completion event per record. Events go
//! through the notification classifier into the task completion tracker,
//! which persists counters, notifications and errors and flips the task state
//! once every expected record is accounted for. Independently, the record
//! dedup submitter gates what enters the pipeline, the harvest categorizer
//! decides what a harvest run considers changed and the topic load balancer
//! assigns a queue at submission time. Ghost detection and post-processing
//! run out of band against the same records.
//!
//! All coordination happens through the store. There are no multi-row
//! transactions; the processed-record ledger is the idempotency guard.
//!
//! ## Module Organization
//!
//! - [`config`] - Typed YAML + environment configuration
//! - [`constants`] - Persisted-layout constants and state descriptions
//! - [`database`] - Repository traits, in-memory and Postgres stores
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//! - [`models`] - Data model, one module per record family
//! - [`orchestration`] - Completion tracking, ghost detection, post-processing, submission
//! - [`services`] - Error aggregation, dedup, categorization, load balancing, reports
//! - [`state_machine`] - Task and record states, transition rules
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use harvester_core::config::ConfigManager;
//! use harvester_core::database::Repositories;
//! use harvester_core::orchestration::{RecordCompletionEvent, RetryPolicy, TaskCompletionTracker};
//! use harvester_core::services::ErrorAggregator;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let config = manager.config();
//! let repositories = Repositories::in_memory();
//!
//! let tracker = TaskCompletionTracker::new(
//!     repositories.clone(),
//!     ErrorAggregator::new(&repositories, &config.error_reporting),
//!     RetryPolicy::new(config.retry.clone()),
//! );
//! let outcome = tracker.handle(&RecordCompletionEvent::success(1, "record-1")).await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit, integration and property tests
//! ```

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod services;
pub mod state_machine;

pub use config::{ConfigManager, HarvesterConfig};
pub use database::{InMemoryStore, Repositories};
pub use error::{HarvesterError, Result};
pub use models::{NewTask, TaskCounters, TaskInfo};
pub use orchestration::{
    GhostTaskDetector, PostProcessingScheduler, RecordCompletionEvent, TaskCompletionTracker,
    TaskSubmissionCoordinator, TrackingOutcome,
};
pub use state_machine::{RecordState, TaskState};
