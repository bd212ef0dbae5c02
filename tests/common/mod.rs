//! Shared fixtures for integration tests. Everything runs against the
//! in-memory store.

#![allow(dead_code)]

pub mod strategies;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use harvester_core::config::{HarvesterConfig, RetryConfig};
use harvester_core::database::Repositories;
use harvester_core::error::Result;
use harvester_core::models::NewTask;
use harvester_core::orchestration::{RetryPolicy, TaskCompletionTracker, TaskSubmissionCoordinator};
use harvester_core::services::{
    ErrorAggregator, RecordQueue, SubmittedRecord, TaskReportService, TopicLoadBalancer,
};

/// Queue that remembers what was enqueued, in order
#[derive(Default)]
pub struct RecordingQueue {
    pub enqueued: Mutex<Vec<(String, i64, String)>>,
}

impl RecordingQueue {
    pub fn record_ids(&self) -> Vec<String> {
        self.enqueued
            .lock()
            .iter()
            .map(|(_, _, record_id)| record_id.clone())
            .collect()
    }
}

#[async_trait]
impl RecordQueue for RecordingQueue {
    async fn enqueue(&self, topic: &str, task_id: i64, record: &SubmittedRecord) -> Result<()> {
        self.enqueued
            .lock()
            .push((topic.to_string(), task_id, record.record_id.clone()));
        Ok(())
    }
}

pub fn test_config() -> HarvesterConfig {
    let mut config = HarvesterConfig::default();
    config.topics = HashMap::from([
        (
            "enrichment".to_string(),
            vec!["enrichment_1".to_string(), "enrichment_2".to_string()],
        ),
        (
            "oai_harvest".to_string(),
            vec!["oai_harvest_1".to_string(), "oai_harvest_2".to_string()],
        ),
        ("indexing_preview".to_string(), vec!["indexing_preview_1".to_string()]),
        ("indexing_publish".to_string(), vec!["indexing_publish_1".to_string()]),
    ]);
    config.retry = RetryConfig {
        max_attempts: 2,
        base_delay_ms: 0,
        max_delay_ms: 0,
        jitter_enabled: false,
        ..RetryConfig::default()
    };
    config
}

/// All components wired to one in-memory store
pub struct Harness {
    pub config: HarvesterConfig,
    pub repositories: Repositories,
    pub queue: Arc<RecordingQueue>,
    pub coordinator: TaskSubmissionCoordinator,
    pub tracker: TaskCompletionTracker,
    pub reports: TaskReportService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: HarvesterConfig) -> Self {
        let repositories = Repositories::in_memory();
        let queue = Arc::new(RecordingQueue::default());
        let balancer = Arc::new(TopicLoadBalancer::with_seed(
            &repositories,
            config.topics.clone(),
            42,
        ));
        let coordinator =
            TaskSubmissionCoordinator::new(repositories.clone(), &config, balancer, queue.clone());
        let aggregator = ErrorAggregator::new(&repositories, &config.error_reporting);
        let tracker = TaskCompletionTracker::new(
            repositories.clone(),
            aggregator.clone(),
            RetryPolicy::new(config.retry.clone()),
        );
        let reports = TaskReportService::new(
            repositories.clone(),
            aggregator,
            config.error_reporting.default_sample_limit,
        );

        Self {
            config,
            repositories,
            queue,
            coordinator,
            tracker,
            reports,
        }
    }
}

pub fn new_task(task_id: i64, pipeline: &str, expected: i32) -> NewTask {
    NewTask {
        task_id,
        pipeline: pipeline.to_string(),
        expected_records_number: expected,
        sent_timestamp: Utc::now(),
        restarted: false,
        dataset_id: None,
        harvest_date: None,
        harvesting: false,
    }
}

pub fn records(ids: &[&str]) -> Vec<SubmittedRecord> {
    ids.iter().map(|id| SubmittedRecord::new(*id)).collect()
}
