//! Incremental harvest followed by post-processing: only changed records are
//! submitted, and records that vanished from the source are reported once
//! the harvesting task finished its pipeline stage. Indexing tasks record
//! which harvest each environment holds, which is what the next harvest
//! compares against.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use common::{records, Harness};
use harvester_core::error::Result;
use harvester_core::models::{HarvestedRecord, NewTask};
use harvester_core::orchestration::{
    DeletedRecordSink, HarvestingPostProcessor, IndexingPostProcessor, PostProcessingScheduler,
    PostProcessor, RecordCompletionEvent, TrackingOutcome,
};
use harvester_core::services::{
    CategorizationParameters, CategorizationResult, EligibilityRule, HarvestCategorizer,
};
use harvester_core::state_machine::TaskState;
use parking_lot::Mutex;

const DATASET: &str = "dataset-1";

#[derive(Default)]
struct RecordingSink {
    reported: Mutex<Vec<String>>,
}

#[async_trait]
impl DeletedRecordSink for RecordingSink {
    async fn report_deleted(&self, _dataset_id: &str, record_id: &str, _task_id: i64) -> Result<()> {
        self.reported.lock().push(record_id.to_string());
        Ok(())
    }
}

fn date(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, 8, 0, 0).unwrap()
}

fn indexed(record_id: &str, hash: &str, harvested: DateTime<Utc>) -> HarvestedRecord {
    let mut record =
        HarvestedRecord::first_sighting(DATASET, record_id, harvested, Some(hash.to_string()));
    record.preview_harvest_date = Some(harvested);
    record.preview_harvest_hash = Some(hash.to_string());
    record.published_harvest_date = Some(harvested);
    record.published_harvest_hash = Some(hash.to_string());
    record
}

fn params(record_id: &str, hash: &str, harvest_date: DateTime<Utc>) -> CategorizationParameters {
    CategorizationParameters {
        dataset_id: DATASET.to_string(),
        record_id: record_id.to_string(),
        record_date_stamp: None,
        record_hash: Some(hash.to_string()),
        harvest_date,
        full_harvest: false,
    }
}

#[tokio::test]
async fn test_second_harvest_processes_changes_and_reports_vanished_records() {
    let harness = Harness::new();
    let first_harvest = date(1);
    let second_harvest = date(8);

    for record in [
        indexed("unchanged", "h1", first_harvest),
        indexed("changed", "h1", first_harvest),
        indexed("vanished", "h1", first_harvest),
    ] {
        harness.repositories.harvested_records.insert(&record).await.unwrap();
    }
    harness
        .repositories
        .harvested_records
        .insert(&HarvestedRecord::first_sighting(DATASET, "never_indexed", first_harvest, None))
        .await
        .unwrap();

    let categorizer = HarvestCategorizer::new(
        &harness.repositories,
        EligibilityRule::ContentHash,
        &harness.config.categorization,
    );

    let mut eligible = Vec::new();
    for (record_id, hash) in [("unchanged", "h1"), ("changed", "h2"), ("brand_new", "h9")] {
        let result = categorizer
            .categorize(&params(record_id, hash, second_harvest))
            .await
            .unwrap();
        if result.should_be_processed() {
            eligible.push(record_id);
        }
    }
    assert_eq!(eligible, vec!["changed", "brand_new"]);

    let task = NewTask {
        task_id: 100,
        pipeline: "oai_harvest".to_string(),
        expected_records_number: eligible.len() as i32,
        sent_timestamp: Utc::now(),
        restarted: false,
        dataset_id: Some(DATASET.to_string()),
        harvest_date: Some(second_harvest),
        harvesting: true,
    };
    harness
        .coordinator
        .submit_task(task, records(&eligible))
        .await
        .unwrap();

    let mut last = None;
    for record_id in &eligible {
        let mut event = RecordCompletionEvent::success(100, *record_id);
        event.post_processing_task = true;
        last = Some(harness.tracker.handle(&event).await.unwrap());
    }
    assert!(matches!(
        last,
        Some(TrackingOutcome::Completed {
            state: TaskState::ReadyForPostProcessing,
            ..
        })
    ));

    let sink = Arc::new(RecordingSink::default());
    let processor: Arc<dyn PostProcessor> = Arc::new(HarvestingPostProcessor::new(
        harness.repositories.clone(),
        sink.clone(),
        harness.config.post_processing.pipelines.clone(),
    ));
    let scheduler =
        PostProcessingScheduler::new(harness.repositories.clone(), &harness.config, vec![processor]);

    let outcomes = scheduler.run_once().await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].state, TaskState::Processed);

    // "unchanged" was seen by the second harvest, so it is not stale
    assert_eq!(*sink.reported.lock(), vec!["vanished".to_string()]);
    assert!(harness
        .repositories
        .harvested_records
        .find(DATASET, "never_indexed")
        .await
        .unwrap()
        .is_none());

    let task = harness.repositories.tasks.get(100).await.unwrap();
    assert_eq!(task.state, TaskState::Processed);
    assert_eq!(task.expected_post_processed_records_number, 2);
    assert_eq!(task.post_processed_records_count, 2);

    let diagnostics = harness.repositories.diagnostics.find(100).await.unwrap().unwrap();
    assert!(diagnostics.finish_on_pipeline_time.is_some());
    assert!(diagnostics.post_processing_start_time.is_some());
}

async fn run_indexing_task(harness: &Harness, task_id: i64, pipeline: &str, record_ids: &[&str]) {
    let task = NewTask {
        task_id,
        pipeline: pipeline.to_string(),
        expected_records_number: record_ids.len() as i32,
        sent_timestamp: Utc::now(),
        restarted: false,
        dataset_id: Some(DATASET.to_string()),
        harvest_date: None,
        harvesting: false,
    };
    harness
        .coordinator
        .submit_task(task, records(record_ids))
        .await
        .unwrap();
    for record_id in record_ids {
        let mut event = RecordCompletionEvent::success(task_id, *record_id);
        event.post_processing_task = true;
        harness.tracker.handle(&event).await.unwrap();
    }

    let processor: Arc<dyn PostProcessor> = Arc::new(IndexingPostProcessor::new(
        harness.repositories.clone(),
        harness.config.post_processing.indexing_pipelines.clone(),
    ));
    let scheduler =
        PostProcessingScheduler::new(harness.repositories.clone(), &harness.config, vec![processor]);
    let outcomes = scheduler.run_once().await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].task_id, task_id);
    assert_eq!(outcomes[0].state, TaskState::Processed);
}

#[tokio::test]
async fn test_indexed_records_are_skipped_by_the_next_harvest() {
    let harness = Harness::new();
    let harvested = date(1);
    harness
        .repositories
        .harvested_records
        .insert(&HarvestedRecord::first_sighting(DATASET, "kept", harvested, Some("h1".to_string())))
        .await
        .unwrap();
    harness
        .repositories
        .harvested_records
        .insert(&indexed("withdrawn", "h0", date(2)))
        .await
        .unwrap();

    run_indexing_task(&harness, 200, "indexing_preview", &["kept"]).await;
    run_indexing_task(&harness, 201, "indexing_publish", &["kept"]).await;

    let kept = harness
        .repositories
        .harvested_records
        .find(DATASET, "kept")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(kept.preview_harvest_date, Some(harvested));
    assert_eq!(kept.published_harvest_hash.as_deref(), Some("h1"));

    let withdrawn = harness
        .repositories
        .harvested_records
        .find(DATASET, "withdrawn")
        .await
        .unwrap()
        .unwrap();
    assert!(!withdrawn.is_indexed_in_some_environment());

    let categorizer = HarvestCategorizer::new(
        &harness.repositories,
        EligibilityRule::ContentHash,
        &harness.config.categorization,
    );
    assert_eq!(
        categorizer.categorize(&params("kept", "h1", date(8))).await.unwrap(),
        CategorizationResult::AlreadyProcessed
    );
    assert_eq!(
        categorizer
            .categorize(&params("withdrawn", "h0", date(8)))
            .await
            .unwrap(),
        CategorizationResult::EligibleForProcessing
    );
}
