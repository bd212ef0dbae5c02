//! # Incremental Harvest Categorizer
//!
//! Decides whether a freshly harvested record needs to go through the
//! pipeline again, by comparing it with what is currently indexed in the
//! preview and publish environments.
//!
//! The latest harvest date and hash of a known record are refreshed on every
//! sighting, whatever the outcome. Post-processing relies on that to find the
//! records that disappeared from the source.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CategorizationConfig;
use crate::database::{HarvestedRecordRepository, Repositories};
use crate::error::Result;
use crate::models::HarvestedRecord;

/// Per-pipeline-kind eligibility rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityRule {
    /// Every record is processed again
    FullHarvest,
    /// Sources without reliable timestamps
    ContentHash,
    /// Sources with a record-level last-modified date
    DateStamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CategorizationResult {
    EligibleForProcessing,
    AlreadyProcessed,
}

impl CategorizationResult {
    pub fn should_be_processed(&self) -> bool {
        matches!(self, Self::EligibleForProcessing)
    }

    fn from_eligibility(eligible: bool) -> Self {
        if eligible {
            Self::EligibleForProcessing
        } else {
            Self::AlreadyProcessed
        }
    }
}

/// One harvested record plus the harvest run it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorizationParameters {
    pub dataset_id: String,
    pub record_id: String,
    pub record_date_stamp: Option<DateTime<Utc>>,
    pub record_hash: Option<String>,
    pub harvest_date: DateTime<Utc>,
    pub full_harvest: bool,
}

impl EligibilityRule {
    /// Decide eligibility of a known record
    pub fn evaluate(
        &self,
        stored: &HarvestedRecord,
        params: &CategorizationParameters,
        date_stamp_buffer: Duration,
    ) -> CategorizationResult {
        if params.full_harvest {
            return CategorizationResult::EligibleForProcessing;
        }

        let eligible = match self {
            Self::FullHarvest => true,
            Self::ContentHash => hash_differs(stored, params.record_hash.as_deref()),
            Self::DateStamp => date_stamp_is_newer(stored, params.record_date_stamp, date_stamp_buffer),
        };
        CategorizationResult::from_eligibility(eligible)
    }
}

fn hash_differs(stored: &HarvestedRecord, record_hash: Option<&str>) -> bool {
    let Some(hash) = record_hash else {
        return true;
    };
    let differs = |indexed: &Option<String>| indexed.as_deref().map_or(true, |h| h != hash);
    differs(&stored.preview_harvest_hash) || differs(&stored.published_harvest_hash)
}

fn date_stamp_is_newer(
    stored: &HarvestedRecord,
    record_date_stamp: Option<DateTime<Utc>>,
    buffer: Duration,
) -> bool {
    let Some(date_stamp) = record_date_stamp else {
        return true;
    };
    let buffered = date_stamp + buffer;
    let newer = |indexed: Option<DateTime<Utc>>| indexed.map_or(true, |d| buffered > d);
    newer(stored.preview_harvest_date) || newer(stored.published_harvest_date)
}

pub struct HarvestCategorizer {
    harvested_records: Arc<dyn HarvestedRecordRepository>,
    rule: EligibilityRule,
    date_stamp_buffer: Duration,
}

impl std::fmt::Debug for HarvestCategorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarvestCategorizer")
            .field("rule", &self.rule)
            .field("date_stamp_buffer", &self.date_stamp_buffer)
            .finish()
    }
}

impl HarvestCategorizer {
    pub fn new(
        repositories: &Repositories,
        rule: EligibilityRule,
        config: &CategorizationConfig,
    ) -> Self {
        Self {
            harvested_records: repositories.harvested_records.clone(),
            rule,
            date_stamp_buffer: config.date_stamp_buffer(),
        }
    }

    pub async fn categorize(&self, params: &CategorizationParameters) -> Result<CategorizationResult> {
        let stored = self
            .harvested_records
            .find(&params.dataset_id, &params.record_id)
            .await?;

        let result = match stored {
            None => {
                self.harvested_records
                    .insert(&HarvestedRecord::first_sighting(
                        &params.dataset_id,
                        &params.record_id,
                        params.harvest_date,
                        params.record_hash.clone(),
                    ))
                    .await?;
                CategorizationResult::EligibleForProcessing
            }
            Some(stored) => {
                self.harvested_records
                    .update_latest_harvest(
                        &params.dataset_id,
                        &params.record_id,
                        params.harvest_date,
                        params.record_hash.as_deref(),
                    )
                    .await?;
                self.rule.evaluate(&stored, params, self.date_stamp_buffer)
            }
        };

        debug!(
            dataset_id = %params.dataset_id,
            record_id = %params.record_id,
            result = ?result,
            "Categorized harvested record"
        );
        Ok(result)
    }
}
