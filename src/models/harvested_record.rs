//! # Harvested Record Model
//!
//! Last-known state of a record of a source dataset. Besides the latest
//! harvest it tracks, per downstream environment, the harvest that is
//! currently indexed there; incremental harvesting compares new harvests
//! against those.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Downstream environment a record version can be indexed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexingEnvironment {
    Preview,
    Published,
}

impl IndexingEnvironment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preview => "preview",
            Self::Published => "published",
        }
    }
}

impl fmt::Display for IndexingEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestedRecord {
    pub dataset_id: String,
    pub record_id: String,
    pub latest_harvest_date: DateTime<Utc>,
    pub latest_harvest_hash: Option<String>,
    pub preview_harvest_date: Option<DateTime<Utc>>,
    pub preview_harvest_hash: Option<String>,
    pub published_harvest_date: Option<DateTime<Utc>>,
    pub published_harvest_hash: Option<String>,
}

impl HarvestedRecord {
    /// First sighting of a record
    pub fn first_sighting(
        dataset_id: impl Into<String>,
        record_id: impl Into<String>,
        harvest_date: DateTime<Utc>,
        harvest_hash: Option<String>,
    ) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            record_id: record_id.into(),
            latest_harvest_date: harvest_date,
            latest_harvest_hash: harvest_hash,
            preview_harvest_date: None,
            preview_harvest_hash: None,
            published_harvest_date: None,
            published_harvest_hash: None,
        }
    }

    pub fn is_indexed_in_some_environment(&self) -> bool {
        self.preview_harvest_date.is_some() || self.published_harvest_date.is_some()
    }

    /// Harvest date of the version indexed in `environment`
    pub fn indexed_harvest_date(&self, environment: IndexingEnvironment) -> Option<DateTime<Utc>> {
        match environment {
            IndexingEnvironment::Preview => self.preview_harvest_date,
            IndexingEnvironment::Published => self.published_harvest_date,
        }
    }

    /// Record that the latest harvested version is now indexed in `environment`
    pub fn mark_indexed(
        &mut self,
        environment: IndexingEnvironment,
        harvest_date: DateTime<Utc>,
        harvest_hash: Option<String>,
    ) {
        let (date, hash) = self.environment_mut(environment);
        *date = Some(harvest_date);
        *hash = harvest_hash;
    }

    pub fn clear_environment(&mut self, environment: IndexingEnvironment) {
        let (date, hash) = self.environment_mut(environment);
        *date = None;
        *hash = None;
    }

    fn environment_mut(
        &mut self,
        environment: IndexingEnvironment,
    ) -> (&mut Option<DateTime<Utc>>, &mut Option<String>) {
        match environment {
            IndexingEnvironment::Preview => {
                (&mut self.preview_harvest_date, &mut self.preview_harvest_hash)
            }
            IndexingEnvironment::Published => (
                &mut self.published_harvest_date,
                &mut self.published_harvest_hash,
            ),
        }
    }
}
