//! # Ghost Task Detector
//!
//! Periodic scan for unfinished tasks that no process is driving anymore:
//! the submitting process died, the pipeline lost the records, completion
//! events were never produced or post-processing never ended. Tasks in
//! either post-processing state are scanned like QUEUED and PROCESSING ones.
//!
//! A task is judged by its age (time since it was sent) and by the most
//! recent pipeline progress recorded in its diagnostics:
//!
//! - up to the short threshold (inclusive): never a ghost
//! - between the thresholds: a ghost only without recent progress
//! - older than the long threshold: always a ghost
//!
//! Tasks indexed under a topic that no configured pipeline owns are left
//! alone; they belong to a deployment this process knows nothing about.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{GhostDetectionConfig, HarvesterConfig};
use crate::database::Repositories;
use crate::error::Result;
use crate::services::TaskStatusUpdater;
use crate::state_machine::TaskState;

/// Age boundaries used to classify active tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GhostThresholds {
    pub short: Duration,
    pub long: Duration,
    pub progress_staleness: Duration,
}

impl From<&GhostDetectionConfig> for GhostThresholds {
    fn from(config: &GhostDetectionConfig) -> Self {
        Self {
            short: config.short_threshold(),
            long: config.long_threshold(),
            progress_staleness: config.progress_staleness(),
        }
    }
}

/// Whether an active task sent at `sent_timestamp` should be reported
pub fn is_ghost(
    now: DateTime<Utc>,
    sent_timestamp: DateTime<Utc>,
    last_progress: Option<DateTime<Utc>>,
    thresholds: &GhostThresholds,
) -> bool {
    let age = now - sent_timestamp;
    if age <= thresholds.short {
        return false;
    }
    if age >= thresholds.long {
        return true;
    }
    last_progress.map_or(true, |progress| now - progress > thresholds.progress_staleness)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GhostTask {
    pub task_id: i64,
    pub pipeline: String,
    pub state: TaskState,
    pub topic_name: String,
    pub owner_id: String,
    pub sent_timestamp: DateTime<Utc>,
    pub last_progress: Option<DateTime<Utc>>,
}

pub struct GhostTaskDetector {
    repositories: Repositories,
    status_updater: TaskStatusUpdater,
    config: GhostDetectionConfig,
    thresholds: GhostThresholds,
    known_topics: HashSet<String>,
}

impl std::fmt::Debug for GhostTaskDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GhostTaskDetector")
            .field("config", &self.config)
            .field("known_topics", &self.known_topics.len())
            .finish_non_exhaustive()
    }
}

impl GhostTaskDetector {
    pub fn new(repositories: Repositories, config: &HarvesterConfig) -> Self {
        let known_topics = config.topics.values().flatten().cloned().collect();
        Self {
            status_updater: TaskStatusUpdater::new(repositories.clone()),
            repositories,
            thresholds: GhostThresholds::from(&config.ghost_detection),
            config: config.ghost_detection.clone(),
            known_topics,
        }
    }

    /// Unfinished tasks that look abandoned at `now`
    pub async fn find_ghost_tasks(&self, now: DateTime<Utc>) -> Result<Vec<GhostTask>> {
        let mut ghosts = Vec::new();

        for state in TaskState::UNFINISHED {
            let entries = self.repositories.tasks_by_state.find_by_state(state).await?;
            for entry in entries {
                if !self.known_topics.contains(&entry.topic_name) {
                    debug!(
                        task_id = entry.task_id,
                        topic = %entry.topic_name,
                        "Skipping task on unknown topic"
                    );
                    continue;
                }

                let Some(task) = self.repositories.tasks.find(entry.task_id).await? else {
                    warn!(task_id = entry.task_id, "Indexed task has no task row");
                    continue;
                };

                let last_progress = self
                    .repositories
                    .diagnostics
                    .find(entry.task_id)
                    .await?
                    .and_then(|diagnostics| diagnostics.last_progress());

                if is_ghost(now, task.sent_timestamp, last_progress, &self.thresholds) {
                    ghosts.push(GhostTask {
                        task_id: task.task_id,
                        pipeline: task.pipeline,
                        state: task.state,
                        topic_name: entry.topic_name,
                        owner_id: entry.owner_id,
                        sent_timestamp: task.sent_timestamp,
                        last_progress,
                    });
                }
            }
        }

        ghosts.sort_by_key(|ghost| ghost.task_id);
        Ok(ghosts)
    }

    /// One detection cycle. Reports every ghost and, when configured, drops it.
    pub async fn detect_once(&self) -> Result<Vec<GhostTask>> {
        let ghosts = self.find_ghost_tasks(Utc::now()).await?;

        for ghost in &ghosts {
            warn!(
                task_id = ghost.task_id,
                pipeline = %ghost.pipeline,
                state = %ghost.state,
                topic = %ghost.topic_name,
                owner_id = %ghost.owner_id,
                sent_timestamp = %ghost.sent_timestamp,
                last_progress = ?ghost.last_progress,
                "Ghost task detected"
            );

            if self.config.drop_ghost_tasks {
                let reason = format!(
                    "Ghost task: no progress since {}",
                    ghost
                        .last_progress
                        .unwrap_or(ghost.sent_timestamp)
                        .to_rfc3339()
                );
                if let Err(e) = self.status_updater.set_task_dropped(ghost.task_id, &reason).await {
                    error!(task_id = ghost.task_id, error = %e, "Unable to drop ghost task");
                }
            }
        }

        Ok(ghosts)
    }

    /// Run detection cycles until `cancel` fires. A failed cycle is logged
    /// and the loop continues.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval_timer = interval(self.config.detection_interval());

        info!(
            interval_seconds = self.config.detection_interval_seconds,
            drop_ghost_tasks = self.config.drop_ghost_tasks,
            "Starting ghost task detector"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Ghost task detector stopped");
                    break;
                }
                _ = interval_timer.tick() => {
                    match self.detect_once().await {
                        Ok(ghosts) if ghosts.is_empty() => debug!("No ghost tasks detected this cycle"),
                        Ok(ghosts) => info!(total = ghosts.len(), "Ghost task detection completed"),
                        Err(e) => error!(error = %e, "Ghost task detection cycle failed"),
                    }
                }
            }
        }
    }
}
