//! # Topic Load Balancer
//!
//! Picks one of the interchangeable topics of a pipeline for a new task.
//! Topics claimed by active tasks of the same pipeline are avoided, so one
//! large task cannot block the queue of the next one. When every topic is
//! claimed the choice falls back to uniform over all of them.
//!
//! The random source is local to the process. Running one balancer per
//! process only affects the distribution, never correctness.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::database::{Repositories, TasksByStateRepository};
use crate::error::{HarvesterError, Result};
use crate::state_machine::TaskState;

/// Uniform choice among unclaimed topics, or among all topics when none is
/// free. `None` only when `topics` is empty.
pub fn choose_topic<R: Rng + ?Sized>(
    topics: &[String],
    claimed: &HashSet<String>,
    rng: &mut R,
) -> Option<String> {
    let free: Vec<&String> = topics.iter().filter(|t| !claimed.contains(*t)).collect();
    if free.is_empty() {
        if topics.is_empty() {
            return None;
        }
        return Some(topics[rng.gen_range(0..topics.len())].clone());
    }
    Some(free[rng.gen_range(0..free.len())].clone())
}

pub struct TopicLoadBalancer {
    tasks_by_state: Arc<dyn TasksByStateRepository>,
    topics: HashMap<String, Vec<String>>,
    rng: Mutex<StdRng>,
}

impl std::fmt::Debug for TopicLoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicLoadBalancer")
            .field("topics", &self.topics)
            .finish()
    }
}

impl TopicLoadBalancer {
    pub fn new(repositories: &Repositories, topics: HashMap<String, Vec<String>>) -> Self {
        Self::with_rng(repositories, topics, StdRng::from_entropy())
    }

    /// Deterministic balancer for reproducible distributions
    pub fn with_seed(
        repositories: &Repositories,
        topics: HashMap<String, Vec<String>>,
        seed: u64,
    ) -> Self {
        Self::with_rng(repositories, topics, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        repositories: &Repositories,
        topics: HashMap<String, Vec<String>>,
        rng: StdRng,
    ) -> Self {
        Self {
            tasks_by_state: repositories.tasks_by_state.clone(),
            topics,
            rng: Mutex::new(rng),
        }
    }

    pub fn topics_for(&self, pipeline: &str) -> &[String] {
        self.topics.get(pipeline).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Topics held by QUEUED or PROCESSING tasks of the pipeline
    pub async fn claimed_topics(&self, pipeline: &str) -> Result<HashSet<String>> {
        let mut claimed = HashSet::new();
        for state in TaskState::ACTIVE {
            let entries = self
                .tasks_by_state
                .find_by_state_and_pipeline(state, pipeline)
                .await?;
            claimed.extend(entries.into_iter().map(|entry| entry.topic_name));
        }
        Ok(claimed)
    }

    pub async fn select_topic(&self, pipeline: &str) -> Result<String> {
        let topics = self.topics_for(pipeline);
        if topics.is_empty() {
            return Err(HarvesterError::NoTopicsConfigured {
                pipeline: pipeline.to_string(),
            });
        }

        let claimed = self.claimed_topics(pipeline).await?;
        let topic = {
            let mut rng = self.rng.lock();
            choose_topic(topics, &claimed, &mut *rng)
        }
        .ok_or_else(|| HarvesterError::NoTopicsConfigured {
            pipeline: pipeline.to_string(),
        })?;

        debug!(
            pipeline,
            topic = %topic,
            claimed = claimed.len(),
            available = topics.len(),
            "Selected topic for task"
        );
        Ok(topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics() -> Vec<String> {
        (1..=4).map(|i| format!("topic_{i}")).collect()
    }

    #[test]
    fn test_claimed_topics_are_avoided() {
        let mut rng = StdRng::seed_from_u64(1);
        let claimed: HashSet<String> = ["topic_1", "topic_2", "topic_3"]
            .into_iter()
            .map(String::from)
            .collect();

        for _ in 0..50 {
            assert_eq!(
                choose_topic(&topics(), &claimed, &mut rng).as_deref(),
                Some("topic_4")
            );
        }
    }

    #[test]
    fn test_all_claimed_falls_back_to_every_topic() {
        let mut rng = StdRng::seed_from_u64(2);
        let claimed: HashSet<String> = topics().into_iter().collect();
        let chosen: HashSet<String> = (0..200)
            .filter_map(|_| choose_topic(&topics(), &claimed, &mut rng))
            .collect();
        assert_eq!(chosen.len(), 4);
    }

    #[test]
    fn test_no_topics_yields_nothing() {
        let mut rng = StdRng::seed_from_u64(3);
        assert!(choose_topic(&[], &HashSet::new(), &mut rng).is_none());
    }

    #[tokio::test]
    async fn test_unknown_pipeline_is_rejected() {
        let balancer = TopicLoadBalancer::with_seed(&Repositories::in_memory(), HashMap::new(), 4);
        assert_eq!(
            balancer.select_topic("oai_harvest").await,
            Err(HarvesterError::NoTopicsConfigured {
                pipeline: "oai_harvest".to_string()
            })
        );
    }
}
