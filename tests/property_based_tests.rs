mod common;

use std::collections::HashSet;

use common::strategies::*;
use common::{new_task, records, Harness};
use harvester_core::constants::UNKNOWN_EXPECTED_RECORDS_NUMBER;
use harvester_core::models::TaskCounters;
use harvester_core::orchestration::{classify, RecordCompletionEvent, TrackingOutcome};
use harvester_core::services::{choose_topic, error_type_id};
use harvester_core::state_machine::TaskState;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn counted(outcomes: &[(bool, bool, bool)]) -> TaskCounters {
    let mut counters = TaskCounters::default();
    for &(is_error, deleted, ignored) in outcomes {
        counters.increment(is_error, deleted, ignored);
    }
    counters
}

/// All record ids of a task plus redelivered duplicates, in random order
fn deliveries_strategy() -> impl Strategy<Value = (usize, Vec<usize>)> {
    (1usize..15)
        .prop_flat_map(|n| (Just(n), prop::collection::vec(0..n, 0..n * 2)))
        .prop_flat_map(|(n, extras)| {
            let all: Vec<usize> = (0..n).chain(extras).collect();
            (Just(n), Just(all).prop_shuffle())
        })
}

proptest! {
    /// Property: every finished record lands in exactly one partition
    #[test]
    fn counters_partition_every_record(outcomes in record_outcomes_strategy(64)) {
        let counters = counted(&outcomes);
        prop_assert_eq!(counters.total() as usize, outcomes.len());
        prop_assert!(counters.processed_errors <= counters.processed);
        prop_assert!(counters.deleted_errors <= counters.deleted);
    }

    /// Property: only the record that brings the total to the expected size is last
    #[test]
    fn last_record_iff_total_reaches_expected(
        outcomes in record_outcomes_strategy(32),
        expected in 0i32..40,
    ) {
        let counters = counted(&outcomes);
        let event = RecordCompletionEvent::success(1, "r");

        let class = classify(&event, &counters, expected);
        prop_assert_eq!(class.is_last_record(), counters.total() == expected);

        let unknown = classify(&event, &counters, UNKNOWN_EXPECTED_RECORDS_NUMBER);
        prop_assert!(!unknown.is_last_record());
    }

    /// Property: error type ids depend on the message only
    #[test]
    fn error_type_id_is_a_function_of_the_message(
        first in error_message_strategy(),
        second in error_message_strategy(),
    ) {
        prop_assert_eq!(error_type_id(&first), error_type_id(&first.clone()));
        if first != second {
            prop_assert_ne!(error_type_id(&first), error_type_id(&second));
        }
    }

    /// Property: a claimed topic is never chosen while a free one exists
    #[test]
    fn claimed_topics_are_avoided(
        topics in topic_names_strategy(),
        claimed_mask in prop::collection::vec(any::<bool>(), 8),
        seed in any::<u64>(),
    ) {
        let claimed: HashSet<String> = topics
            .iter()
            .zip(&claimed_mask)
            .filter(|(_, claimed)| **claimed)
            .map(|(topic, _)| topic.clone())
            .collect();
        let mut rng = StdRng::seed_from_u64(seed);

        let chosen = choose_topic(&topics, &claimed, &mut rng).unwrap();
        prop_assert!(topics.contains(&chosen));
        if claimed.len() < topics.len() {
            prop_assert!(!claimed.contains(&chosen));
        }
    }

    /// Property: state transitions only move forward
    #[test]
    fn transitions_never_move_backwards(from in 0usize..6, to in 0usize..6) {
        let (from_state, to_state) = (TaskState::ALL[from], TaskState::ALL[to]);
        if from_state.can_transition_to(to_state) {
            prop_assert!(to > from);
            prop_assert!(!from_state.is_terminal());
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: redelivered events never change the final counters and the
    /// task completes exactly once
    #[test]
    fn redelivery_counts_each_record_once((n, deliveries) in deliveries_strategy()) {
        tokio_test::block_on(async move {
            let harness = Harness::new();
            let ids: Vec<String> = (0..n).map(|i| format!("record-{i}")).collect();
            let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
            harness
                .coordinator
                .submit_task(new_task(1, "enrichment", n as i32), records(&id_refs))
                .await
                .unwrap();

            let mut completions = 0;
            for index in deliveries {
                let event = RecordCompletionEvent::success(1, ids[index].clone());
                if let TrackingOutcome::Completed { .. } = harness.tracker.handle(&event).await.unwrap() {
                    completions += 1;
                }
            }

            let task = harness.repositories.tasks.get(1).await.unwrap();
            assert_eq!(completions, 1);
            assert_eq!(task.state, TaskState::Processed);
            assert_eq!(task.counters.total() as usize, n);

            let notifications = harness.reports.notifications(1, 0, n as i32).await.unwrap();
            assert_eq!(notifications.len(), n);
        });
    }
}
