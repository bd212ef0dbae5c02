use proptest::prelude::*;

/// Outcome flags of one finished record: (is_error, marked_as_deleted, ignored)
pub fn record_outcome_strategy() -> impl Strategy<Value = (bool, bool, bool)> {
    (any::<bool>(), any::<bool>(), any::<bool>())
}

pub fn record_outcomes_strategy(max: usize) -> impl Strategy<Value = Vec<(bool, bool, bool)>> {
    prop::collection::vec(record_outcome_strategy(), 0..max)
}

/// Free-text error messages as pipelines report them
pub fn error_message_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 :._-]{1,120}"
}

pub fn topic_names_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::hash_set("[a-z]{3,8}_[0-9]", 1..8)
        .prop_map(|topics| topics.into_iter().collect())
}
