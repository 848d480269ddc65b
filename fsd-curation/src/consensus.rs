//! Consensus over the votes of one candidate annotation

use fsd_common::db::{Vote, VoteValue};

/// Non-expert votes needed for a value to become the consensus
pub const MIN_AGREEMENT_VOTES: usize = 2;

/// Derive a candidate's ground truth state from its votes
///
/// Votes that failed quality control are ignored. Any expert vote overrides
/// the crowd: the first value in [`VoteValue::PRIORITY_ORDER`] carried by an
/// expert wins, so conflicting experts resolve by value order rather than
/// recency. Without experts, the first value with at least
/// [`MIN_AGREEMENT_VOTES`] votes wins; otherwise the state is undetermined.
pub fn ground_truth_state(votes: &[Vote]) -> Option<VoteValue> {
    let (expert, crowd): (Vec<&Vote>, Vec<&Vote>) =
        votes.iter().filter(|v| v.counts()).partition(|v| v.from_expert);

    if !expert.is_empty() {
        return VoteValue::PRIORITY_ORDER
            .into_iter()
            .find(|value| expert.iter().any(|v| v.value == *value));
    }

    VoteValue::PRIORITY_ORDER
        .into_iter()
        .find(|value| crowd.iter().filter(|v| v.value == *value).count() >= MIN_AGREEMENT_VOTES)
}
