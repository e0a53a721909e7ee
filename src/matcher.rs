use crate::model::{MatchResult, Matchable};

/// Match each transaction against every candidate record using the
/// domain-level `compare` predicate.
///
/// Input order is preserved and the candidate slice is shared by every
/// transaction, so two runs over the same inputs produce identical output.
/// Brute force on purpose: candidate sets are one CSV upload or one
/// settlement period, and the cross product stays trivially auditable.
pub fn match_transactions<T, E>(txs: Vec<T>, candidates: &[E]) -> Vec<MatchResult<T, E>>
where
    T: Matchable,
    E: Matchable + Clone,
{
    txs.into_iter()
        .map(|tx| {
            let matches = candidates
                .iter()
                .filter(|candidate| candidate.compare(&tx))
                .cloned()
                .collect();
            MatchResult { tx, matches }
        })
        .collect()
}
