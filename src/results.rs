//! Results aggregation: the deterministic merge of the ledger tally with
//! candidate metadata.
//!
//! Computed on demand, never cached beyond a request: the tally can change
//! until the election completes, and slightly after due to confirmation
//! latency.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ledger::LedgerCandidateId;
use crate::model::db::candidate::CandidateApplication;

/// One ranked row of an election's results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub name: String,
    pub ledger_candidate_id: LedgerCandidateId,
    pub vote_count: u64,
    /// Share of the total, rounded to two decimals; 0 when there are no
    /// votes at all.
    pub percentage: f64,
}

/// A tally entry with no verified metadata twin. Should not occur under
/// correct two-phase registration, but ledger/metadata drift must be
/// observable rather than silently dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedCandidate {
    pub ledger_candidate_id: LedgerCandidateId,
    pub vote_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionResults {
    pub candidates: Vec<RankedCandidate>,
    pub unresolved: Vec<UnresolvedCandidate>,
    pub total_votes: u64,
}

/// Merge a ledger tally with the verified candidate applications for the
/// election.
///
/// Ranking is by vote count descending, ties broken by ascending ledger
/// candidate id. Submission order is never used: it is not stable across
/// the two stores. Verified candidates absent from the tally count as zero;
/// tally entries with no verified twin are surfaced as unresolved.
pub fn aggregate(
    tally: &HashMap<LedgerCandidateId, u64>,
    candidates: &[CandidateApplication],
) -> ElectionResults {
    let total_votes: u64 = tally.values().sum();

    let mut ranked: Vec<RankedCandidate> = candidates
        .iter()
        .filter_map(|application| {
            let ledger_id = application.votable()?;
            let vote_count = tally.get(&ledger_id).copied().unwrap_or(0);
            Some(RankedCandidate {
                name: application.name.clone(),
                ledger_candidate_id: ledger_id,
                vote_count,
                percentage: percentage(vote_count, total_votes),
            })
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.vote_count
            .cmp(&a.vote_count)
            .then(a.ledger_candidate_id.cmp(&b.ledger_candidate_id))
    });

    let mut unresolved: Vec<UnresolvedCandidate> = tally
        .iter()
        .filter(|(ledger_id, _)| {
            !ranked
                .iter()
                .any(|candidate| candidate.ledger_candidate_id == **ledger_id)
        })
        .map(|(&ledger_candidate_id, &vote_count)| UnresolvedCandidate {
            ledger_candidate_id,
            vote_count,
        })
        .collect();
    unresolved.sort_by_key(|candidate| candidate.ledger_candidate_id);

    ElectionResults {
        candidates: ranked,
        unresolved,
        total_votes,
    }
}

/// `count / total * 100` to two decimals, defined as 0 when `total` is 0.
fn percentage(count: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (count as f64 * 100.0 / total as f64 * 100.0).round() / 100.0
}
