use std::ops::Deref;

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::ledger::{LedgerCandidateId, LedgerRef};
use crate::model::mongodb::Id;

/// Core vote data, as stored in the database.
///
/// Immutable once created, never deleted. The unique index on
/// `(voter_id, election_id)` enforces the at-most-one-vote invariant at
/// insert time; the unique index on `ledger_ref` makes reconciliation
/// idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCore {
    pub voter_id: Id,
    pub election_id: Id,
    pub candidate_id: Id,
    pub ledger_candidate_id: LedgerCandidateId,
    /// The ledger's confirmation reference: proof the vote happened.
    pub ledger_ref: LedgerRef,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub cast_at: DateTime<Utc>,
}

impl VoteCore {
    pub fn new(
        voter_id: Id,
        election_id: Id,
        candidate_id: Id,
        ledger_candidate_id: LedgerCandidateId,
        ledger_ref: LedgerRef,
    ) -> Self {
        Self {
            voter_id,
            election_id,
            candidate_id,
            ledger_candidate_id,
            ledger_ref,
            cast_at: Utc::now(),
        }
    }
}

/// A vote without an id, for insertion.
pub type NewVote = VoteCore;

/// A vote from the database, with its unique id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub vote: VoteCore,
}

impl Deref for Vote {
    type Target = VoteCore;

    fn deref(&self) -> &Self::Target {
        &self.vote
    }
}
