use serde::{Deserialize, Serialize};

use crate::ledger::LedgerRef;
use crate::model::mongodb::Id;

/// A vote the caller wishes to cast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastRequest {
    pub voter_id: Id,
    pub candidate_id: Id,
    /// The wallet the vote is cast from; must match the profile's binding
    /// if one exists.
    pub wallet: String,
}

/// A reconciliation request for a vote the ledger recorded but the
/// metadata store missed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileRequest {
    pub voter_id: Id,
    pub candidate_id: Id,
    pub ledger_ref: LedgerRef,
}
