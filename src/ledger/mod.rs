//! Client interface to the append-only election ledger.
//!
//! The ledger is authoritative for vote counts and is the sole source of the
//! canonical numeric election/candidate ids. It enforces at-most-one vote
//! per wallet on its side, independently of the metadata store. Calls are
//! slow relative to the database and can fail or time out independently of
//! it; a timeout means *unknown outcome*, never failure.

mod http;
mod memory;

pub use http::HttpLedger;
pub use memory::MemoryLedger;

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ledger-native election id.
pub type LedgerElectionId = u64;

/// Ledger-native candidate id.
pub type LedgerCandidateId = u64;

/// Opaque confirmation reference for a ledger write (transaction hash or
/// equivalent). Unique per accepted write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerRef(pub String);

impl Display for LedgerRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receipt for a newly created election.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionReceipt {
    pub ledger_election_id: LedgerElectionId,
    pub confirmation: LedgerRef,
}

/// Receipt for a newly registered candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateReceipt {
    pub ledger_candidate_id: LedgerCandidateId,
    pub confirmation: LedgerRef,
}

/// Receipt for an accepted vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub confirmation: LedgerRef,
}

/// The ledger's view of an election.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerElection {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub active: bool,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The ledger has already recorded a vote for this wallet.
    #[error("wallet has already voted in this election")]
    AlreadyVoted,
    /// The wallet is not eligible according to on-chain state. The ledger's
    /// view (keyed by wallet) can diverge from the metadata store's view
    /// (keyed by identity), so this can occur even after local checks pass.
    #[error("wallet is not eligible according to the ledger")]
    NotEligible,
    /// The call exceeded its time bound. The write may or may not have been
    /// recorded; callers must re-query before retrying.
    #[error("ledger call timed out")]
    Timeout,
    /// The ledger rejected the request for a contract-level reason.
    #[error("ledger rejected request: {0}")]
    Rejected(String),
    #[error("ledger transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for LedgerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err.to_string())
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Abstract ledger operations consumed by the core.
///
/// Implementations must provide strong ordering and reject double votes per
/// wallet. There is exactly one client instance per process, connected at
/// ignition and shared by all requests.
#[rocket::async_trait]
pub trait LedgerClient: Send + Sync {
    /// Create an election on the ledger, receiving its canonical numeric id.
    async fn create_election(
        &self,
        title: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> LedgerResult<ElectionReceipt>;

    /// Register a candidate for an existing ledger election.
    async fn register_candidate(
        &self,
        election: LedgerElectionId,
        name: &str,
    ) -> LedgerResult<CandidateReceipt>;

    /// Cast a vote from the given wallet.
    async fn cast_vote(
        &self,
        election: LedgerElectionId,
        candidate: LedgerCandidateId,
        wallet: &str,
    ) -> LedgerResult<VoteReceipt>;

    /// Has this wallet already voted in the election? Returns the recorded
    /// confirmation reference if so. Used to resolve unknown outcomes after
    /// a timeout instead of blindly re-submitting.
    async fn vote_status(
        &self,
        election: LedgerElectionId,
        wallet: &str,
    ) -> LedgerResult<Option<LedgerRef>>;

    /// The authoritative per-candidate vote counts for an election.
    async fn tally(
        &self,
        election: LedgerElectionId,
    ) -> LedgerResult<HashMap<LedgerCandidateId, u64>>;

    /// The ledger's view of the election itself.
    async fn read_election(&self, election: LedgerElectionId) -> LedgerResult<LedgerElection>;
}
