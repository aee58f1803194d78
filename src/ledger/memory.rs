//! In-process implementation of [`LedgerClient`].
//!
//! Backs local development (no chain gateway configured) and the test
//! suite. Mirrors the contract's observable behaviour: monotonically
//! assigned ids, per-wallet double-vote rejection, and unique confirmation
//! references.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::{
    CandidateReceipt, ElectionReceipt, LedgerCandidateId, LedgerClient, LedgerElection,
    LedgerElectionId, LedgerError, LedgerRef, LedgerResult, VoteReceipt,
};

#[derive(Debug, Default)]
struct State {
    next_election_id: LedgerElectionId,
    next_candidate_id: LedgerCandidateId,
    next_tx: u64,
    elections: HashMap<LedgerElectionId, ElectionEntry>,
}

#[derive(Debug)]
struct ElectionEntry {
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    candidates: Vec<LedgerCandidateId>,
    /// Vote count per candidate.
    tally: HashMap<LedgerCandidateId, u64>,
    /// Wallets that have voted, with their confirmation refs.
    voted: HashMap<String, LedgerRef>,
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<State>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_ref(state: &mut State) -> LedgerRef {
        state.next_tx += 1;
        LedgerRef(format!("memtx-{:08x}", state.next_tx))
    }
}

#[rocket::async_trait]
impl LedgerClient for MemoryLedger {
    async fn create_election(
        &self,
        _title: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> LedgerResult<ElectionReceipt> {
        let mut state = self.state.lock().unwrap();
        state.next_election_id += 1;
        let id = state.next_election_id;
        state.elections.insert(
            id,
            ElectionEntry {
                start_time,
                end_time,
                candidates: Vec::new(),
                tally: HashMap::new(),
                voted: HashMap::new(),
            },
        );
        let confirmation = Self::next_ref(&mut state);
        Ok(ElectionReceipt {
            ledger_election_id: id,
            confirmation,
        })
    }

    async fn register_candidate(
        &self,
        election: LedgerElectionId,
        _name: &str,
    ) -> LedgerResult<CandidateReceipt> {
        let mut state = self.state.lock().unwrap();
        state.next_candidate_id += 1;
        let id = state.next_candidate_id;
        let confirmation = Self::next_ref(&mut state);
        let entry = state
            .elections
            .get_mut(&election)
            .ok_or_else(|| LedgerError::Rejected(format!("unknown election {election}")))?;
        entry.candidates.push(id);
        entry.tally.insert(id, 0);
        Ok(CandidateReceipt {
            ledger_candidate_id: id,
            confirmation,
        })
    }

    async fn cast_vote(
        &self,
        election: LedgerElectionId,
        candidate: LedgerCandidateId,
        wallet: &str,
    ) -> LedgerResult<VoteReceipt> {
        let mut state = self.state.lock().unwrap();
        let confirmation = Self::next_ref(&mut state);
        let entry = state
            .elections
            .get_mut(&election)
            .ok_or_else(|| LedgerError::Rejected(format!("unknown election {election}")))?;
        if !entry.candidates.contains(&candidate) {
            return Err(LedgerError::Rejected(format!(
                "unknown candidate {candidate}"
            )));
        }
        if entry.voted.contains_key(wallet) {
            return Err(LedgerError::AlreadyVoted);
        }
        entry.voted.insert(wallet.to_string(), confirmation.clone());
        *entry.tally.entry(candidate).or_insert(0) += 1;
        Ok(VoteReceipt { confirmation })
    }

    async fn vote_status(
        &self,
        election: LedgerElectionId,
        wallet: &str,
    ) -> LedgerResult<Option<LedgerRef>> {
        let state = self.state.lock().unwrap();
        let entry = state
            .elections
            .get(&election)
            .ok_or_else(|| LedgerError::Rejected(format!("unknown election {election}")))?;
        Ok(entry.voted.get(wallet).cloned())
    }

    async fn tally(
        &self,
        election: LedgerElectionId,
    ) -> LedgerResult<HashMap<LedgerCandidateId, u64>> {
        let state = self.state.lock().unwrap();
        let entry = state
            .elections
            .get(&election)
            .ok_or_else(|| LedgerError::Rejected(format!("unknown election {election}")))?;
        Ok(entry.tally.clone())
    }

    async fn read_election(&self, election: LedgerElectionId) -> LedgerResult<LedgerElection> {
        let state = self.state.lock().unwrap();
        let entry = state
            .elections
            .get(&election)
            .ok_or_else(|| LedgerError::Rejected(format!("unknown election {election}")))?;
        let now = Utc::now();
        Ok(LedgerElection {
            start_time: entry.start_time,
            end_time: entry.end_time,
            active: entry.start_time <= now && now <= entry.end_time,
        })
    }
}
