//! Two-phase write coordination between the ledger and the metadata store.
//!
//! The ledger call is the single source of truth for whether a write
//! happened. The metadata store mirrors it, and the mirror can fail
//! independently; every partial-failure path here either heals itself or
//! surfaces a named, reconcilable state. Nothing is cancelled once a ledger
//! call has been issued; aborting before that point has no side effects.

use chrono::{DateTime, Utc};
use mongodb::bson::doc;
use mongodb::Database;
use rocket::request::{self, FromRequest, Request};
use rocket::State;
use thiserror::Error;

use crate::error::{Error, Result};
use crate::ledger::{
    LedgerCandidateId, LedgerClient, LedgerElectionId, LedgerError, LedgerRef,
};
use crate::model::db::candidate::CandidateApplication;
use crate::model::db::election::{Election, ElectionPhase, ElectionState};
use crate::model::db::eligibility::{ApprovalStatus, EligibilityProfile};
use crate::model::db::vote::{NewVote, Vote, VoteCore};
use crate::model::mongodb::{is_duplicate_key_error, Coll, Id};

/// Outcome of a vote cast, as exposed to the caller.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "status")]
pub enum CastOutcome {
    /// The ledger accepted the vote and the metadata row was persisted.
    Cast { ledger_ref: LedgerRef },
    /// A vote for this (voter, election) already exists.
    AlreadyVoted { ledger_ref: LedgerRef },
    /// The ledger accepted the vote but the metadata row could not be
    /// written. The vote is not lost; reconciliation completes the mirror
    /// using the carried reference.
    RecordedOnLedgerButNotPersisted { ledger_ref: LedgerRef },
}

/// Outcome of a reconciliation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ReconcileOutcome {
    Inserted,
    AlreadyPersisted,
}

/// Failures of the vote store, distinguished because uniqueness violations
/// are a (correct) enforcement outcome while unavailability is not.
#[derive(Debug, Error)]
pub enum VoteStoreError {
    /// A unique index rejected the insert.
    #[error("duplicate vote")]
    Duplicate,
    #[error("vote store unavailable: {0}")]
    Unavailable(String),
}

/// The narrow metadata-store seam the coordinator writes votes through.
///
/// The production implementation is MongoDB with unique indexes on
/// `(voter_id, election_id)` and `ledger_ref`; the insert itself is the
/// enforcement point, never a prior read.
#[rocket::async_trait]
pub trait VoteStore: Send + Sync {
    async fn find(
        &self,
        voter_id: Id,
        election_id: Id,
    ) -> std::result::Result<Option<VoteCore>, VoteStoreError>;

    async fn find_by_ref(
        &self,
        ledger_ref: &LedgerRef,
    ) -> std::result::Result<Option<VoteCore>, VoteStoreError>;

    async fn insert(&self, vote: NewVote) -> std::result::Result<(), VoteStoreError>;
}

/// Everything the ledger call needs, resolved and validated up front.
#[derive(Debug, Clone)]
pub struct CastContext {
    pub voter_id: Id,
    pub election_id: Id,
    pub candidate_id: Id,
    pub ledger_election_id: LedgerElectionId,
    pub ledger_candidate_id: LedgerCandidateId,
    pub wallet: String,
    /// True if the profile has no recorded wallet yet; the caller records
    /// the binding after a successful cast.
    pub bind_wallet: bool,
}

/// Check the cast preconditions, in order. The first failure aborts with a
/// specific error and no side effects. These checks are advisory: the
/// storage-level unique index and the ledger's own per-wallet enforcement
/// are the actual safety net.
pub fn precheck_cast(
    profile: Option<&EligibilityProfile>,
    election: &Election,
    application: Option<&CandidateApplication>,
    wallet: &str,
    now: DateTime<Utc>,
) -> Result<CastContext> {
    // 1. Eligibility profile exists and is verified.
    let profile = profile.ok_or_else(|| Error::not_found("no eligibility profile"))?;
    if profile.status != ApprovalStatus::Verified {
        return Err(Error::Validation(format!(
            "voter profile is {:?}, not verified",
            profile.status
        )));
    }
    profile.check_wallet(wallet)?;

    // 2. Election is active (and has reached the ledger).
    if election.state != ElectionState::Published {
        return Err(Error::Validation("election is not published".to_string()));
    }
    if election.phase(now) != ElectionPhase::Active {
        return Err(Error::Validation(format!(
            "election is {:?}, voting is only legal while active",
            election.phase(now)
        )));
    }
    let ledger_election_id = election
        .ledger_id
        .ok_or_else(|| Error::Validation("election has no ledger twin yet".to_string()))?;

    // 3. Candidate is verified, belongs to this election, and has a ledger
    //    twin.
    let application =
        application.ok_or_else(|| Error::not_found("no such candidate application"))?;
    if application.election_id != election.id {
        return Err(Error::Validation(
            "candidate does not belong to this election".to_string(),
        ));
    }
    let ledger_candidate_id = application.votable().ok_or_else(|| {
        Error::Validation("candidate is not verified and registered on the ledger".to_string())
    })?;

    Ok(CastContext {
        voter_id: profile.identity_id,
        election_id: election.id,
        candidate_id: application.id,
        ledger_election_id,
        ledger_candidate_id,
        wallet: wallet.to_string(),
        bind_wallet: profile.wallet_address.is_none(),
    })
}

/// Cast a vote: ledger first, then the metadata mirror.
///
/// Precondition 4 (no existing vote for this voter and election) is checked
/// here as an advisory read to avoid paying ledger cost, but is enforced by
/// the unique index at insert time.
pub async fn cast_vote(
    ledger: &dyn LedgerClient,
    store: &dyn VoteStore,
    ctx: CastContext,
) -> Result<CastOutcome> {
    // 4. Advisory duplicate check.
    if let Some(existing) = store
        .find(ctx.voter_id, ctx.election_id)
        .await
        .map_err(store_error)?
    {
        return Ok(CastOutcome::AlreadyVoted {
            ledger_ref: existing.ledger_ref,
        });
    }

    // Phase one: the ledger records the vote, or tells us why not.
    let ledger_ref = match submit_to_ledger(ledger, &ctx).await? {
        Submitted::Accepted(ledger_ref) => ledger_ref,
        Submitted::WalletAlreadyVoted(ledger_ref) => {
            // The ledger has a vote for this wallet that we have no row
            // for. The status query does not say which candidate it was
            // for, so no row is fabricated from this request's context;
            // reconciliation supplies the true vote.
            return Ok(CastOutcome::AlreadyVoted { ledger_ref });
        }
    };

    // Phase two: mirror into the metadata store.
    match store.insert(new_vote(&ctx, ledger_ref.clone())).await {
        Ok(()) => Ok(CastOutcome::Cast { ledger_ref }),
        Err(VoteStoreError::Duplicate) => {
            // A concurrent twin won the unique index. The ledger should
            // have rejected our wallet's second vote; if it did not, this
            // index is the final backstop.
            let ledger_ref = match store.find(ctx.voter_id, ctx.election_id).await {
                Ok(Some(existing)) => existing.ledger_ref,
                _ => ledger_ref,
            };
            Ok(CastOutcome::AlreadyVoted { ledger_ref })
        }
        Err(VoteStoreError::Unavailable(detail)) => {
            error!(
                "vote {ledger_ref} recorded on ledger but not persisted: {detail}"
            );
            Ok(CastOutcome::RecordedOnLedgerButNotPersisted { ledger_ref })
        }
    }
}

/// Insert a vote row for a ledger-confirmed vote, idempotently keyed by the
/// confirmation reference. Safe to attempt any number of times.
pub async fn reconcile_vote(
    store: &dyn VoteStore,
    vote: NewVote,
) -> Result<ReconcileOutcome> {
    if store
        .find_by_ref(&vote.ledger_ref)
        .await
        .map_err(store_error)?
        .is_some()
    {
        return Ok(ReconcileOutcome::AlreadyPersisted);
    }
    match store.insert(vote).await {
        Ok(()) => Ok(ReconcileOutcome::Inserted),
        // Either the ref or the (voter, election) pair already exists;
        // both mean the mirror is already complete.
        Err(VoteStoreError::Duplicate) => Ok(ReconcileOutcome::AlreadyPersisted),
        Err(VoteStoreError::Unavailable(detail)) => Err(Error::Ledger(detail)),
    }
}

/// Publish a draft election: ledger create first (the ledger assigns the
/// canonical id), then mirror the id into metadata.
///
/// Idempotent: an election that already has a ledger twin skips the ledger
/// leg, so a retry after a partial failure only completes the missing leg.
pub async fn publish_election(
    ledger: &dyn LedgerClient,
    elections: &Coll<Election>,
    election: &Election,
) -> Result<LedgerElectionId> {
    if let Some(ledger_id) = election.ledger_id {
        mirror_election(elections, election.id, ledger_id, None).await?;
        return Ok(ledger_id);
    }

    let receipt = ledger
        .create_election(
            &election.name,
            election.times.start_time,
            election.times.end_time,
        )
        .await
        .map_err(|e| ledger_write_error(e, "election create"))?;
    info!(
        "election {} created on ledger as {} ({})",
        election.id, receipt.ledger_election_id, receipt.confirmation
    );

    mirror_election(
        elections,
        election.id,
        receipt.ledger_election_id,
        Some(receipt.confirmation),
    )
    .await?;
    Ok(receipt.ledger_election_id)
}

async fn mirror_election(
    elections: &Coll<Election>,
    id: Id,
    ledger_id: LedgerElectionId,
    confirmation: Option<LedgerRef>,
) -> Result<()> {
    let update = doc! {
        "$set": {
            "state": ElectionState::Published,
            "ledger_id": ledger_id as i64,
        }
    };
    match elections.update_one(id.as_doc(), update, None).await {
        Ok(_) => Ok(()),
        Err(e) => match confirmation {
            // The ledger write exists; surface the reconcilable state.
            Some(ledger_ref) => Err(Error::Inconsistency {
                ledger_ref,
                detail: format!("election {id}: {e}"),
            }),
            None => Err(e.into()),
        },
    }
}

/// Register a verified candidate application on the ledger and mirror the
/// assigned id. Metadata verification must already have happened; ledger
/// cost is never paid for applications that may still be rejected.
///
/// Idempotent: an application that already has a ledger id skips the
/// ledger leg.
pub async fn register_candidate(
    ledger: &dyn LedgerClient,
    candidates: &Coll<CandidateApplication>,
    application: &CandidateApplication,
    ledger_election_id: LedgerElectionId,
) -> Result<LedgerCandidateId> {
    application.ledger_registration_allowed()?;
    if let Some(ledger_id) = application.ledger_candidate_id {
        return Ok(ledger_id);
    }

    let receipt = ledger
        .register_candidate(ledger_election_id, &application.name)
        .await
        .map_err(|e| ledger_write_error(e, "candidate registration"))?;
    info!(
        "candidate {} registered on ledger as {} ({})",
        application.id, receipt.ledger_candidate_id, receipt.confirmation
    );

    let update = doc! {
        "$set": { "ledger_candidate_id": receipt.ledger_candidate_id as i64 }
    };
    candidates
        .update_one(application.id.as_doc(), update, None)
        .await
        .map_err(|e| Error::Inconsistency {
            ledger_ref: receipt.confirmation.clone(),
            detail: format!("candidate {}: {e}", application.id),
        })?;
    Ok(receipt.ledger_candidate_id)
}

enum Submitted {
    Accepted(LedgerRef),
    WalletAlreadyVoted(LedgerRef),
}

/// Submit the vote to the ledger, treating a timeout as unknown outcome:
/// re-query the wallet's status, and only if the vote is definitely not
/// recorded retry exactly once. Never re-submit blindly.
async fn submit_to_ledger(
    ledger: &dyn LedgerClient,
    ctx: &CastContext,
) -> Result<Submitted> {
    for attempt in 0..2 {
        match ledger
            .cast_vote(ctx.ledger_election_id, ctx.ledger_candidate_id, &ctx.wallet)
            .await
        {
            Ok(receipt) => return Ok(Submitted::Accepted(receipt.confirmation)),
            Err(LedgerError::AlreadyVoted) => {
                return match query_status(ledger, ctx).await? {
                    Some(ledger_ref) => Ok(Submitted::WalletAlreadyVoted(ledger_ref)),
                    // Rejected as a double vote yet no vote on record;
                    // nothing to heal and nothing to persist.
                    None => Err(Error::Conflict(
                        "ledger rejected the vote as a duplicate".to_string(),
                    )),
                };
            }
            Err(LedgerError::NotEligible) => {
                return Err(Error::Validation(
                    "wallet is not eligible according to the ledger".to_string(),
                ));
            }
            Err(LedgerError::Timeout) => {
                warn!(
                    "ledger vote timed out (attempt {attempt}), re-querying wallet status"
                );
                if let Some(ledger_ref) = query_status(ledger, ctx).await? {
                    // The vote went through before the timeout.
                    return Ok(Submitted::Accepted(ledger_ref));
                }
                // Definitely not recorded; the loop retries once.
            }
            Err(e) => return Err(Error::Ledger(e.to_string())),
        }
    }
    Err(Error::UpstreamTimeout(
        "vote submission timed out; it may still confirm, check back".to_string(),
    ))
}

async fn query_status(
    ledger: &dyn LedgerClient,
    ctx: &CastContext,
) -> Result<Option<LedgerRef>> {
    ledger
        .vote_status(ctx.ledger_election_id, &ctx.wallet)
        .await
        .map_err(|e| Error::Ledger(e.to_string()))
}

fn new_vote(ctx: &CastContext, ledger_ref: LedgerRef) -> NewVote {
    VoteCore::new(
        ctx.voter_id,
        ctx.election_id,
        ctx.candidate_id,
        ctx.ledger_candidate_id,
        ledger_ref,
    )
}

fn store_error(err: VoteStoreError) -> Error {
    match err {
        VoteStoreError::Duplicate => Error::Conflict("duplicate vote".to_string()),
        VoteStoreError::Unavailable(detail) => Error::Ledger(detail),
    }
}

fn ledger_write_error(err: LedgerError, what: &str) -> Error {
    match err {
        LedgerError::Timeout => Error::UpstreamTimeout(format!(
            "{what} timed out; retry later, the existing ledger id is re-checked first"
        )),
        e => Error::Ledger(e.to_string()),
    }
}

/// MongoDB-backed [`VoteStore`].
pub struct MongoVoteStore {
    votes: Coll<Vote>,
    new_votes: Coll<NewVote>,
}

impl MongoVoteStore {
    pub fn from_db(db: &Database) -> Self {
        Self {
            votes: Coll::from_db(db),
            new_votes: Coll::from_db(db),
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for MongoVoteStore {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let db = req.guard::<&State<Database>>().await.unwrap();
        request::Outcome::Success(Self::from_db(db))
    }
}

#[rocket::async_trait]
impl VoteStore for MongoVoteStore {
    async fn find(
        &self,
        voter_id: Id,
        election_id: Id,
    ) -> std::result::Result<Option<VoteCore>, VoteStoreError> {
        let filter = doc! { "voter_id": *voter_id, "election_id": *election_id };
        let found = self
            .votes
            .find_one(filter, None)
            .await
            .map_err(|e| VoteStoreError::Unavailable(e.to_string()))?;
        Ok(found.map(|vote| vote.vote))
    }

    async fn find_by_ref(
        &self,
        ledger_ref: &LedgerRef,
    ) -> std::result::Result<Option<VoteCore>, VoteStoreError> {
        let filter = doc! { "ledger_ref": &ledger_ref.0 };
        let found = self
            .votes
            .find_one(filter, None)
            .await
            .map_err(|e| VoteStoreError::Unavailable(e.to_string()))?;
        Ok(found.map(|vote| vote.vote))
    }

    async fn insert(&self, vote: NewVote) -> std::result::Result<(), VoteStoreError> {
        self.new_votes
            .insert_one(vote, None)
            .await
            .map(|_| ())
            .map_err(|e| {
                if is_duplicate_key_error(&e) {
                    VoteStoreError::Duplicate
                } else {
                    VoteStoreError::Unavailable(e.to_string())
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use chrono::Duration;
    use rocket::tokio;

    use crate::ledger::{
        CandidateReceipt, ElectionReceipt, LedgerElection, LedgerResult, MemoryLedger,
        VoteReceipt,
    };
    use crate::model::db::candidate::CandidateCore;
    use crate::model::db::election::{ElectionCore, ElectionTimes};
    use crate::model::db::eligibility::EligibilityCore;

    /// In-memory [`VoteStore`] with the same uniqueness semantics as the
    /// MongoDB indexes.
    #[derive(Default)]
    struct MemoryVoteStore {
        rows: Mutex<Vec<VoteCore>>,
        fail_inserts: AtomicBool,
    }

    impl MemoryVoteStore {
        fn count(&self, voter_id: Id, election_id: Id) -> usize {
            self.rows
                .lock()
                .unwrap()
                .iter()
                .filter(|v| v.voter_id == voter_id && v.election_id == election_id)
                .count()
        }
    }

    #[rocket::async_trait]
    impl VoteStore for MemoryVoteStore {
        async fn find(
            &self,
            voter_id: Id,
            election_id: Id,
        ) -> std::result::Result<Option<VoteCore>, VoteStoreError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .find(|v| v.voter_id == voter_id && v.election_id == election_id)
                .cloned())
        }

        async fn find_by_ref(
            &self,
            ledger_ref: &LedgerRef,
        ) -> std::result::Result<Option<VoteCore>, VoteStoreError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .find(|v| &v.ledger_ref == ledger_ref)
                .cloned())
        }

        async fn insert(&self, vote: NewVote) -> std::result::Result<(), VoteStoreError> {
            if self.fail_inserts.load(Ordering::SeqCst) {
                return Err(VoteStoreError::Unavailable("simulated outage".to_string()));
            }
            let mut rows = self.rows.lock().unwrap();
            let duplicate = rows.iter().any(|v| {
                (v.voter_id == vote.voter_id && v.election_id == vote.election_id)
                    || v.ledger_ref == vote.ledger_ref
            });
            if duplicate {
                return Err(VoteStoreError::Duplicate);
            }
            rows.push(vote);
            Ok(())
        }
    }

    /// Delegates to [`MemoryLedger`] but times out vote submissions.
    /// `record_before_timeout` models the worst case: the write lands but
    /// the confirmation never reaches us.
    struct TimeoutLedger {
        inner: MemoryLedger,
        record_before_timeout: bool,
        timeouts_remaining: AtomicUsize,
    }

    #[rocket::async_trait]
    impl LedgerClient for TimeoutLedger {
        async fn create_election(
            &self,
            title: &str,
            start_time: DateTime<Utc>,
            end_time: DateTime<Utc>,
        ) -> LedgerResult<ElectionReceipt> {
            self.inner.create_election(title, start_time, end_time).await
        }

        async fn register_candidate(
            &self,
            election: LedgerElectionId,
            name: &str,
        ) -> LedgerResult<CandidateReceipt> {
            self.inner.register_candidate(election, name).await
        }

        async fn cast_vote(
            &self,
            election: LedgerElectionId,
            candidate: LedgerCandidateId,
            wallet: &str,
        ) -> LedgerResult<VoteReceipt> {
            let timeouts = self.timeouts_remaining.load(Ordering::SeqCst);
            if timeouts > 0 {
                self.timeouts_remaining.store(timeouts - 1, Ordering::SeqCst);
                if self.record_before_timeout {
                    let _ = self.inner.cast_vote(election, candidate, wallet).await;
                }
                return Err(LedgerError::Timeout);
            }
            self.inner.cast_vote(election, candidate, wallet).await
        }

        async fn vote_status(
            &self,
            election: LedgerElectionId,
            wallet: &str,
        ) -> LedgerResult<Option<LedgerRef>> {
            self.inner.vote_status(election, wallet).await
        }

        async fn tally(
            &self,
            election: LedgerElectionId,
        ) -> LedgerResult<HashMap<LedgerCandidateId, u64>> {
            self.inner.tally(election).await
        }

        async fn read_election(&self, election: LedgerElectionId) -> LedgerResult<LedgerElection> {
            self.inner.read_election(election).await
        }
    }

    /// A broken ledger that fails to enforce per-wallet uniqueness, to
    /// prove the metadata unique index is a sufficient backstop.
    struct PermissiveLedger {
        refs: AtomicUsize,
    }

    #[rocket::async_trait]
    impl LedgerClient for PermissiveLedger {
        async fn create_election(
            &self,
            _title: &str,
            _start_time: DateTime<Utc>,
            _end_time: DateTime<Utc>,
        ) -> LedgerResult<ElectionReceipt> {
            unimplemented!()
        }

        async fn register_candidate(
            &self,
            _election: LedgerElectionId,
            _name: &str,
        ) -> LedgerResult<CandidateReceipt> {
            unimplemented!()
        }

        async fn cast_vote(
            &self,
            _election: LedgerElectionId,
            _candidate: LedgerCandidateId,
            _wallet: &str,
        ) -> LedgerResult<VoteReceipt> {
            let n = self.refs.fetch_add(1, Ordering::SeqCst);
            Ok(VoteReceipt {
                confirmation: LedgerRef(format!("permissive-{n}")),
            })
        }

        async fn vote_status(
            &self,
            _election: LedgerElectionId,
            _wallet: &str,
        ) -> LedgerResult<Option<LedgerRef>> {
            Ok(None)
        }

        async fn tally(
            &self,
            _election: LedgerElectionId,
        ) -> LedgerResult<HashMap<LedgerCandidateId, u64>> {
            Ok(HashMap::new())
        }

        async fn read_election(&self, _election: LedgerElectionId) -> LedgerResult<LedgerElection> {
            unimplemented!()
        }
    }

    fn active_election(ledger_id: Option<LedgerElectionId>) -> Election {
        let now = Utc::now();
        let mut core = ElectionCore::new(
            "Board election".to_string(),
            ElectionTimes {
                registration_close: now - Duration::hours(1),
                start_time: now - Duration::hours(1),
                end_time: now + Duration::hours(1),
            },
            ElectionState::Published,
        );
        core.ledger_id = ledger_id;
        Election {
            id: Id::new(),
            election: core,
        }
    }

    fn verified_profile() -> EligibilityProfile {
        let mut core = EligibilityCore::new(Id::new(), HashMap::new(), None);
        core.status = ApprovalStatus::Verified;
        EligibilityProfile {
            id: Id::new(),
            profile: core,
        }
    }

    fn verified_candidate(election_id: Id, ledger_id: LedgerCandidateId) -> CandidateApplication {
        let mut core = CandidateCore::new(
            Id::new(),
            election_id,
            "Alice".to_string(),
            String::new(),
        );
        core.status = ApprovalStatus::Verified;
        core.ledger_candidate_id = Some(ledger_id);
        CandidateApplication {
            id: Id::new(),
            application: core,
        }
    }

    /// Full fixture: an active election and verified candidate, mirrored on
    /// a real [`MemoryLedger`].
    async fn fixture(ledger: &MemoryLedger) -> (Election, CandidateApplication) {
        let now = Utc::now();
        let receipt = ledger
            .create_election("test", now - Duration::hours(1), now + Duration::hours(1))
            .await
            .unwrap();
        let candidate = ledger
            .register_candidate(receipt.ledger_election_id, "Alice")
            .await
            .unwrap();
        let election = active_election(Some(receipt.ledger_election_id));
        let application = verified_candidate(election.id, candidate.ledger_candidate_id);
        (election, application)
    }

    fn context(election: &Election, application: &CandidateApplication) -> CastContext {
        let profile = verified_profile();
        precheck_cast(
            Some(&profile),
            election,
            Some(application),
            "0xvoter",
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn precheck_order_and_messages() {
        let now = Utc::now();
        let election = active_election(Some(1));
        let application = verified_candidate(election.id, 1);
        let profile = verified_profile();

        // Missing profile aborts first, regardless of other problems.
        let err = precheck_cast(None, &election, None, "0xv", now).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        // Unverified profile.
        let mut pending = verified_profile();
        pending.profile.status = ApprovalStatus::Pending;
        let err =
            precheck_cast(Some(&pending), &election, Some(&application), "0xv", now).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        // Wallet bound to a different address.
        let mut bound = verified_profile();
        bound.profile.wallet_address = Some("0xother".to_string());
        let err =
            precheck_cast(Some(&bound), &election, Some(&application), "0xv", now).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // Election not active: checked before the candidate exists.
        let err = precheck_cast(
            Some(&profile),
            &election,
            None,
            "0xv",
            election.times.end_time + Duration::seconds(1),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        // Candidate from another election.
        let foreign = verified_candidate(Id::new(), 1);
        let err =
            precheck_cast(Some(&profile), &election, Some(&foreign), "0xv", now).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        // Candidate without a ledger twin.
        let mut unmirrored = verified_candidate(election.id, 1);
        unmirrored.application.ledger_candidate_id = None;
        let err =
            precheck_cast(Some(&profile), &election, Some(&unmirrored), "0xv", now).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        // Election never mirrored to the ledger.
        let draft = active_election(None);
        let app = verified_candidate(draft.id, 1);
        let err = precheck_cast(Some(&profile), &draft, Some(&app), "0xv", now).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        // All preconditions hold.
        let ctx = precheck_cast(Some(&profile), &election, Some(&application), "0xv", now).unwrap();
        assert!(ctx.bind_wallet);
        assert_eq!(ctx.ledger_candidate_id, 1);
    }

    #[rocket::async_test]
    async fn cast_happy_path() {
        let ledger = MemoryLedger::new();
        let store = MemoryVoteStore::default();
        let (election, application) = fixture(&ledger).await;
        let ctx = context(&election, &application);

        let outcome = cast_vote(&ledger, &store, ctx.clone()).await.unwrap();
        let ledger_ref = match outcome {
            CastOutcome::Cast { ledger_ref } => ledger_ref,
            other => panic!("expected Cast, got {other:?}"),
        };

        // Row persisted under the confirmation ref, tally incremented.
        let row = store.find_by_ref(&ledger_ref).await.unwrap().unwrap();
        assert_eq!(row.voter_id, ctx.voter_id);
        let tally = ledger.tally(ctx.ledger_election_id).await.unwrap();
        assert_eq!(tally.get(&ctx.ledger_candidate_id), Some(&1));
    }

    #[rocket::async_test]
    async fn second_cast_reports_already_voted() {
        let ledger = MemoryLedger::new();
        let store = MemoryVoteStore::default();
        let (election, application) = fixture(&ledger).await;
        let ctx = context(&election, &application);

        let first = cast_vote(&ledger, &store, ctx.clone()).await.unwrap();
        let second = cast_vote(&ledger, &store, ctx.clone()).await.unwrap();
        let (CastOutcome::Cast { ledger_ref: first_ref },
             CastOutcome::AlreadyVoted { ledger_ref: second_ref }) = (first, second)
        else {
            panic!("unexpected outcomes");
        };
        // The conflict carries the original confirmation.
        assert_eq!(first_ref, second_ref);
        assert_eq!(store.count(ctx.voter_id, ctx.election_id), 1);

        let tally = ledger.tally(ctx.ledger_election_id).await.unwrap();
        assert_eq!(tally.get(&ctx.ledger_candidate_id), Some(&1));
    }

    #[rocket::async_test]
    async fn concurrent_casts_persist_at_most_one_row() {
        let ledger = Arc::new(MemoryLedger::new());
        let store = Arc::new(MemoryVoteStore::default());
        let (election, application) = fixture(&ledger).await;
        let ctx = context(&election, &application);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let ledger = Arc::clone(&ledger);
            let store = Arc::clone(&store);
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                cast_vote(ledger.as_ref(), store.as_ref(), ctx).await
            }));
        }

        let mut casts = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                CastOutcome::Cast { .. } => casts += 1,
                CastOutcome::AlreadyVoted { .. } => {}
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert!(casts <= 1);
        assert_eq!(store.count(ctx.voter_id, ctx.election_id), 1);

        let tally = ledger.tally(ctx.ledger_election_id).await.unwrap();
        assert_eq!(tally.get(&ctx.ledger_candidate_id), Some(&1));
    }

    #[rocket::async_test]
    async fn unique_index_is_the_backstop_when_the_ledger_fails_to_reject() {
        let ledger = PermissiveLedger {
            refs: AtomicUsize::new(0),
        };
        let store = Arc::new(MemoryVoteStore::default());
        let election = active_election(Some(1));
        let application = verified_candidate(election.id, 1);
        let ctx = context(&election, &application);
        let ledger = Arc::new(ledger);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let ledger = Arc::clone(&ledger);
            let store = Arc::clone(&store);
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                cast_vote(ledger.as_ref(), store.as_ref(), ctx).await
            }));
        }
        for handle in handles {
            // Every attempt resolves to Cast or AlreadyVoted; the index
            // swallows the ledger's failure to reject.
            handle.await.unwrap().unwrap();
        }
        assert_eq!(store.count(ctx.voter_id, ctx.election_id), 1);
    }

    #[rocket::async_test]
    async fn store_outage_surfaces_recorded_on_ledger_and_reconciles_once() {
        let ledger = MemoryLedger::new();
        let store = MemoryVoteStore::default();
        let (election, application) = fixture(&ledger).await;
        let ctx = context(&election, &application);

        // Ledger accepts; metadata store is down.
        store.fail_inserts.store(true, Ordering::SeqCst);
        let outcome = cast_vote(&ledger, &store, ctx.clone()).await.unwrap();
        let ledger_ref = match outcome {
            CastOutcome::RecordedOnLedgerButNotPersisted { ledger_ref } => ledger_ref,
            other => panic!("expected RecordedOnLedgerButNotPersisted, got {other:?}"),
        };
        assert_eq!(store.count(ctx.voter_id, ctx.election_id), 0);
        // The ledger did record the vote.
        let status = ledger
            .vote_status(ctx.ledger_election_id, &ctx.wallet)
            .await
            .unwrap();
        assert_eq!(status, Some(ledger_ref.clone()));

        // Store recovers; reconciliation with the carried ref succeeds
        // exactly once even if attempted twice.
        store.fail_inserts.store(false, Ordering::SeqCst);
        let vote = new_vote(&ctx, ledger_ref.clone());
        let first = reconcile_vote(&store, vote.clone()).await.unwrap();
        assert_eq!(first, ReconcileOutcome::Inserted);
        let second = reconcile_vote(&store, vote).await.unwrap();
        assert_eq!(second, ReconcileOutcome::AlreadyPersisted);
        assert_eq!(store.count(ctx.voter_id, ctx.election_id), 1);
    }

    #[rocket::async_test]
    async fn timeout_with_recorded_vote_recovers_via_status_query() {
        let inner = MemoryLedger::new();
        let (election, application) = fixture(&inner).await;
        let ledger = TimeoutLedger {
            inner,
            record_before_timeout: true,
            timeouts_remaining: AtomicUsize::new(1),
        };
        let store = MemoryVoteStore::default();
        let ctx = context(&election, &application);

        // The submission "times out" but actually landed; the status query
        // recovers the confirmation and no second vote is submitted.
        let outcome = cast_vote(&ledger, &store, ctx.clone()).await.unwrap();
        assert!(matches!(outcome, CastOutcome::Cast { .. }));
        assert_eq!(store.count(ctx.voter_id, ctx.election_id), 1);

        let tally = ledger.tally(ctx.ledger_election_id).await.unwrap();
        assert_eq!(tally.get(&ctx.ledger_candidate_id), Some(&1));
    }

    #[rocket::async_test]
    async fn timeout_without_recorded_vote_retries_once() {
        let inner = MemoryLedger::new();
        let (election, application) = fixture(&inner).await;
        let ledger = TimeoutLedger {
            inner,
            record_before_timeout: false,
            timeouts_remaining: AtomicUsize::new(1),
        };
        let store = MemoryVoteStore::default();
        let ctx = context(&election, &application);

        let outcome = cast_vote(&ledger, &store, ctx.clone()).await.unwrap();
        assert!(matches!(outcome, CastOutcome::Cast { .. }));
        assert_eq!(store.count(ctx.voter_id, ctx.election_id), 1);
    }

    #[rocket::async_test]
    async fn repeated_timeouts_surface_pending_with_no_row() {
        let inner = MemoryLedger::new();
        let (election, application) = fixture(&inner).await;
        let ledger = TimeoutLedger {
            inner,
            record_before_timeout: false,
            timeouts_remaining: AtomicUsize::new(2),
        };
        let store = MemoryVoteStore::default();
        let ctx = context(&election, &application);

        let err = cast_vote(&ledger, &store, ctx.clone()).await.unwrap_err();
        assert!(matches!(err, Error::UpstreamTimeout(_)));
        assert_eq!(store.count(ctx.voter_id, ctx.election_id), 0);
    }

    #[rocket::async_test]
    async fn recast_for_another_candidate_never_misattributes_the_lost_vote() {
        let ledger = MemoryLedger::new();
        let store = MemoryVoteStore::default();
        let (election, first) = fixture(&ledger).await;
        let second = ledger
            .register_candidate(election.ledger_id.unwrap(), "Bob")
            .await
            .unwrap();
        let rival = verified_candidate(election.id, second.ledger_candidate_id);

        // The wallet's vote for the first candidate lost its metadata row.
        let receipt = ledger
            .cast_vote(
                election.ledger_id.unwrap(),
                first.votable().unwrap(),
                "0xvoter",
            )
            .await
            .unwrap();

        // A re-cast naming the rival reports the conflict with the original
        // ref, and no row claims the vote was for the rival.
        let ctx = context(&election, &rival);
        let outcome = cast_vote(&ledger, &store, ctx.clone()).await.unwrap();
        let CastOutcome::AlreadyVoted { ledger_ref } = outcome else {
            panic!("expected AlreadyVoted");
        };
        assert_eq!(ledger_ref, receipt.confirmation);
        assert!(store.find_by_ref(&ledger_ref).await.unwrap().is_none());
        assert_eq!(store.count(ctx.voter_id, ctx.election_id), 0);

        // Reconciliation with the true vote completes the mirror.
        let vote = VoteCore::new(
            ctx.voter_id,
            ctx.election_id,
            first.id,
            first.votable().unwrap(),
            ledger_ref.clone(),
        );
        assert_eq!(
            reconcile_vote(&store, vote).await.unwrap(),
            ReconcileOutcome::Inserted
        );
        let row = store.find_by_ref(&ledger_ref).await.unwrap().unwrap();
        assert_eq!(row.ledger_candidate_id, first.votable().unwrap());
    }

    #[rocket::async_test]
    async fn wallet_binding_after_store_outage_blocks_a_second_wallet() {
        let ledger = MemoryLedger::new();
        let store = MemoryVoteStore::default();
        let (election, application) = fixture(&ledger).await;
        let ctx = context(&election, &application);

        // The ledger accepted the vote even though the row was not written.
        store.fail_inserts.store(true, Ordering::SeqCst);
        let outcome = cast_vote(&ledger, &store, ctx.clone()).await.unwrap();
        assert!(matches!(
            outcome,
            CastOutcome::RecordedOnLedgerButNotPersisted { .. }
        ));

        // The handler records the binding on every outcome, this one
        // included; with it in place a cast from a fresh wallet fails the
        // precheck instead of reaching the ledger.
        let mut profile = verified_profile();
        profile.profile.wallet_address = Some(ctx.wallet.clone());
        let err = precheck_cast(
            Some(&profile),
            &election,
            Some(&application),
            "0xsecond",
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // Unbound, the ledger would have counted this voter twice.
        ledger
            .cast_vote(ctx.ledger_election_id, ctx.ledger_candidate_id, "0xsecond")
            .await
            .unwrap();
        let tally = ledger.tally(ctx.ledger_election_id).await.unwrap();
        assert_eq!(tally.get(&ctx.ledger_candidate_id), Some(&2));
    }
}
