use chrono::Utc;
use mongodb::bson::{doc, Bson};
use rocket::{serde::json::Json, Route, State};

use crate::coordinator::{self, CastOutcome, MongoVoteStore, ReconcileOutcome};
use crate::error::{Error, Result};
use crate::ledger::LedgerClient;
use crate::model::{
    api::vote::{CastRequest, ReconcileRequest},
    db::{
        candidate::CandidateApplication,
        election::Election,
        eligibility::EligibilityProfile,
        vote::VoteCore,
    },
    mongodb::{Coll, Id},
};

pub fn routes() -> Vec<Route> {
    routes![cast, reconcile]
}

/// Cast a vote in an election.
///
/// Preconditions are checked in order with no side effects; the ledger is
/// then the commit point and the metadata row mirrors it. The outcome says
/// exactly what happened, including the partial-failure case where the
/// ledger recorded the vote but the row could not be written.
#[post("/elections/<election_id>/votes", data = "<request>", format = "json")]
async fn cast(
    election_id: Id,
    request: Json<CastRequest>,
    elections: Coll<Election>,
    profiles: Coll<EligibilityProfile>,
    applications: Coll<CandidateApplication>,
    store: MongoVoteStore,
    ledger: &State<Box<dyn LedgerClient>>,
) -> Result<Json<CastOutcome>> {
    let election = elections
        .find_one(election_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("election {election_id}")))?;
    let profile = profiles
        .find_one(doc! { "identity_id": *request.voter_id }, None)
        .await?;
    let application = applications
        .find_one(request.candidate_id.as_doc(), None)
        .await?;

    let ctx = coordinator::precheck_cast(
        profile.as_ref(),
        &election,
        application.as_ref(),
        &request.wallet,
        Utc::now(),
    )?;
    let bind_wallet = ctx.bind_wallet;

    let outcome = coordinator::cast_vote(ledger.as_ref(), &store, ctx).await?;

    // Record the wallet binding: every outcome, the unpersisted-row case
    // included, means the ledger holds a vote tied to this wallet, and an
    // unbound profile could cast again from a fresh one. Filtered on the
    // unbound state so a concurrent cast cannot overwrite an existing
    // binding.
    if bind_wallet {
        let filter = doc! {
            "identity_id": *request.voter_id,
            "wallet_address": Bson::Null,
        };
        let update = doc! { "$set": { "wallet_address": &request.wallet } };
        profiles.update_one(filter, update, None).await?;
    }

    Ok(Json(outcome))
}

/// Complete the metadata mirror for a vote the ledger confirmed.
///
/// Idempotent by confirmation reference; calling it for an already-mirrored
/// vote reports `AlreadyPersisted` and changes nothing.
#[post(
    "/elections/<election_id>/votes/reconcile",
    data = "<request>",
    format = "json"
)]
async fn reconcile(
    election_id: Id,
    request: Json<ReconcileRequest>,
    applications: Coll<CandidateApplication>,
    store: MongoVoteStore,
) -> Result<Json<ReconcileOutcome>> {
    let application = applications
        .find_one(request.candidate_id.as_doc(), None)
        .await?
        .ok_or_else(|| {
            Error::not_found(format!("candidate application {}", request.candidate_id))
        })?;
    if application.election_id != election_id {
        return Err(Error::Validation(
            "candidate does not belong to this election".to_string(),
        ));
    }
    let ledger_candidate_id = application.votable().ok_or_else(|| {
        Error::Validation("candidate is not verified and registered on the ledger".to_string())
    })?;

    let vote = VoteCore::new(
        request.voter_id,
        election_id,
        request.candidate_id,
        ledger_candidate_id,
        request.0.ledger_ref,
    );
    let outcome = coordinator::reconcile_vote(&store, vote).await?;
    Ok(Json(outcome))
}
