use chrono::Utc;
use mongodb::bson::{doc, to_bson};
use rocket::{futures::TryStreamExt, serde::json::Json, Route, State};

use crate::coordinator;
use crate::error::{Error, Result};
use crate::ledger::LedgerClient;
use crate::model::{
    api::{candidate::{CandidateDescription, CandidateSpec}, eligibility::DecisionSpec},
    db::{
        candidate::{CandidateApplication, NewCandidateApplication},
        election::{Election, ElectionState},
        eligibility::{ApprovalStatus, Decision, EligibilityProfile},
    },
    mongodb::{is_duplicate_key_error, Coll, Id},
};

pub fn routes() -> Vec<Route> {
    routes![apply, decide, list_for_election]
}

/// Apply as a candidate for an election. Legal only while the
/// registration window is open, and only for identities with a verified
/// eligibility profile.
#[post("/elections/<election_id>/candidates", data = "<spec>", format = "json")]
async fn apply(
    election_id: Id,
    spec: Json<CandidateSpec>,
    elections: Coll<Election>,
    profiles: Coll<EligibilityProfile>,
    new_applications: Coll<NewCandidateApplication>,
    applications: Coll<CandidateApplication>,
) -> Result<Json<CandidateDescription>> {
    let election = elections
        .find_one(election_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("election {election_id}")))?;
    if election.state != ElectionState::Published {
        return Err(Error::not_found(format!("election {election_id}")));
    }
    if !election.times.registration_open(Utc::now()) {
        return Err(Error::Validation(
            "candidate registration has closed for this election".to_string(),
        ));
    }

    let profile = profiles
        .find_one(doc! { "identity_id": *spec.identity_id }, None)
        .await?
        .ok_or_else(|| Error::not_found(format!("profile for identity {}", spec.identity_id)))?;
    if profile.status != ApprovalStatus::Verified {
        return Err(Error::Validation(format!(
            "identity {} is not verified",
            spec.identity_id
        )));
    }

    let application = spec.0.into_application(election_id);
    let result = new_applications.insert_one(&application, None).await;
    let id: Id = match result {
        Ok(inserted) => inserted
            .inserted_id
            .as_object_id()
            .unwrap() // Valid because the ID comes directly from the DB.
            .into(),
        Err(e) if is_duplicate_key_error(&e) => {
            return Err(Error::Conflict(format!(
                "identity {} has already applied to this election",
                application.identity_id
            )));
        }
        Err(e) => return Err(e.into()),
    };

    let inserted = applications.find_one(id.as_doc(), None).await?.unwrap();
    Ok(Json(inserted.into()))
}

/// Admin decision on an application. Verification triggers the second,
/// ledger leg of the registration: the ledger assigns the candidate's
/// canonical id, which is then mirrored onto the application. Repeating
/// the Verified decision after a failed leg completes the registration.
#[post("/candidates/<application_id>/decision", data = "<spec>", format = "json")]
async fn decide(
    application_id: Id,
    spec: Json<DecisionSpec>,
    applications: Coll<CandidateApplication>,
    elections: Coll<Election>,
    ledger: &State<Box<dyn LedgerClient>>,
) -> Result<Json<CandidateDescription>> {
    let mut application = applications
        .find_one(application_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("application {application_id}")))?;
    let decision = spec.0.decision;

    // A verified application whose ledger leg never completed (timeout or
    // mirror failure) is already past its metadata transition; a repeated
    // Verified decision re-runs only the registration.
    let retry_registration =
        decision == Decision::Verified && application.ledger_leg_pending();
    if !retry_registration {
        application.decide(decision, spec.0.remarks)?;
    }

    // The ledger leg needs the election's ledger twin; verifying before
    // publication would leave an unregistrable candidate.
    let ledger_election_id = if decision == Decision::Verified {
        let election = elections
            .find_one(application.election_id.as_doc(), None)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!("election {}", application.election_id))
            })?;
        Some(election.ledger_id.ok_or_else(|| {
            Error::Validation(
                "election must be published before candidates are verified".to_string(),
            )
        })?)
    } else {
        None
    };

    if !retry_registration {
        let filter = doc! {
            "_id": *application_id,
            "status": { "$ne": ApprovalStatus::Verified },
        };
        let update = doc! {
            "$set": {
                "status": application.status,
                "remarks": to_bson(&application.remarks)?,
            }
        };
        let result = applications.update_one(filter, update, None).await?;
        if result.modified_count != 1 {
            return Err(Error::Conflict(format!(
                "application {application_id} was decided concurrently"
            )));
        }
    }

    if let Some(ledger_election_id) = ledger_election_id {
        let ledger_id = coordinator::register_candidate(
            ledger.as_ref(),
            &applications,
            &application,
            ledger_election_id,
        )
        .await?;
        application.ledger_candidate_id = Some(ledger_id);
    }
    Ok(Json(application.into()))
}

/// The verified candidates for an election, as they would appear on the
/// ballot.
#[get("/elections/<election_id>/candidates")]
async fn list_for_election(
    election_id: Id,
    applications: Coll<CandidateApplication>,
) -> Result<Json<Vec<CandidateDescription>>> {
    let filter = doc! {
        "election_id": *election_id,
        "status": ApprovalStatus::Verified,
    };
    let list: Vec<CandidateApplication> =
        applications.find(filter, None).await?.try_collect().await?;
    Ok(Json(list.into_iter().map(Into::into).collect()))
}
