use chrono::Utc;
use mongodb::bson::doc;
use rocket::{futures::TryStreamExt, serde::json::Json, Route, State};

use crate::coordinator;
use crate::error::{Error, Result};
use crate::ledger::LedgerClient;
use crate::model::{
    api::election::{ElectionDescription, ElectionSpec},
    db::candidate::CandidateApplication,
    db::election::{Election, ElectionPhase, ElectionState, NewElection},
    mongodb::{Coll, Id},
};
use crate::results::{self, ElectionResults};

pub fn routes() -> Vec<Route> {
    routes![
        create_election,
        modify_election,
        publish_election,
        list_elections,
        get_election,
        get_results,
    ]
}

/// Create an election. The insert is always a draft; with `publish` set
/// the two-phase publication runs immediately afterwards, so a ledger
/// failure leaves a retryable draft rather than a published election
/// with no ledger twin.
#[post("/elections", data = "<spec>", format = "json")]
async fn create_election(
    spec: Json<ElectionSpec>,
    new_elections: Coll<NewElection>,
    elections: Coll<Election>,
    ledger: &State<Box<dyn LedgerClient>>,
) -> Result<Json<ElectionDescription>> {
    spec.validate()?;
    let publish = spec.0.publish;

    let election: NewElection = spec.0.into_election();
    let id: Id = new_elections
        .insert_one(&election, None)
        .await?
        .inserted_id
        .as_object_id()
        .unwrap() // Valid because the ID comes directly from the DB.
        .into();
    let election = elections.find_one(id.as_doc(), None).await?.unwrap();

    if publish {
        coordinator::publish_election(ledger.as_ref(), &elections, &election).await?;
    }
    let election = elections.find_one(id.as_doc(), None).await?.unwrap();
    Ok(Json(ElectionDescription::new(election, Utc::now())))
}

/// Modify election metadata; legal only before the start time.
#[put("/elections/<election_id>", data = "<spec>", format = "json")]
async fn modify_election(
    election_id: Id,
    spec: Json<ElectionSpec>,
    elections: Coll<Election>,
) -> Result<Json<ElectionDescription>> {
    spec.validate()?;
    let election = elections
        .find_one(election_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("election {election_id}")))?;

    let now = Utc::now();
    if !election.modifiable(now) {
        return Err(Error::Conflict(format!(
            "election {election_id} has started and is read-only"
        )));
    }

    // State and ledger id are not touched here: publication is a separate,
    // two-phase operation.
    let update = doc! {
        "$set": {
            "name": &spec.name,
            "registration_close": spec.registration_close,
            "start_time": spec.start_time,
            "end_time": spec.end_time,
        }
    };
    elections
        .update_one(election_id.as_doc(), update, None)
        .await?;

    let election = elections.find_one(election_id.as_doc(), None).await?.unwrap();
    Ok(Json(ElectionDescription::new(election, now)))
}

/// Publish an election: create its ledger twin and mirror the assigned id.
/// Idempotent, so a retry after a partial failure completes the missing
/// leg instead of creating a duplicate ledger election.
#[post("/elections/<election_id>/publish")]
async fn publish_election(
    election_id: Id,
    elections: Coll<Election>,
    ledger: &State<Box<dyn LedgerClient>>,
) -> Result<Json<ElectionDescription>> {
    let election = elections
        .find_one(election_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("election {election_id}")))?;

    coordinator::publish_election(ledger.as_ref(), &elections, &election).await?;

    let election = elections.find_one(election_id.as_doc(), None).await?.unwrap();
    Ok(Json(ElectionDescription::new(election, Utc::now())))
}

/// All published elections, with their phase derived at response time.
#[get("/elections")]
async fn list_elections(elections: Coll<Election>) -> Result<Json<Vec<ElectionDescription>>> {
    let filter = doc! { "state": ElectionState::Published };
    let list: Vec<Election> = elections.find(filter, None).await?.try_collect().await?;
    let now = Utc::now();
    Ok(Json(
        list.into_iter()
            .map(|election| ElectionDescription::new(election, now))
            .collect(),
    ))
}

#[get("/elections/<election_id>")]
async fn get_election(
    election_id: Id,
    elections: Coll<Election>,
    ledger: &State<Box<dyn LedgerClient>>,
) -> Result<Json<ElectionDescription>> {
    let election = published_election(election_id, &elections).await?;
    let description = ElectionDescription::new(election, Utc::now());

    // For completed elections, cross-check the ledger's view so drift
    // between the stores is at least observable.
    if description.phase == ElectionPhase::Completed {
        if let Some(ledger_id) = description.ledger_id {
            match ledger.read_election(ledger_id).await {
                Ok(view) if view.active => {
                    warn!("election {election_id} completed locally but still active on ledger");
                }
                Ok(_) => {}
                Err(e) => warn!("could not cross-check election {election_id} on ledger: {e}"),
            }
        }
    }
    Ok(Json(description))
}

/// Ranked results: the ledger tally merged with verified candidate
/// metadata. Computed on demand; the tally can change until (and slightly
/// after) completion, so nothing here is cached.
#[get("/elections/<election_id>/results")]
async fn get_results(
    election_id: Id,
    elections: Coll<Election>,
    candidates: Coll<CandidateApplication>,
    ledger: &State<Box<dyn LedgerClient>>,
) -> Result<Json<ElectionResults>> {
    let election = published_election(election_id, &elections).await?;
    let ledger_id = election.ledger_id.ok_or_else(|| {
        Error::Validation(format!("election {election_id} has no ledger twin yet"))
    })?;

    let tally = ledger
        .tally(ledger_id)
        .await
        .map_err(|e| Error::Ledger(e.to_string()))?;
    let verified: Vec<_> = candidates
        .find(doc! { "election_id": *election_id }, None)
        .await?
        .try_collect()
        .await?;

    Ok(Json(results::aggregate(&tally, &verified)))
}

/// A published election by id; drafts are invisible here.
async fn published_election(election_id: Id, elections: &Coll<Election>) -> Result<Election> {
    let filter = doc! {
        "_id": *election_id,
        "state": ElectionState::Published,
    };
    elections
        .find_one(filter, None)
        .await?
        .ok_or_else(|| Error::not_found(format!("election {election_id}")))
}
