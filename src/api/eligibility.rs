use mongodb::bson::{doc, to_bson, Bson};
use rocket::{serde::json::Json, Route};

use crate::error::{Error, Result};
use crate::model::{
    api::eligibility::{DecisionSpec, EligibilitySpec, ResubmitSpec},
    db::eligibility::{ApprovalStatus, EligibilityProfile, NewEligibilityProfile},
    mongodb::{is_duplicate_key_error, Coll, Id},
};

pub fn routes() -> Vec<Route> {
    routes![submit, decide, resubmit, get_by_identity]
}

/// Apply for voting/candidacy eligibility. One profile per identity,
/// enforced by the unique index.
#[post("/eligibility", data = "<spec>", format = "json")]
async fn submit(
    spec: Json<EligibilitySpec>,
    new_profiles: Coll<NewEligibilityProfile>,
    profiles: Coll<EligibilityProfile>,
) -> Result<Json<EligibilityProfile>> {
    let profile: NewEligibilityProfile = spec.0.into();
    let result = new_profiles.insert_one(&profile, None).await;
    let id: Id = match result {
        Ok(inserted) => inserted
            .inserted_id
            .as_object_id()
            .unwrap() // Valid because the ID comes directly from the DB.
            .into(),
        Err(e) if is_duplicate_key_error(&e) => {
            return Err(Error::Conflict(format!(
                "identity {} already has an eligibility profile",
                profile.identity_id
            )));
        }
        Err(e) => return Err(e.into()),
    };

    let inserted = profiles.find_one(id.as_doc(), None).await?.unwrap();
    Ok(Json(inserted))
}

/// Admin decision on a profile. Rejection requires remarks; a verified
/// profile admits no further decision.
#[post("/eligibility/<profile_id>/decision", data = "<spec>", format = "json")]
async fn decide(
    profile_id: Id,
    spec: Json<DecisionSpec>,
    profiles: Coll<EligibilityProfile>,
) -> Result<Json<EligibilityProfile>> {
    let mut profile = profiles
        .find_one(profile_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("profile {profile_id}")))?;
    profile.decide(spec.0.decision, spec.0.remarks)?;

    // Filtered on the non-verified status so a concurrent decision cannot
    // downgrade a verified profile.
    let filter = doc! {
        "_id": *profile_id,
        "status": { "$ne": ApprovalStatus::Verified },
    };
    let update = doc! {
        "$set": {
            "status": profile.status,
            "remarks": to_bson(&profile.remarks)?,
        }
    };
    let result = profiles.update_one(filter, update, None).await?;
    if result.modified_count != 1 {
        return Err(Error::Conflict(format!(
            "profile {profile_id} was decided concurrently"
        )));
    }
    Ok(Json(profile))
}

/// Resubmit a rejected profile; it returns to pending on the same
/// document.
#[put("/eligibility/<profile_id>", data = "<spec>", format = "json")]
async fn resubmit(
    profile_id: Id,
    spec: Json<ResubmitSpec>,
    profiles: Coll<EligibilityProfile>,
) -> Result<Json<EligibilityProfile>> {
    let mut profile = profiles
        .find_one(profile_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("profile {profile_id}")))?;
    profile.resubmit(spec.0.attributes)?;

    let filter = doc! {
        "_id": *profile_id,
        "status": ApprovalStatus::Rejected,
    };
    let update = doc! {
        "$set": {
            "status": ApprovalStatus::Pending,
            "attributes": to_bson(&profile.attributes)?,
            "remarks": Bson::Null,
        }
    };
    let result = profiles.update_one(filter, update, None).await?;
    if result.modified_count != 1 {
        return Err(Error::Conflict(format!(
            "profile {profile_id} is no longer rejected"
        )));
    }
    Ok(Json(profile))
}

#[get("/eligibility/<identity_id>")]
async fn get_by_identity(
    identity_id: Id,
    profiles: Coll<EligibilityProfile>,
) -> Result<Json<EligibilityProfile>> {
    let profile = profiles
        .find_one(doc! { "identity_id": *identity_id }, None)
        .await?
        .ok_or_else(|| Error::not_found(format!("profile for identity {identity_id}")))?;
    Ok(Json(profile))
}
