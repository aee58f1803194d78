use std::ops::Deref;

use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};
use rocket::{
    request::{self, FromRequest, Request},
    State,
};

use crate::model::db::{
    candidate::{CandidateApplication, NewCandidateApplication},
    election::{Election, NewElection},
    eligibility::{EligibilityProfile, NewEligibilityProfile},
    vote::{NewVote, Vote},
};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `derive(Clone)` would demand `T: Clone`, which we don't need.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[rocket::async_trait]
impl<'r, T> FromRequest<'r> for Coll<T>
where
    T: MongoCollection,
{
    type Error = ();

    /// Get the database connection from the managed state and wrap it in a
    /// collection.
    ///
    /// Panics iff the [`Database`] is not managed by [`rocket::Rocket`].
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let db = req.guard::<&State<Database>>().await.unwrap();
        request::Outcome::Success(Coll::from_db(db))
    }
}

// Eligibility profile collection.
const PROFILES: &str = "profiles";
impl MongoCollection for EligibilityProfile {
    const NAME: &'static str = PROFILES;
}
impl MongoCollection for NewEligibilityProfile {
    const NAME: &'static str = PROFILES;
}

// Election collection.
const ELECTIONS: &str = "elections";
impl MongoCollection for Election {
    const NAME: &'static str = ELECTIONS;
}
impl MongoCollection for NewElection {
    const NAME: &'static str = ELECTIONS;
}

// Candidate application collection.
const CANDIDATES: &str = "candidates";
impl MongoCollection for CandidateApplication {
    const NAME: &'static str = CANDIDATES;
}
impl MongoCollection for NewCandidateApplication {
    const NAME: &'static str = CANDIDATES;
}

// Vote collection.
const VOTES: &str = "votes";
impl MongoCollection for Vote {
    const NAME: &'static str = VOTES;
}
impl MongoCollection for NewVote {
    const NAME: &'static str = VOTES;
}

/// Ensure that all the required indexes exist on the given database.
///
/// The unique indexes are load-bearing: profile-per-identity,
/// application-per-identity-per-election, and vote-per-voter-per-election
/// are all enforced here, at write time, not by prior reads.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // At most one eligibility profile per identity.
    let profile_index = IndexModel::builder()
        .keys(doc! {"identity_id": 1})
        .options(unique.clone())
        .build();
    Coll::<EligibilityProfile>::from_db(db)
        .create_index(profile_index, None)
        .await?;

    // At most one application per identity per election.
    let candidate_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "identity_id": 1})
        .options(unique.clone())
        .build();
    Coll::<CandidateApplication>::from_db(db)
        .create_index(candidate_index, None)
        .await?;

    // At most one vote per voter per election: the central invariant.
    let vote_index = IndexModel::builder()
        .keys(doc! {"voter_id": 1, "election_id": 1})
        .options(unique.clone())
        .build();
    Coll::<Vote>::from_db(db)
        .create_index(vote_index, None)
        .await?;

    // Confirmation refs are unique, making reconciliation idempotent.
    let ref_index = IndexModel::builder()
        .keys(doc! {"ledger_ref": 1})
        .options(unique)
        .build();
    Coll::<Vote>::from_db(db)
        .create_index(ref_index, None)
        .await?;

    Ok(())
}
