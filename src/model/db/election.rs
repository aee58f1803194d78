use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};

use crate::ledger::LedgerElectionId;
use crate::model::mongodb::Id;

/// Stored election visibility. Drafts are only visible to admins and never
/// reach the ledger.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElectionState {
    Draft,
    Published,
}

impl From<ElectionState> for Bson {
    fn from(state: ElectionState) -> Self {
        to_bson(&state).expect("Serialisation is infallible")
    }
}

/// The time-derived lifecycle stage of an election.
///
/// Never stored: there is no scheduler flipping flags, so a stored phase
/// could drift from reality. Recompute from the windows on every read.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElectionPhase {
    Upcoming,
    Active,
    Completed,
}

/// The temporal windows of an election.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionTimes {
    /// Last instant at which candidates may register.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub registration_close: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub end_time: DateTime<Utc>,
}

impl ElectionTimes {
    /// The phase at instant `now`: a pure function of the windows.
    pub fn phase(&self, now: DateTime<Utc>) -> ElectionPhase {
        if now < self.start_time {
            ElectionPhase::Upcoming
        } else if now <= self.end_time {
            ElectionPhase::Active
        } else {
            ElectionPhase::Completed
        }
    }

    /// Candidate registration is legal while the registration window is open
    /// and the election has not completed.
    pub fn registration_open(&self, now: DateTime<Utc>) -> bool {
        now <= self.registration_close && self.phase(now) != ElectionPhase::Completed
    }
}

/// Core election data, as stored in the database.
///
/// `ledger_id` is the seam of the two-phase creation: null until the ledger
/// create call is confirmed, after which it is the durable link to the
/// election's ledger twin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionCore {
    pub name: String,
    pub state: ElectionState,
    #[serde(flatten)]
    pub times: ElectionTimes,
    pub ledger_id: Option<LedgerElectionId>,
}

impl ElectionCore {
    pub fn new(name: String, times: ElectionTimes, state: ElectionState) -> Self {
        Self {
            name,
            state,
            times,
            ledger_id: None,
        }
    }

    pub fn phase(&self, now: DateTime<Utc>) -> ElectionPhase {
        self.times.phase(now)
    }

    /// Metadata is mutable only before the election starts.
    pub fn modifiable(&self, now: DateTime<Utc>) -> bool {
        now < self.times.start_time
    }
}

/// An election without an id, for insertion.
pub type NewElection = ElectionCore;

/// An election from the database, with its unique id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Election {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub election: ElectionCore,
}

impl Deref for Election {
    type Target = ElectionCore;

    fn deref(&self) -> &Self::Target {
        &self.election
    }
}

impl DerefMut for Election {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.election
    }
}
