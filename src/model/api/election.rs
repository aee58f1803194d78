use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ledger::LedgerElectionId;
use crate::model::db::election::{
    Election, ElectionCore, ElectionPhase, ElectionState, ElectionTimes, NewElection,
};
use crate::model::mongodb::Id;

/// An election specification, as submitted by an admin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionSpec {
    pub name: String,
    pub registration_close: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Publish immediately instead of creating a draft.
    #[serde(default)]
    pub publish: bool,
}

impl ElectionSpec {
    /// Reject nonsensical windows before anything is stored.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("election name is required".to_string()));
        }
        if self.end_time <= self.start_time {
            return Err(Error::Validation(
                "end time must be after start time".to_string(),
            ));
        }
        if self.registration_close > self.start_time {
            return Err(Error::Validation(
                "registration must close no later than the start time".to_string(),
            ));
        }
        Ok(())
    }

    /// Always lands as a draft, `publish` flag or not: the transition to
    /// `Published` happens in the mirror step of the two-phase publication,
    /// after the ledger create is confirmed.
    pub fn into_election(self) -> NewElection {
        ElectionCore::new(
            self.name,
            ElectionTimes {
                registration_close: self.registration_close,
                start_time: self.start_time,
                end_time: self.end_time,
            },
            ElectionState::Draft,
        )
    }
}

/// An API-friendly election description, including the phase derived at
/// response time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionDescription {
    pub id: Id,
    pub name: String,
    pub state: ElectionState,
    /// Derived from the windows at the instant of this response; never
    /// stored, never cached.
    pub phase: ElectionPhase,
    pub registration_close: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub ledger_id: Option<LedgerElectionId>,
}

impl ElectionDescription {
    pub fn new(election: Election, now: DateTime<Utc>) -> Self {
        Self {
            id: election.id,
            phase: election.phase(now),
            name: election.election.name,
            state: election.election.state,
            registration_close: election.election.times.registration_close,
            start_time: election.election.times.start_time,
            end_time: election.election.times.end_time,
            ledger_id: election.election.ledger_id,
        }
    }
}
