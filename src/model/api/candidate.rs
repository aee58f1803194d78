use serde::{Deserialize, Serialize};

use crate::ledger::LedgerCandidateId;
use crate::model::db::candidate::{CandidateApplication, CandidateCore, NewCandidateApplication};
use crate::model::db::eligibility::ApprovalStatus;
use crate::model::mongodb::Id;

/// A candidacy application for a specific election.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSpec {
    pub identity_id: Id,
    pub name: String,
    pub manifesto: String,
}

impl CandidateSpec {
    pub fn into_application(self, election_id: Id) -> NewCandidateApplication {
        CandidateCore::new(self.identity_id, election_id, self.name, self.manifesto)
    }
}

/// An API-friendly candidate description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateDescription {
    pub id: Id,
    pub election_id: Id,
    pub name: String,
    pub manifesto: String,
    pub status: ApprovalStatus,
    pub remarks: Option<String>,
    pub ledger_candidate_id: Option<LedgerCandidateId>,
}

impl From<CandidateApplication> for CandidateDescription {
    fn from(application: CandidateApplication) -> Self {
        Self {
            id: application.id,
            election_id: application.application.election_id,
            name: application.application.name,
            manifesto: application.application.manifesto,
            status: application.application.status,
            remarks: application.application.remarks,
            ledger_candidate_id: application.application.ledger_candidate_id,
        }
    }
}
