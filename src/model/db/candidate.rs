use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ledger::LedgerCandidateId;
use crate::model::db::eligibility::{ApprovalStatus, Decision};
use crate::model::mongodb::Id;

/// Core candidate application data, as stored in the database.
///
/// The two-phase registration runs metadata-first: the application is
/// created and admin-verified here before the ledger leg, so ledger
/// registration cost is never paid for applications that get rejected.
/// `ledger_candidate_id` is null until that second leg is confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateCore {
    pub identity_id: Id,
    pub election_id: Id,
    /// Display name on the ballot.
    pub name: String,
    pub manifesto: String,
    pub status: ApprovalStatus,
    pub remarks: Option<String>,
    pub ledger_candidate_id: Option<LedgerCandidateId>,
}

impl CandidateCore {
    pub fn new(identity_id: Id, election_id: Id, name: String, manifesto: String) -> Self {
        Self {
            identity_id,
            election_id,
            name,
            manifesto,
            status: ApprovalStatus::Pending,
            remarks: None,
            ledger_candidate_id: None,
        }
    }

    /// Apply an admin decision; same transition rules as eligibility
    /// profiles.
    pub fn decide(&mut self, decision: Decision, remarks: Option<String>) -> Result<()> {
        if self.status == ApprovalStatus::Verified {
            return Err(Error::Conflict(
                "application is already verified and cannot be downgraded".to_string(),
            ));
        }
        match decision {
            Decision::Verified => {
                self.status = ApprovalStatus::Verified;
                self.remarks = remarks;
            }
            Decision::Rejected => {
                let remarks = remarks.filter(|r| !r.trim().is_empty()).ok_or_else(|| {
                    Error::Validation("remarks are required when rejecting".to_string())
                })?;
                self.status = ApprovalStatus::Rejected;
                self.remarks = Some(remarks);
            }
        }
        Ok(())
    }

    /// The ledger leg may only run for an application that is already
    /// metadata-verified.
    pub fn ledger_registration_allowed(&self) -> Result<()> {
        if self.status != ApprovalStatus::Verified {
            return Err(Error::Validation(format!(
                "cannot register a {:?} application on the ledger",
                self.status
            )));
        }
        Ok(())
    }

    /// Verified, but the ledger leg never completed (timeout or mirror
    /// failure). The decision endpoint re-runs registration for such an
    /// application instead of transitioning it.
    pub fn ledger_leg_pending(&self) -> bool {
        self.status == ApprovalStatus::Verified && self.ledger_candidate_id.is_none()
    }

    /// Is this candidate votable: verified with a confirmed ledger twin.
    pub fn votable(&self) -> Option<LedgerCandidateId> {
        if self.status == ApprovalStatus::Verified {
            self.ledger_candidate_id
        } else {
            None
        }
    }
}

/// An application without an id, for insertion.
pub type NewCandidateApplication = CandidateCore;

/// A candidate application from the database, with its unique id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateApplication {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub application: CandidateCore,
}

impl Deref for CandidateApplication {
    type Target = CandidateCore;

    fn deref(&self) -> &Self::Target {
        &self.application
    }
}

impl DerefMut for CandidateApplication {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.application
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn application() -> CandidateCore {
        CandidateCore::new(
            Id::new(),
            Id::new(),
            "Alice".to_string(),
            "Lower fees".to_string(),
        )
    }

    #[test]
    fn ledger_registration_requires_verification() {
        let mut app = application();
        let err = app.ledger_registration_allowed().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(app.votable(), None);

        app.decide(Decision::Rejected, Some("no manifesto".to_string()))
            .unwrap();
        let err = app.ledger_registration_allowed().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        // Rejection is not terminal; a fresh decision can verify.
        app.status = ApprovalStatus::Pending;
        app.decide(Decision::Verified, None).unwrap();
        app.ledger_registration_allowed().unwrap();

        // Verified but not yet mirrored: still not votable.
        assert_eq!(app.votable(), None);
        app.ledger_candidate_id = Some(7);
        assert_eq!(app.votable(), Some(7));
    }

    #[test]
    fn verification_retry_reruns_only_the_ledger_leg() {
        let mut app = application();
        assert!(!app.ledger_leg_pending());

        app.decide(Decision::Verified, None).unwrap();
        assert!(app.ledger_leg_pending());
        // Re-deciding a verified application conflicts; callers complete
        // the registration through the retry path instead.
        let mut again = app.clone();
        let err = again.decide(Decision::Verified, None).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        app.ledger_candidate_id = Some(4);
        assert!(!app.ledger_leg_pending());
    }
}
