use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::mongodb::Id;

/// Approval lifecycle shared by eligibility profiles and candidate
/// applications.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStatus {
    /// Awaiting an admin decision.
    Pending,
    /// Approved. No downgrade exists; rights are kept for this scope.
    Verified,
    /// Rejected. The owner may resubmit, which returns to `Pending`.
    Rejected,
}

impl From<ApprovalStatus> for Bson {
    fn from(status: ApprovalStatus) -> Self {
        to_bson(&status).expect("Serialisation is infallible")
    }
}

/// An admin's decision on a pending profile or application.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Verified,
    Rejected,
}

/// Core eligibility profile data, as stored in the database.
///
/// At most one profile exists per identity (unique index on `identity_id`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityCore {
    /// The identity this profile belongs to. Owned by the auth subsystem;
    /// referenced, never mutated, here.
    pub identity_id: Id,
    /// Self-declared KYC attributes.
    pub attributes: HashMap<String, String>,
    /// The ledger wallet bound to this identity. Immutable once first
    /// recorded: one identity, one wallet, so votes cannot be laundered
    /// across profiles.
    pub wallet_address: Option<String>,
    pub status: ApprovalStatus,
    /// Admin remarks; required when rejecting.
    pub remarks: Option<String>,
}

impl EligibilityCore {
    pub fn new(
        identity_id: Id,
        attributes: HashMap<String, String>,
        wallet_address: Option<String>,
    ) -> Self {
        Self {
            identity_id,
            attributes,
            wallet_address,
            status: ApprovalStatus::Pending,
            remarks: None,
        }
    }

    /// Apply an admin decision. A `Verified` profile admits no further
    /// transition; rejection requires non-empty remarks.
    pub fn decide(&mut self, decision: Decision, remarks: Option<String>) -> Result<()> {
        if self.status == ApprovalStatus::Verified {
            return Err(Error::Conflict(
                "profile is already verified and cannot be downgraded".to_string(),
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

    /// Resubmit after rejection. Returns to `Pending` on the same profile;
    /// only legal from `Rejected`.
    pub fn resubmit(&mut self, attributes: HashMap<String, String>) -> Result<()> {
        if self.status != ApprovalStatus::Rejected {
            return Err(Error::Conflict(format!(
                "cannot resubmit a profile in state {:?}",
                self.status
            )));
        }
        self.attributes = attributes;
        self.status = ApprovalStatus::Pending;
        self.remarks = None;
        Ok(())
    }

    /// Check a wallet offered at vote time against the recorded binding.
    /// A profile with no recorded wallet accepts any wallet (recorded on
    /// first successful cast); a recorded wallet must match exactly.
    pub fn check_wallet(&self, wallet: &str) -> Result<()> {
        match &self.wallet_address {
            Some(bound) if bound != wallet => Err(Error::Conflict(format!(
                "identity {} is bound to a different wallet",
                self.identity_id
            ))),
            _ => Ok(()),
        }
    }
}

/// A profile without an id, for insertion.
pub type NewEligibilityProfile = EligibilityCore;

/// An eligibility profile from the database, with its unique id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityProfile {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub profile: EligibilityCore,
}

impl Deref for EligibilityProfile {
    type Target = EligibilityCore;

    fn deref(&self) -> &Self::Target {
        &self.profile
    }
}

impl DerefMut for EligibilityProfile {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.profile
    }
}
