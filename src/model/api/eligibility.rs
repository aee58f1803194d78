use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::db::eligibility::{Decision, EligibilityCore, NewEligibilityProfile};
use crate::model::mongodb::Id;

/// A voter/candidate eligibility application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilitySpec {
    /// The applying identity, issued by the auth subsystem.
    pub identity_id: Id,
    /// Self-declared KYC attributes.
    pub attributes: HashMap<String, String>,
    /// Optional up-front wallet binding; otherwise recorded on first cast.
    pub wallet_address: Option<String>,
}

impl From<EligibilitySpec> for NewEligibilityProfile {
    fn from(spec: EligibilitySpec) -> Self {
        EligibilityCore::new(spec.identity_id, spec.attributes, spec.wallet_address)
    }
}

/// An admin decision on a profile or candidate application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionSpec {
    pub decision: Decision,
    /// Required when rejecting.
    pub remarks: Option<String>,
}

/// A resubmission after rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResubmitSpec {
    pub attributes: HashMap<String, String>,
}
