pub mod candidate;
pub mod election;
pub mod eligibility;
pub mod vote;
