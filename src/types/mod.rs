//! Shared data model for the governance pipeline.
//!
//! All types serialize to JSON with serde so they can cross the HTTP facade
//! and land in the audit store without conversion.

pub mod decision;
pub mod intent;

pub use decision::{
    Decision, DecisionAction, MatchedPolicy, MatchedRule, Modification, PendingObligation,
};
pub use intent::{Actor, ActorType, Intent};
