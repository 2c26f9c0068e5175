//! Semantic governance: five cooperating validators that gate prompts
//! flowing into an agent and outputs flowing out.
//!
//! The validators run at two invocation points. Pre-action: dual-channel
//! enforcement, instruction validation, context validation, inference scope
//! checks. Post-action: output validation, endpoint checks, derived
//! knowledge checks. [`service::SemanticGovernanceService`] orchestrates
//! both phases and caches per-agent credentials by DID.

pub mod context;
pub mod credential;
pub mod dual_channel;
pub mod inference;
pub mod injection;
pub mod instruction;
pub mod interaction;
pub mod output;
pub mod schema;
pub mod service;
pub mod signature;

pub use credential::{CredentialStore, SemanticCredential};
pub use dual_channel::{Channel, DataPlaneTreatment, DualChannelEnforcer};
pub use inference::{InferenceLevel, InferenceValidator, PiiHandling};
pub use injection::{scan_for_injection, InjectionCategory, InjectionHit};
pub use instruction::InstructionValidator;
pub use interaction::{
    ActionRecord, AgentIdentity, AgentInteraction, ContextItem, InboundMessage,
};
pub use output::OutputValidator;
pub use service::{PhaseOutcome, SemanticGovernanceService, ValidationOutcome};
