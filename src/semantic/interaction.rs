//! The interaction model the semantic validators operate on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use super::inference::InferenceLevel;
use crate::trust::TrustTier;

/// The agent at the center of an interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Decentralized identifier. Consumed, never minted.
    pub did: String,
    pub tier: TrustTier,
    #[serde(default)]
    pub domains: BTreeSet<String>,
}

/// A message arriving at the agent, before channel classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Logical source, e.g. `operator-console` or `email-content`.
    pub source: String,
    pub content: String,
    /// Whether the transport authenticated the sender.
    #[serde(default)]
    pub authenticated: bool,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(source: impl Into<String>, content: impl Into<String>, authenticated: bool) -> Self {
        Self {
            source: source.into(),
            content: content.into(),
            authenticated,
            timestamp: Utc::now(),
        }
    }
}

/// A context item supplied by an external provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextItem {
    pub provider_id: String,
    pub content: String,
    /// Base64 HMAC-SHA256 tag over the content, when the provider signs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// One inference operation the agent declares or performed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceOp {
    pub level: InferenceLevel,
    /// Domains of the source data the inference draws on.
    #[serde(default)]
    pub source_domains: BTreeSet<String>,
    /// Short description of what is being inferred.
    pub description: String,
}

/// Knowledge the agent synthesized from source data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivedKnowledge {
    pub op: InferenceOp,
    pub content: String,
    /// Whether the agent wants to keep this past the session.
    #[serde(default)]
    pub persistent: bool,
    /// Who the knowledge would be shared with.
    #[serde(default)]
    pub recipients: Vec<String>,
}

/// The record of an executed action, validated post-action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    /// The produced output, already parsed as JSON when possible.
    pub output: Value,
    /// External endpoints the action touched or the output references.
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub derived_knowledge: Vec<DerivedKnowledge>,
}

/// A full interaction: identity, inbound message, optional instruction,
/// context items and the declared action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInteraction {
    pub agent: AgentIdentity,
    pub message: InboundMessage,
    /// Explicit instruction when distinct from the message content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    #[serde(default)]
    pub context_items: Vec<ContextItem>,
    /// Inference operations the agent declares it will perform.
    #[serde(default)]
    pub declared_inferences: Vec<InferenceOp>,
}

impl AgentInteraction {
    pub fn new(agent: AgentIdentity, message: InboundMessage) -> Self {
        Self {
            agent,
            message,
            instruction: None,
            context_items: Vec::new(),
            declared_inferences: Vec::new(),
        }
    }

    /// The text validated as the instruction: the explicit instruction when
    /// present, otherwise the message content.
    pub fn effective_instruction(&self) -> &str {
        self.instruction.as_deref().unwrap_or(&self.message.content)
    }
}
