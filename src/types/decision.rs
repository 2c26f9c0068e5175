//! Decision: the engine's verdict on an intent.
//!
//! Always produced, always audited. The wire shape matches the decision
//! interchange contract consumed by callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Final verdict on an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Allow,
    Deny,
    Escalate,
    Quarantine,
}

impl DecisionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionAction::Allow => "allow",
            DecisionAction::Deny => "deny",
            DecisionAction::Escalate => "escalate",
            DecisionAction::Quarantine => "quarantine",
        }
    }

    /// Only `allow` permits the caller to execute the action.
    pub fn is_permitted(&self) -> bool {
        matches!(self, DecisionAction::Allow)
    }
}

/// One rule's contribution to a matched policy, kept for auditability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedRule {
    pub field: String,
    pub operator: String,
    pub expected: Value,
    pub actual: Value,
    pub matched: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: f64,
}

/// One policy's contribution to the decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedPolicy {
    pub policy_id: String,
    pub name: String,
    pub priority: i32,
    pub matched: bool,
    pub effect: String,
    #[serde(default)]
    pub rules: Vec<MatchedRule>,
    pub duration_ms: f64,
}

/// A content modification applied on the way to an allow (e.g. redaction).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Modification {
    /// Named pattern or constraint that caused the rewrite.
    pub pattern: String,
    /// Number of spans rewritten.
    pub count: usize,
}

/// An obligation whose trigger held for this intent. Carrying it out is
/// the caller's job; the engine only decides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingObligation {
    pub action: String,
    #[serde(default)]
    pub parameters: std::collections::HashMap<String, Value>,
    /// The trigger expression that fired, for auditability.
    pub trigger: String,
}

/// The verdict returned to callers and written to the audit chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub intent_id: String,
    pub decision: DecisionAction,
    /// Stable reason code, e.g. `tool_restriction:shell_execute`.
    pub reason: String,
    /// Safe human-readable message. Evidence stays in the audit record.
    pub message: String,
    #[serde(default)]
    pub matched_policies: Vec<MatchedPolicy>,
    /// Content rewrites applied before the allow (redaction, masking).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modifications: Vec<Modification>,
    /// Obligations the caller must carry out alongside the decision.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub obligations: Vec<PendingObligation>,
    /// Sanitized content when modifications were applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sanitized_content: Option<String>,
    /// Denial code from the error taxonomy; null on allow and escalate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial_code: Option<String>,
    /// Whether a human approver must confirm before execution.
    #[serde(default)]
    pub requires_escalation: bool,
    /// Hint for routing the escalation, from the constraint parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver_hint: Option<String>,
    /// Audit record id proving this decision was durably recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_id: Option<String>,
    pub duration_ms: f64,
    pub evaluated_at: DateTime<Utc>,
}

impl Decision {
    /// Build an allow with no matched policies (default action path).
    pub fn allow(intent_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::base(intent_id, DecisionAction::Allow, reason)
    }

    /// Build a deny carrying the given reason code.
    pub fn deny(intent_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::base(intent_id, DecisionAction::Deny, reason)
    }

    fn base(intent_id: impl Into<String>, action: DecisionAction, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            intent_id: intent_id.into(),
            decision: action,
            message: reason.clone(),
            reason,
            matched_policies: Vec::new(),
            modifications: Vec::new(),
            obligations: Vec::new(),
            sanitized_content: None,
            denial_code: None,
            requires_escalation: false,
            approver_hint: None,
            proof_id: None,
            duration_ms: 0.0,
            evaluated_at: Utc::now(),
        }
    }

    pub fn permitted(&self) -> bool {
        self.decision.is_permitted()
    }
}
