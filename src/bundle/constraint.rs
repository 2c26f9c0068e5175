//! Constraints and obligations: the declarative halves of a BASIS bundle.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::patterns::{CompiledPattern, PatternSeverity};
use crate::rules::{Rule, RuleOperator};
use crate::trust::TrustTier;

/// Closed set of constraint kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    ToolRestriction,
    EgressWhitelist,
    EgressBlacklist,
    DataProtection,
    CapabilityGate,
    EscalationRequired,
}

impl ConstraintKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstraintKind::ToolRestriction => "tool_restriction",
            ConstraintKind::EgressWhitelist => "egress_whitelist",
            ConstraintKind::EgressBlacklist => "egress_blacklist",
            ConstraintKind::DataProtection => "data_protection",
            ConstraintKind::CapabilityGate => "capability_gate",
            ConstraintKind::EscalationRequired => "escalation_required",
        }
    }
}

/// Closed set of constraint enforcement actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintAction {
    Block,
    Warn,
    Redact,
    Mask,
}

impl ConstraintAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstraintAction::Block => "block",
            ConstraintAction::Warn => "warn",
            ConstraintAction::Redact => "redact",
            ConstraintAction::Mask => "mask",
        }
    }
}

/// Narrowing of a constraint to particular trust tiers or roles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstraintScope {
    #[serde(default)]
    pub trust_levels: Vec<TrustTier>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl ConstraintScope {
    /// Whether the constraint applies for the given tier and roles. An
    /// empty scope list means "applies to all".
    pub fn applies(&self, tier: TrustTier, roles: &[String]) -> bool {
        let tier_ok = self.trust_levels.is_empty() || self.trust_levels.contains(&tier);
        let role_ok =
            self.roles.is_empty() || self.roles.iter().any(|r| roles.iter().any(|have| have == r));
        tier_ok && role_ok
    }
}

/// A single declarative constraint from a bundle.
///
/// Data-kind constraints carry either a `named_pattern` (resolved against
/// the pattern library) or a custom `pattern`, compiled once at bundle load.
#[derive(Debug, Clone)]
pub struct Constraint {
    pub id: Option<String>,
    pub kind: ConstraintKind,
    pub action: ConstraintAction,
    pub values: Vec<String>,
    pub named_pattern: Option<String>,
    pub pattern: Option<CompiledPattern>,
    pub scope: ConstraintScope,
    pub severity: PatternSeverity,
    pub enabled: bool,
    pub message: Option<String>,
}

impl Constraint {
    /// Descriptive id used in reason codes: explicit id when present,
    /// otherwise the kind.
    pub fn label(&self) -> &str {
        self.id.as_deref().unwrap_or(self.kind.as_str())
    }
}

/// A declarative obligation: when `trigger` holds, `action` must be carried
/// out by the caller with `parameters`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Obligation {
    pub trigger: ObligationTrigger,
    pub action: String,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
}

/// A parsed trigger expression: a single comparison over intent/context
/// paths, e.g. `context.amount gte 1000`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObligationTrigger {
    pub source: String,
    pub rule: Rule,
}

impl ObligationTrigger {
    /// Parse `<field> <operator> <literal>`. The literal is JSON when it
    /// parses as JSON, otherwise a bare string.
    pub fn parse(source: &str) -> Result<Self, String> {
        let mut parts = source.splitn(3, char::is_whitespace);
        let field = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| format!("empty trigger expression: '{source}'"))?;
        let op_token = parts
            .next()
            .ok_or_else(|| format!("trigger '{source}' is missing an operator"))?;
        let literal = parts
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| format!("trigger '{source}' is missing a value"))?;

        let operator = match op_token {
            "eq" | "==" => RuleOperator::Eq,
            "ne" | "!=" => RuleOperator::Ne,
            "gt" | ">" => RuleOperator::Gt,
            "lt" | "<" => RuleOperator::Lt,
            "gte" | ">=" => RuleOperator::Gte,
            "lte" | "<=" => RuleOperator::Lte,
            "in" => RuleOperator::In,
            "contains" => RuleOperator::Contains,
            "matches" => RuleOperator::Matches,
            other => return Err(format!("unknown trigger operator '{other}'")),
        };

        let value = serde_json::from_str::<Value>(literal)
            .unwrap_or_else(|_| Value::String(literal.trim_matches('\'').to_string()));

        Ok(Self {
            source: source.to_string(),
            rule: Rule {
                field: field.to_string(),
                operator,
                value,
            },
        })
    }
}

impl TryFrom<String> for ObligationTrigger {
    type Error = String;

    fn try_from(source: String) -> Result<Self, Self::Error> {
        ObligationTrigger::parse(&source)
    }
}

impl From<ObligationTrigger> for String {
    fn from(trigger: ObligationTrigger) -> Self {
        trigger.source
    }
}
