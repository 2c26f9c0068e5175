//! Inference scope validation.
//!
//! Caps what an agent may infer from data. Levels order
//! Entity < Aggregate < Pattern < Attribute < Identification; a requested
//! inference exceeds scope when its level is above the lower of the global
//! cap and any per-domain cap for its source domains. PII inference and
//! derived-knowledge retention are gated separately.

use serde::{Deserialize, Serialize};

use super::credential::InferenceScope;
use super::interaction::{DerivedKnowledge, InferenceOp};
use crate::patterns;

/// How much may be concluded from source data, least to most revealing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceLevel {
    /// Facts about a single known entity.
    Entity,
    /// Statistics over groups.
    Aggregate,
    /// Recurring structures and correlations.
    Pattern,
    /// New attributes of entities not present in the source.
    Attribute,
    /// Re-identification of individuals.
    Identification,
}

impl InferenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            InferenceLevel::Entity => "entity",
            InferenceLevel::Aggregate => "aggregate",
            InferenceLevel::Pattern => "pattern",
            InferenceLevel::Attribute => "attribute",
            InferenceLevel::Identification => "identification",
        }
    }
}

/// What to do when PII shows up in derived knowledge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiHandling {
    Redact,
    #[default]
    Block,
    Warn,
}

/// Outcome of an inference-scope check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceVerdict {
    pub allowed: bool,
    pub reason: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Content rewritten by PII redaction, when handling is `redact`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redacted_content: Option<String>,
}

impl InferenceVerdict {
    fn ok() -> Self {
        Self {
            allowed: true,
            reason: None,
            warnings: Vec::new(),
            redacted_content: None,
        }
    }

    fn rejected(reason: String) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            warnings: Vec::new(),
            redacted_content: None,
        }
    }
}

/// Validator over a credential's inference-scope section.
#[derive(Debug)]
pub struct InferenceValidator<'a> {
    scope: &'a InferenceScope,
}

impl<'a> InferenceValidator<'a> {
    pub fn new(scope: &'a InferenceScope) -> Self {
        Self { scope }
    }

    /// The effective cap for an operation: the global cap lowered by any
    /// per-domain override among the source domains.
    pub fn effective_cap(&self, op: &InferenceOp) -> InferenceLevel {
        let mut cap = self.scope.max_level;
        for domain in &op.source_domains {
            if let Some(domain_cap) = self.scope.domain_overrides.get(domain) {
                cap = cap.min(*domain_cap);
            }
        }
        cap
    }

    /// Check a declared inference operation against the scope caps.
    pub fn check_op(&self, op: &InferenceOp) -> InferenceVerdict {
        let cap = self.effective_cap(op);
        if op.level > cap {
            return InferenceVerdict::rejected(format!(
                "inference_out_of_scope: requested {} exceeds cap {}",
                op.level.as_str(),
                cap.as_str()
            ));
        }
        InferenceVerdict::ok()
    }

    /// Check derived knowledge: scope, PII, and retention.
    pub fn check_derived(&self, knowledge: &DerivedKnowledge) -> InferenceVerdict {
        let scope_verdict = self.check_op(&knowledge.op);
        if !scope_verdict.allowed {
            return scope_verdict;
        }

        let mut verdict = InferenceVerdict::ok();

        if !self.scope.pii.allowed {
            let detected: Vec<&str> = patterns::all_builtin()
                .iter()
                .filter(|def| def.regex.is_match(&knowledge.content))
                .map(|def| def.id)
                .collect();
            if !detected.is_empty() {
                match self.scope.pii.handling {
                    PiiHandling::Block => {
                        return InferenceVerdict::rejected(format!(
                            "pii_in_inference: {}",
                            detected.join(",")
                        ));
                    }
                    PiiHandling::Redact => {
                        let mut content = knowledge.content.clone();
                        for id in &detected {
                            let (rewritten, _) = patterns::redact(id, &content, None);
                            content = rewritten;
                        }
                        verdict
                            .warnings
                            .push(format!("pii_in_inference redacted: {}", detected.join(",")));
                        verdict.redacted_content = Some(content);
                    }
                    PiiHandling::Warn => {
                        verdict
                            .warnings
                            .push(format!("pii_in_inference: {}", detected.join(",")));
                    }
                }
            }
        }

        if knowledge.persistent && !self.scope.retention.allow_persistent {
            return InferenceVerdict::rejected(
                "retention_violation: persistent storage not permitted".to_string(),
            );
        }
        for recipient in &knowledge.recipients {
            if !self
                .scope
                .retention
                .allowed_recipients
                .iter()
                .any(|allowed| allowed == recipient)
            {
                return InferenceVerdict::rejected(format!(
                    "retention_violation: recipient '{recipient}' not in allow-list"
                ));
            }
        }

        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::credential::{PiiPolicy, RetentionPolicy};
    use std::collections::HashMap;

    fn op(level: InferenceLevel, domains: &[&str]) -> InferenceOp {
        InferenceOp {
            level,
            source_domains: domains.iter().map(|d| d.to_string()).collect(),
            description: "test".into(),
        }
    }

    fn scope() -> InferenceScope {
        InferenceScope {
            max_level: InferenceLevel::Pattern,
            domain_overrides: HashMap::from([("medical".to_string(), InferenceLevel::Aggregate)]),
            retention: RetentionPolicy {
                allow_persistent: false,
                allowed_recipients: vec!["analyst-team".into()],
            },
            pii: PiiPolicy {
                allowed: false,
                handling: PiiHandling::Block,
            },
        }
    }

    #[test]
    fn levels_are_ordered() {
        assert!(InferenceLevel::Entity < InferenceLevel::Aggregate);
        assert!(InferenceLevel::Attribute < InferenceLevel::Identification);
    }

    #[test]
    fn global_cap_applies() {
        let scope = scope();
        let validator = InferenceValidator::new(&scope);
        assert!(validator.check_op(&op(InferenceLevel::Pattern, &[])).allowed);
        let verdict = validator.check_op(&op(InferenceLevel::Attribute, &[]));
        assert!(!verdict.allowed);
        assert!(verdict.reason.unwrap().contains("inference_out_of_scope"));
    }

    #[test]
    fn domain_override_lowers_cap() {
        let scope = scope();
        let validator = InferenceValidator::new(&scope);
        // Pattern is inside the global cap but above the medical override.
        let verdict = validator.check_op(&op(InferenceLevel::Pattern, &["medical"]));
        assert!(!verdict.allowed);
        assert!(validator
            .check_op(&op(InferenceLevel::Aggregate, &["medical"]))
            .allowed);
    }

    #[test]
    fn mixed_domains_take_the_lowest_cap() {
        let scope = scope();
        let validator = InferenceValidator::new(&scope);
        let verdict = validator.check_op(&op(InferenceLevel::Pattern, &["finance", "medical"]));
        assert!(!verdict.allowed);
    }

    fn derived(content: &str) -> DerivedKnowledge {
        DerivedKnowledge {
            op: op(InferenceLevel::Aggregate, &[]),
            content: content.to_string(),
            persistent: false,
            recipients: Vec::new(),
        }
    }

    #[test]
    fn pii_block_rejects() {
        let scope = scope();
        let validator = InferenceValidator::new(&scope);
        let verdict = validator.check_derived(&derived("subject SSN 123-45-6789"));
        assert!(!verdict.allowed);
        assert!(verdict.reason.unwrap().contains("pii_in_inference"));
    }

    #[test]
    fn pii_redact_rewrites_and_warns() {
        let mut s = scope();
        s.pii.handling = PiiHandling::Redact;
        let validator = InferenceValidator::new(&s);
        let verdict = validator.check_derived(&derived("subject SSN 123-45-6789"));
        assert!(verdict.allowed);
        assert!(!verdict.warnings.is_empty());
        assert_eq!(
            verdict.redacted_content.as_deref(),
            Some("subject SSN [REDACTED]")
        );
    }

    #[test]
    fn retention_rules_enforced() {
        let scope = scope();
        let validator = InferenceValidator::new(&scope);

        let mut persistent = derived("aggregate counts by region");
        persistent.persistent = true;
        assert!(!validator.check_derived(&persistent).allowed);

        let mut shared = derived("aggregate counts by region");
        shared.recipients = vec!["outsider".into()];
        assert!(!validator.check_derived(&shared).allowed);

        let mut allowed = derived("aggregate counts by region");
        allowed.recipients = vec!["analyst-team".into()];
        assert!(validator.check_derived(&allowed).allowed);
    }
}
