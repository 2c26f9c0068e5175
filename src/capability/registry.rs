//! Built-in capability registry: the tier matrix and escalation set.
//!
//! Maps each standard capability to the minimum trust tier that may hold it
//! and marks the closed set of capabilities that always require human
//! escalation regardless of tier. Lookups walk from the most specific
//! registered prefix to the least; capabilities with no registered rule
//! default to the top tier.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use super::Capability;
use crate::trust::TrustTier;

/// One row of the tier matrix.
#[derive(Debug, Clone, Copy)]
pub struct TierRule {
    pub minimum_tier: TrustTier,
    pub requires_escalation: bool,
}

fn rule(minimum_tier: TrustTier, requires_escalation: bool) -> TierRule {
    TierRule {
        minimum_tier,
        requires_escalation,
    }
}

/// The standard taxonomy table. Keys are capability prefixes; a requested
/// capability resolves to its longest matching prefix.
static TIER_MATRIX: Lazy<HashMap<&'static str, TierRule>> = Lazy::new(|| {
    use TrustTier::*;
    HashMap::from([
        ("data:read/public", rule(Sandbox, false)),
        ("data:read/internal", rule(Provisional, false)),
        ("data:read/sensitive", rule(Trusted, false)),
        ("data:read", rule(Provisional, false)),
        ("data:write/internal", rule(Standard, false)),
        ("data:write", rule(Standard, false)),
        ("data:delete", rule(Certified, true)),
        ("file:read", rule(Provisional, false)),
        ("file:write", rule(Standard, false)),
        ("file:delete", rule(Trusted, false)),
        ("compute:execute/sandboxed", rule(Standard, false)),
        ("compute:execute/shell", rule(Certified, true)),
        ("network:egress/internal", rule(Standard, false)),
        ("network:egress/external", rule(Trusted, false)),
        ("comms:send/email", rule(Standard, false)),
        ("comms:send/notification", rule(Provisional, false)),
        ("financial:transaction/low", rule(Trusted, false)),
        ("financial:transaction/high", rule(Autonomous, true)),
        ("identity:delegation/issue", rule(Certified, true)),
        ("export:data/external", rule(Trusted, true)),
        ("system:config/read", rule(Trusted, false)),
        ("system:config/write", rule(Autonomous, true)),
    ])
});

/// Registry over the built-in tier matrix plus tenant-registered overrides.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    overrides: HashMap<String, TierRule>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tenant-specific rule. An override may lower the minimum
    /// tier of a capability but can never clear the escalation flag of a
    /// built-in escalation-required capability.
    pub fn register_override(&mut self, prefix: impl Into<String>, mut rule: TierRule) {
        let prefix = prefix.into();
        if let Some(builtin) = TIER_MATRIX.get(prefix.as_str()) {
            if builtin.requires_escalation {
                rule.requires_escalation = true;
            }
        }
        self.overrides.insert(prefix, rule);
    }

    /// Resolve the tier rule for a requested capability by longest prefix.
    pub fn rule_for(&self, requested: &Capability) -> TierRule {
        for prefix in prefix_forms(requested) {
            if let Some(rule) = self.overrides.get(prefix.as_str()) {
                return *rule;
            }
            if let Some(rule) = TIER_MATRIX.get(prefix.as_str()) {
                return *rule;
            }
        }
        // Unlisted capabilities require the top tier.
        TierRule {
            minimum_tier: TrustTier::Autonomous,
            requires_escalation: false,
        }
    }

    /// Minimum trust tier for the requested capability.
    pub fn minimum_tier(&self, requested: &Capability) -> TrustTier {
        self.rule_for(requested).minimum_tier
    }

    /// Whether the requested capability always requires escalation.
    pub fn requires_escalation(&self, requested: &Capability) -> bool {
        self.rule_for(requested).requires_escalation
    }
}

/// Prefix forms of a capability from most to least specific:
/// `ns:a/b/c`, `ns:a/b`, `ns:a`, `ns`.
fn prefix_forms(cap: &Capability) -> Vec<String> {
    let mut forms = Vec::with_capacity(cap.segments.len() + 1);
    for take in (1..=cap.segments.len()).rev() {
        forms.push(format!("{}:{}", cap.namespace, cap.segments[..take].join("/")));
    }
    forms.push(cap.namespace.clone());
    forms
}
