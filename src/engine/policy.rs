//! Runtime policies: rule-tree policies evaluated by the engine, distinct
//! from the declarative constraints carried in a bundle.

use serde::{Deserialize, Serialize};

use crate::rules::RuleGroup;
use crate::types::Intent;

/// The effect a matched policy contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyEffect {
    Allow,
    Deny,
}

impl PolicyEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyEffect::Allow => "allow",
            PolicyEffect::Deny => "deny",
        }
    }
}

/// Preconditions narrowing which intents a policy applies to. Globs with a
/// trailing `*` are prefix matches; an empty list applies to everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConditions {
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub intent_types: Vec<String>,
}

/// Match a glob where a trailing `*` means prefix.
pub fn glob_match(pattern: &str, value: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => value.starts_with(prefix),
        None => pattern == value,
    }
}

fn any_glob(patterns: &[String], value: &str) -> bool {
    patterns.is_empty() || patterns.iter().any(|p| glob_match(p, value))
}

impl PolicyConditions {
    /// Whether the intent satisfies the preconditions. Tools count as
    /// actions, endpoints as resources.
    pub fn matches(&self, intent: &Intent) -> bool {
        let actions_ok = self.actions.is_empty()
            || intent
                .tools
                .iter()
                .any(|tool| any_glob(&self.actions, tool));
        let resources_ok = self.resources.is_empty()
            || intent
                .endpoints
                .iter()
                .any(|ep| any_glob(&self.resources, ep));
        let types_ok = any_glob(&self.intent_types, &intent.intent_type);
        actions_ok && resources_ok && types_ok
    }
}

/// A runtime policy: one rule group with an effect and a priority.
/// Lower priority numbers win ties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    pub name: String,
    pub priority: i32,
    pub effect: PolicyEffect,
    pub rules: RuleGroup,
    #[serde(default)]
    pub conditions: PolicyConditions,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// A named collection of policies returned sorted and filtered for the
/// engine.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    policies: Vec<Policy>,
}

impl PolicySet {
    pub fn new(policies: Vec<Policy>) -> Self {
        Self { policies }
    }

    pub fn push(&mut self, policy: Policy) {
        self.policies.push(policy);
    }

    /// Enabled policies sorted ascending by priority, ties broken by
    /// declared order (stable sort).
    pub fn enabled_sorted(&self) -> Vec<&Policy> {
        let mut out: Vec<&Policy> = self.policies.iter().filter(|p| p.enabled).collect();
        out.sort_by_key(|p| p.priority);
        out
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{Rule, RuleOperator};
    use crate::types::Actor;

    fn policy(id: &str, priority: i32, enabled: bool) -> Policy {
        Policy {
            id: id.to_string(),
            name: id.to_string(),
            priority,
            effect: PolicyEffect::Deny,
            rules: RuleGroup::all(vec![Rule {
                field: "intent.goal".into(),
                operator: RuleOperator::Contains,
                value: serde_json::json!("x"),
            }]),
            conditions: PolicyConditions::default(),
            enabled,
        }
    }

    #[test]
    fn glob_trailing_star_is_prefix() {
        assert!(glob_match("file_*", "file_read"));
        assert!(glob_match("*", "anything"));
        assert!(!glob_match("file_*", "web_search"));
        assert!(glob_match("file_read", "file_read"));
    }

    #[test]
    fn conditions_gate_on_tools_and_type() {
        let intent = Intent::new("t", Actor::agent("a"), "g")
            .with_tool("file_read")
            .with_intent_type("data_processing");
        let cond = PolicyConditions {
            actions: vec!["file_*".into()],
            resources: vec![],
            intent_types: vec!["data_*".into()],
        };
        assert!(cond.matches(&intent));

        let cond = PolicyConditions {
            actions: vec!["shell_*".into()],
            ..Default::default()
        };
        assert!(!cond.matches(&intent));
    }

    #[test]
    fn empty_conditions_match_everything() {
        let intent = Intent::new("t", Actor::agent("a"), "g");
        assert!(PolicyConditions::default().matches(&intent));
    }

    #[test]
    fn set_sorts_by_priority_and_drops_disabled() {
        let set = PolicySet::new(vec![
            policy("low", 50, true),
            policy("disabled", 1, false),
            policy("high", 10, true),
        ]);
        let sorted = set.enabled_sorted();
        assert_eq!(
            sorted.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
            vec!["high", "low"]
        );
    }
}
