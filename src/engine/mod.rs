//! Governance engine: orchestrates bundle constraints and runtime policies
//! over one intent and merges their effects with a configurable conflict
//! resolver.
//!
//! Evaluation is a pure function of (intent, policies, bundles, options):
//! reruns yield identical decisions and identical match traces, durations
//! excepted.

pub mod policy;

pub use policy::{glob_match, Policy, PolicyConditions, PolicyEffect, PolicySet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::bundle::{Constraint, ConstraintAction, ConstraintKind, PolicyBundle};
use crate::capability::{Capability, CapabilityRegistry};
use crate::patterns;
use crate::rules::{evaluate_group, RuleTrace};
use crate::trust::{TrustProfile, TrustTier};
use crate::types::{
    DecisionAction, Intent, MatchedPolicy, MatchedRule, Modification, PendingObligation,
};

/// How effects from multiple matched policies combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    DenyOverrides,
    AllowOverrides,
    FirstMatch,
    PriorityBased,
}

impl ConflictStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::DenyOverrides => "deny-overrides",
            ConflictStrategy::AllowOverrides => "allow-overrides",
            ConflictStrategy::FirstMatch => "first-match",
            ConflictStrategy::PriorityBased => "priority-based",
        }
    }
}

impl std::str::FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deny-overrides" => Ok(ConflictStrategy::DenyOverrides),
            "allow-overrides" => Ok(ConflictStrategy::AllowOverrides),
            "first-match" => Ok(ConflictStrategy::FirstMatch),
            "priority-based" => Ok(ConflictStrategy::PriorityBased),
            other => Err(format!("unknown conflict strategy '{other}'")),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub strategy: ConflictStrategy,
    /// Applied when no policy and no constraint matched.
    pub default_action: DecisionAction,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            strategy: ConflictStrategy::DenyOverrides,
            default_action: DecisionAction::Allow,
        }
    }
}

/// The engine's verdict plus its full trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub action: DecisionAction,
    pub reason: String,
    /// True iff `action` is allow.
    pub permitted: bool,
    /// Matched policies and constraints, in evaluation order.
    pub matched_policies: Vec<MatchedPolicy>,
    #[serde(default)]
    pub modifications: Vec<Modification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sanitized_content: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub pending_obligations: Vec<PendingObligation>,
    pub requires_escalation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver_hint: Option<String>,
    pub duration_ms: f64,
    pub evaluated_at: DateTime<Utc>,
}

/// One matched effect waiting for the conflict resolver.
#[derive(Debug, Clone)]
struct Contribution {
    source: String,
    priority: i32,
    effect: PolicyEffect,
    reason: String,
    order: usize,
}

/// Constraint contributions sort ahead of any runtime policy.
const CONSTRAINT_PRIORITY: i32 = i32::MIN;

/// The governance engine. Cheap to construct; holds only configuration and
/// the capability tier matrix.
#[derive(Debug, Default)]
pub struct GovernanceEngine {
    registry: CapabilityRegistry,
    options: EngineOptions,
}

impl GovernanceEngine {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            registry: CapabilityRegistry::new(),
            options,
        }
    }

    pub fn with_registry(options: EngineOptions, registry: CapabilityRegistry) -> Self {
        Self { registry, options }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Evaluate one intent against a tenant's bundles and runtime policies.
    ///
    /// `actor` is the resolved trust profile when available; capability
    /// gates fail closed without one. `deadline` is the enclosing request's
    /// budget; exceeding it denies with reason `timeout`.
    pub fn evaluate(
        &self,
        intent: &Intent,
        policies: &PolicySet,
        bundles: &[Arc<PolicyBundle>],
        actor: Option<&TrustProfile>,
        deadline: Option<Instant>,
    ) -> EvaluationResult {
        let started = Instant::now();
        let root = intent.evaluation_root();
        let mut state = EvalState::new(intent.content.clone());

        'bundles: for bundle in bundles {
            for constraint in bundle.enabled_constraints() {
                if deadline_exceeded(deadline) {
                    return self.timeout_result(started, &state);
                }
                self.apply_constraint(bundle, constraint, intent, actor, &mut state);
                if self.options.strategy == ConflictStrategy::DenyOverrides && state.has_deny() {
                    break 'bundles;
                }
            }
        }

        // Obligations fire independently of constraint outcomes.
        for bundle in bundles {
            for obligation in &bundle.obligations {
                let mut scratch = Vec::new();
                let group = crate::rules::RuleGroup::all(vec![obligation.trigger.rule.clone()]);
                if evaluate_group(&group, &root, &mut scratch) {
                    state.obligations.push(PendingObligation {
                        action: obligation.action.clone(),
                        parameters: obligation.parameters.clone(),
                        trigger: obligation.trigger.source.clone(),
                    });
                }
            }
        }

        if !(self.options.strategy == ConflictStrategy::DenyOverrides && state.has_deny()) {
            for policy in policies.enabled_sorted() {
                if deadline_exceeded(deadline) {
                    return self.timeout_result(started, &state);
                }
                if !policy.conditions.matches(intent) {
                    continue;
                }
                let policy_started = Instant::now();
                let mut trace: Vec<RuleTrace> = Vec::new();
                let matched = evaluate_group(&policy.rules, &root, &mut trace);
                if matched {
                    state.matched.push(MatchedPolicy {
                        policy_id: policy.id.clone(),
                        name: policy.name.clone(),
                        priority: policy.priority,
                        matched: true,
                        effect: policy.effect.as_str().to_string(),
                        rules: trace
                            .into_iter()
                            .map(|t| MatchedRule {
                                field: t.field,
                                operator: t.operator,
                                expected: t.expected,
                                actual: t.actual,
                                matched: t.matched,
                                error: t.error,
                                duration_ms: t.duration_ms,
                            })
                            .collect(),
                        duration_ms: policy_started.elapsed().as_secs_f64() * 1000.0,
                    });
                    let order = state.next_order();
                    state.contributions.push(Contribution {
                        source: policy.id.clone(),
                        priority: policy.priority,
                        effect: policy.effect,
                        reason: format!("policy:{}", policy.id),
                        order,
                    });
                    if self.options.strategy == ConflictStrategy::DenyOverrides
                        && policy.effect == PolicyEffect::Deny
                    {
                        break;
                    }
                }
            }
        }

        self.combine(started, state)
    }

    fn apply_constraint(
        &self,
        bundle: &PolicyBundle,
        constraint: &Constraint,
        intent: &Intent,
        actor: Option<&TrustProfile>,
        state: &mut EvalState,
    ) {
        let tier = actor.map(|p| p.tier).unwrap_or(TrustTier::Sandbox);
        let roles = actor_roles(intent);
        if !constraint.scope.applies(tier, &roles) {
            return;
        }

        let started = Instant::now();
        match constraint.kind {
            ConstraintKind::ToolRestriction => {
                if let Some(tool) = intent
                    .tools
                    .iter()
                    .find(|t| constraint.values.iter().any(|v| glob_match(v, t)))
                {
                    let reason = format!("tool_restriction:{tool}");
                    state.constraint_hit(bundle, constraint, reason, started);
                }
            }
            ConstraintKind::EgressWhitelist => {
                if let Some(endpoint) = intent
                    .endpoints
                    .iter()
                    .find(|ep| !constraint.values.iter().any(|v| glob_match(v, ep)))
                {
                    let reason = format!("egress_whitelist:{endpoint}");
                    state.constraint_hit(bundle, constraint, reason, started);
                }
            }
            ConstraintKind::EgressBlacklist => {
                if let Some(endpoint) = intent
                    .endpoints
                    .iter()
                    .find(|ep| constraint.values.iter().any(|v| glob_match(v, ep)))
                {
                    let reason = format!("egress_blacklist:{endpoint}");
                    state.constraint_hit(bundle, constraint, reason, started);
                }
            }
            ConstraintKind::DataProtection => {
                self.apply_data_protection(bundle, constraint, state, started);
            }
            ConstraintKind::CapabilityGate => {
                self.apply_capability_gate(bundle, constraint, actor, state, started);
            }
            ConstraintKind::EscalationRequired => {
                state.escalate = true;
                if state.approver_hint.is_none() {
                    state.approver_hint = constraint
                        .values
                        .first()
                        .cloned()
                        .or_else(|| constraint.message.clone());
                }
                state.matched.push(constraint_entry(
                    bundle,
                    constraint,
                    "escalation_required".to_string(),
                    started,
                ));
            }
        }
    }

    fn apply_data_protection(
        &self,
        bundle: &PolicyBundle,
        constraint: &Constraint,
        state: &mut EvalState,
        started: Instant,
    ) {
        let content = match state.content.clone() {
            Some(c) => c,
            None => return,
        };

        let (pattern_id, hits) = if let Some(name) = &constraint.named_pattern {
            (name.clone(), patterns::find(name, &content).len())
        } else if let Some(custom) = &constraint.pattern {
            (custom.id.clone(), custom.find(&content).len())
        } else {
            log::warn!(
                "data_protection constraint in bundle {} has no pattern; skipping",
                bundle.policy_id
            );
            return;
        };
        if hits == 0 {
            return;
        }

        match constraint.action {
            ConstraintAction::Block => {
                let reason = format!("data_protection:{pattern_id}");
                state.constraint_hit(bundle, constraint, reason, started);
            }
            ConstraintAction::Warn => {
                state.warnings.push(format!(
                    "data_protection:{pattern_id} matched {hits} span(s)"
                ));
                state
                    .matched
                    .push(constraint_entry(bundle, constraint, format!("data_protection:{pattern_id}"), started));
            }
            ConstraintAction::Redact => {
                let (rewritten, count) = if let Some(name) = &constraint.named_pattern {
                    patterns::redact(name, &content, None)
                } else if let Some(custom) = &constraint.pattern {
                    custom.redact(&content, None)
                } else {
                    (content.clone(), 0)
                };
                state.content = Some(rewritten);
                state.modified = true;
                state.modifications.push(Modification {
                    pattern: pattern_id.clone(),
                    count,
                });
                state
                    .matched
                    .push(constraint_entry(bundle, constraint, format!("data_protection:{pattern_id}"), started));
            }
            ConstraintAction::Mask => {
                let rewritten = if let Some(name) = &constraint.named_pattern {
                    patterns::mask(name, &content, 4)
                } else {
                    content.clone()
                };
                state.content = Some(rewritten);
                state.modified = true;
                state.modifications.push(Modification {
                    pattern: pattern_id.clone(),
                    count: hits,
                });
                state
                    .matched
                    .push(constraint_entry(bundle, constraint, format!("data_protection:{pattern_id}"), started));
            }
        }
    }

    fn apply_capability_gate(
        &self,
        bundle: &PolicyBundle,
        constraint: &Constraint,
        actor: Option<&TrustProfile>,
        state: &mut EvalState,
        started: Instant,
    ) {
        for raw in &constraint.values {
            let requested = match Capability::parse(raw) {
                Ok(cap) => cap,
                Err(e) => {
                    log::warn!("capability gate in bundle {} skipped: {e}", bundle.policy_id);
                    continue;
                }
            };

            // Escalation-required capabilities route to a human regardless
            // of tier or grants.
            if self.registry.requires_escalation(&requested) {
                state.escalate = true;
                state.escalate_reason = Some("capability_requires_escalation".to_string());
                state.matched.push(constraint_entry(
                    bundle,
                    constraint,
                    format!("capability_requires_escalation:{requested}"),
                    started,
                ));
                continue;
            }

            let minimum = self.registry.minimum_tier(&requested);
            let granted = match actor {
                Some(profile) => {
                    profile.tier >= minimum
                        && crate::capability::matches(&profile.granted_capabilities, &requested)
                }
                None => false,
            };
            if !granted {
                let reason = format!("insufficient_capability:{requested}");
                state.constraint_hit(bundle, constraint, reason, started);
            }
        }
    }

    fn combine(&self, started: Instant, state: EvalState) -> EvaluationResult {
        let EvalState {
            contributions,
            matched,
            modifications,
            warnings,
            obligations,
            escalate,
            escalate_reason,
            approver_hint,
            content,
            modified,
            ..
        } = state;

        let winner: Option<&Contribution> = match self.options.strategy {
            ConflictStrategy::DenyOverrides => contributions
                .iter()
                .find(|c| c.effect == PolicyEffect::Deny)
                .or_else(|| contributions.first()),
            ConflictStrategy::AllowOverrides => contributions
                .iter()
                .find(|c| c.effect == PolicyEffect::Allow)
                .or_else(|| contributions.first()),
            // Contributions accumulate in sort order, so first-match is
            // literally the first one recorded.
            ConflictStrategy::FirstMatch => contributions.first(),
            ConflictStrategy::PriorityBased => contributions
                .iter()
                .min_by_key(|c| (c.priority, c.order)),
        };

        if let Some(c) = winner {
            log::debug!("winning contribution from {} ({})", c.source, c.reason);
        }

        let (mut action, mut reason) = match winner {
            Some(c) => match c.effect {
                PolicyEffect::Allow => (DecisionAction::Allow, c.reason.clone()),
                PolicyEffect::Deny => (DecisionAction::Deny, c.reason.clone()),
            },
            None => (
                self.options.default_action,
                format!("default_action:{}", self.options.default_action.as_str()),
            ),
        };

        // A matched escalation trigger converts allow to escalate, never
        // deny to allow.
        let mut requires_escalation = false;
        if escalate && action == DecisionAction::Allow {
            action = DecisionAction::Escalate;
            requires_escalation = true;
            reason = escalate_reason.unwrap_or_else(|| "escalation_required".to_string());
        }

        EvaluationResult {
            permitted: action.is_permitted(),
            action,
            reason,
            matched_policies: matched,
            modifications,
            sanitized_content: if modified { content } else { None },
            warnings,
            pending_obligations: obligations,
            requires_escalation,
            approver_hint,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
            evaluated_at: Utc::now(),
        }
    }

    fn timeout_result(&self, started: Instant, state: &EvalState) -> EvaluationResult {
        EvaluationResult {
            action: DecisionAction::Deny,
            reason: "timeout".to_string(),
            permitted: false,
            matched_policies: state.matched.clone(),
            modifications: Vec::new(),
            sanitized_content: None,
            warnings: state.warnings.clone(),
            pending_obligations: Vec::new(),
            requires_escalation: false,
            approver_hint: None,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
            evaluated_at: Utc::now(),
        }
    }
}

/// Mutable evaluation scratchpad.
struct EvalState {
    contributions: Vec<Contribution>,
    matched: Vec<MatchedPolicy>,
    modifications: Vec<Modification>,
    warnings: Vec<String>,
    obligations: Vec<PendingObligation>,
    escalate: bool,
    escalate_reason: Option<String>,
    approver_hint: Option<String>,
    content: Option<String>,
    modified: bool,
    order: usize,
}

impl EvalState {
    fn new(content: Option<String>) -> Self {
        Self {
            contributions: Vec::new(),
            matched: Vec::new(),
            modifications: Vec::new(),
            warnings: Vec::new(),
            obligations: Vec::new(),
            escalate: false,
            escalate_reason: None,
            approver_hint: None,
            content,
            modified: false,
            order: 0,
        }
    }

    fn next_order(&mut self) -> usize {
        self.order += 1;
        self.order
    }

    fn has_deny(&self) -> bool {
        self.contributions
            .iter()
            .any(|c| c.effect == PolicyEffect::Deny)
    }

    /// Record a violated blocking-or-warning constraint.
    fn constraint_hit(
        &mut self,
        bundle: &PolicyBundle,
        constraint: &Constraint,
        reason: String,
        started: Instant,
    ) {
        self.matched
            .push(constraint_entry(bundle, constraint, reason.clone(), started));
        match constraint.action {
            ConstraintAction::Block => {
                let order = self.next_order();
                self.contributions.push(Contribution {
                    source: format!("{}:{}", bundle.policy_id, constraint.label()),
                    priority: CONSTRAINT_PRIORITY,
                    effect: PolicyEffect::Deny,
                    reason,
                    order,
                });
            }
            _ => self.warnings.push(reason),
        }
    }
}

fn constraint_entry(
    bundle: &PolicyBundle,
    constraint: &Constraint,
    reason: String,
    started: Instant,
) -> MatchedPolicy {
    MatchedPolicy {
        policy_id: bundle.policy_id.clone(),
        name: format!("{} ({reason})", constraint.label()),
        priority: CONSTRAINT_PRIORITY,
        matched: true,
        effect: constraint.action.as_str().to_string(),
        rules: Vec::new(),
        duration_ms: started.elapsed().as_secs_f64() * 1000.0,
    }
}

fn actor_roles(intent: &Intent) -> Vec<String> {
    intent
        .context
        .get("roles")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn deadline_exceeded(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::parse;
    use crate::rules::{Rule, RuleGroup, RuleOperator};
    use crate::types::Actor;
    use serde_json::json;

    fn bundle(yaml: &str) -> Arc<PolicyBundle> {
        Arc::new(parse(yaml.as_bytes(), None).unwrap())
    }

    fn restriction_bundle() -> Arc<PolicyBundle> {
        bundle(
            r#"
basis_version: "1.0"
policy_id: shell-guard
metadata:
  name: Shell guard
  version: 1.0.0
  created_at: 2026-01-01T00:00:00Z
constraints:
  - type: tool_restriction
    action: block
    values: [shell_execute, file_delete]
"#,
        )
    }

    fn engine() -> GovernanceEngine {
        GovernanceEngine::new(EngineOptions::default())
    }

    #[test]
    fn baseline_allow_with_no_matches() {
        let intent = Intent::new("t", Actor::agent("a"), "Read a file").with_tool("file_read");
        let result = engine().evaluate(
            &intent,
            &PolicySet::default(),
            &[restriction_bundle()],
            None,
            None,
        );
        assert_eq!(result.action, DecisionAction::Allow);
        assert!(result.permitted);
        assert!(result.matched_policies.is_empty());
    }

    #[test]
    fn tool_restriction_denies_with_reason() {
        let intent =
            Intent::new("t", Actor::agent("a"), "Execute shell command").with_tool("shell_execute");
        let result = engine().evaluate(
            &intent,
            &PolicySet::default(),
            &[restriction_bundle()],
            None,
            None,
        );
        assert_eq!(result.action, DecisionAction::Deny);
        assert_eq!(result.reason, "tool_restriction:shell_execute");
        assert!(!result.permitted);
    }

    #[test]
    fn data_protection_redacts_then_allows() {
        let b = bundle(
            r#"
basis_version: "1.0"
policy_id: pii-guard
metadata:
  name: PII guard
  version: 1.0.0
  created_at: 2026-01-01T00:00:00Z
constraints:
  - type: data_protection
    action: redact
    named_pattern: ssn_us
"#,
        );
        let intent = Intent::new("t", Actor::agent("a"), "Process user data")
            .with_content("User SSN is 123-45-6789");
        let result = engine().evaluate(&intent, &PolicySet::default(), &[b], None, None);
        assert_eq!(result.action, DecisionAction::Allow);
        assert_eq!(result.modifications.len(), 1);
        assert_eq!(result.modifications[0].pattern, "ssn_us");
        assert_eq!(result.modifications[0].count, 1);
        assert_eq!(
            result.sanitized_content.as_deref(),
            Some("User SSN is [REDACTED]")
        );
    }

    #[test]
    fn capability_gate_escalates_for_escalation_set() {
        let b = bundle(
            r#"
basis_version: "1.0"
policy_id: finance-gate
metadata:
  name: Finance gate
  version: 1.0.0
  created_at: 2026-01-01T00:00:00Z
constraints:
  - type: capability_gate
    action: block
    values: ["financial:transaction/high"]
"#,
        );
        let profile = TrustProfile::new("agent-1", "t", 600);
        let intent = Intent::new("t", Actor::agent("agent-1"), "Transfer funds");
        let result = engine().evaluate(&intent, &PolicySet::default(), &[b], Some(&profile), None);
        assert_eq!(result.action, DecisionAction::Escalate);
        assert!(result.requires_escalation);
        assert_eq!(result.reason, "capability_requires_escalation");
    }

    #[test]
    fn capability_gate_denies_without_grant() {
        let b = bundle(
            r#"
basis_version: "1.0"
policy_id: data-gate
metadata:
  name: Data gate
  version: 1.0.0
  created_at: 2026-01-01T00:00:00Z
constraints:
  - type: capability_gate
    action: block
    values: ["data:read/sensitive"]
"#,
        );
        // Tier is high enough but the grant is missing.
        let profile = TrustProfile::new("agent-1", "t", 600);
        let intent = Intent::new("t", Actor::agent("agent-1"), "Read records");
        let result = engine().evaluate(&intent, &PolicySet::default(), &[b.clone()], Some(&profile), None);
        assert_eq!(result.action, DecisionAction::Deny);
        assert!(result.reason.starts_with("insufficient_capability:"));

        // With a wildcard grant the gate passes.
        let profile =
            profile.with_capability(Capability::parse("data:read/*").unwrap());
        let result = engine().evaluate(&intent, &PolicySet::default(), &[b], Some(&profile), None);
        assert_eq!(result.action, DecisionAction::Allow);
    }

    #[test]
    fn escalation_required_converts_allow_not_deny() {
        let escalation = bundle(
            r#"
basis_version: "1.0"
policy_id: approval-gate
metadata:
  name: Approval gate
  version: 1.0.0
  created_at: 2026-01-01T00:00:00Z
constraints:
  - type: escalation_required
    action: warn
    values: [security-team]
"#,
        );
        let intent = Intent::new("t", Actor::agent("a"), "Deploy change");
        let result = engine().evaluate(
            &intent,
            &PolicySet::default(),
            &[escalation.clone()],
            None,
            None,
        );
        assert_eq!(result.action, DecisionAction::Escalate);
        assert_eq!(result.approver_hint.as_deref(), Some("security-team"));

        // With a deny in play, deny wins.
        let intent = intent.with_tool("shell_execute");
        let result = engine().evaluate(
            &intent,
            &PolicySet::default(),
            &[restriction_bundle(), escalation],
            None,
            None,
        );
        assert_eq!(result.action, DecisionAction::Deny);
    }

    #[test]
    fn obligations_fire_on_trigger() {
        let b = bundle(
            r#"
basis_version: "1.0"
policy_id: spend-watch
metadata:
  name: Spend watch
  version: 1.0.0
  created_at: 2026-01-01T00:00:00Z
obligations:
  - trigger: context.amount gte 1000
    action: notify_owner
    parameters:
      channel: approvals
"#,
        );
        let intent = Intent::new("t", Actor::agent("a"), "Pay invoice")
            .with_context("amount", json!(2500));
        let result = engine().evaluate(&intent, &PolicySet::default(), &[b.clone()], None, None);
        assert_eq!(result.pending_obligations.len(), 1);
        assert_eq!(result.pending_obligations[0].action, "notify_owner");

        let cheap = Intent::new("t", Actor::agent("a"), "Pay invoice")
            .with_context("amount", json!(5));
        let result = engine().evaluate(&cheap, &PolicySet::default(), &[b], None, None);
        assert!(result.pending_obligations.is_empty());
    }

    fn allow_policy(id: &str, priority: i32) -> Policy {
        Policy {
            id: id.into(),
            name: id.into(),
            priority,
            effect: PolicyEffect::Allow,
            rules: RuleGroup::all(vec![Rule {
                field: "intent.goal".into(),
                operator: RuleOperator::Contains,
                value: json!("deploy"),
            }]),
            conditions: PolicyConditions::default(),
            enabled: true,
        }
    }

    fn deny_policy(id: &str, priority: i32) -> Policy {
        Policy {
            effect: PolicyEffect::Deny,
            ..allow_policy(id, priority)
        }
    }

    #[test]
    fn strategies_combine_as_specified() {
        let intent = Intent::new("t", Actor::agent("a"), "deploy the release");
        let set = PolicySet::new(vec![deny_policy("deny-1", 20), allow_policy("allow-1", 10)]);

        let run = |strategy| {
            let engine = GovernanceEngine::new(EngineOptions {
                strategy,
                default_action: DecisionAction::Allow,
            });
            engine
                .evaluate(&intent, &set, &[], None, None)
                .action
        };

        assert_eq!(run(ConflictStrategy::DenyOverrides), DecisionAction::Deny);
        assert_eq!(run(ConflictStrategy::AllowOverrides), DecisionAction::Allow);
        // Sorted by priority: allow-1 (10) evaluates first.
        assert_eq!(run(ConflictStrategy::FirstMatch), DecisionAction::Allow);
        assert_eq!(run(ConflictStrategy::PriorityBased), DecisionAction::Allow);
    }

    #[test]
    fn default_action_applies_when_nothing_matches() {
        let intent = Intent::new("t", Actor::agent("a"), "idle");
        let engine = GovernanceEngine::new(EngineOptions {
            strategy: ConflictStrategy::DenyOverrides,
            default_action: DecisionAction::Deny,
        });
        let result = engine.evaluate(&intent, &PolicySet::default(), &[], None, None);
        assert_eq!(result.action, DecisionAction::Deny);
        assert_eq!(result.reason, "default_action:deny");
    }

    #[test]
    fn disabled_policy_contributes_nothing() {
        let intent = Intent::new("t", Actor::agent("a"), "deploy the release");
        let mut disabled = deny_policy("deny-1", 1);
        disabled.enabled = false;
        let set = PolicySet::new(vec![disabled]);
        let result = engine().evaluate(&intent, &set, &[], None, None);
        assert_eq!(result.action, DecisionAction::Allow);
        assert!(result.matched_policies.is_empty());
    }

    #[test]
    fn evaluation_is_deterministic_across_runs() {
        let intent = Intent::new("t", Actor::agent("a"), "deploy the release")
            .with_tool("shell_execute");
        let set = PolicySet::new(vec![deny_policy("deny-1", 20), allow_policy("allow-1", 10)]);
        let bundles = [restriction_bundle()];

        let a = engine().evaluate(&intent, &set, &bundles, None, None);
        let b = engine().evaluate(&intent, &set, &bundles, None, None);
        assert_eq!(a.action, b.action);
        assert_eq!(a.reason, b.reason);
        let ids = |r: &EvaluationResult| {
            r.matched_policies
                .iter()
                .map(|m| (m.policy_id.clone(), m.matched))
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&a), ids(&b));
    }

    #[test]
    fn expired_deadline_denies_with_timeout() {
        let intent =
            Intent::new("t", Actor::agent("a"), "Execute shell").with_tool("shell_execute");
        let past = Instant::now() - std::time::Duration::from_millis(10);
        let result = engine().evaluate(
            &intent,
            &PolicySet::default(),
            &[restriction_bundle()],
            None,
            Some(past),
        );
        assert_eq!(result.action, DecisionAction::Deny);
        assert_eq!(result.reason, "timeout");
    }
}
