//! Orchestration of the five semantic validators.
//!
//! `pre_action_check` runs dual-channel enforcement, instruction
//! validation, context validation and inference-scope checks in that
//! order, short-circuiting on the first failure. `post_action_check` runs
//! output validation, endpoint checks and derived-knowledge checks.
//! Every validator runs under the phase budget; exceeding it denies with
//! reason `timeout`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::context::ContextValidator;
use super::credential::{CredentialStore, SemanticCredential};
use super::dual_channel::{Channel, DualChannelEnforcer};
use super::inference::InferenceValidator;
use super::instruction::InstructionValidator;
use super::interaction::{ActionRecord, AgentInteraction};
use super::output::OutputValidator;
use crate::types::Modification;

/// Validator time budgets. Exceeding a per-validator budget or the phase
/// hard cap is a deny with reason `timeout`.
#[derive(Debug, Clone)]
pub struct ValidatorBudgets {
    pub pre_per_validator: Duration,
    pub pre_hard_cap: Duration,
    pub post_per_validator: Duration,
    pub post_hard_cap: Duration,
}

impl Default for ValidatorBudgets {
    fn default() -> Self {
        Self {
            pre_per_validator: Duration::from_millis(100),
            pre_hard_cap: Duration::from_millis(500),
            post_per_validator: Duration::from_millis(200),
            post_hard_cap: Duration::from_secs(2),
        }
    }
}

/// The outcome of one validation phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseOutcome {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Channel classification, present for the pre-action phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    /// Message content after dual-channel sanitization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sanitized_message: Option<String>,
    /// Output after redaction, produced on warnings in the post phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sanitized_output: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modifications: Vec<Modification>,
    pub duration_ms: f64,
}

impl PhaseOutcome {
    fn denied(reason: impl Into<String>, started: Instant) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            warnings: Vec::new(),
            channel: None,
            sanitized_message: None,
            sanitized_output: None,
            modifications: Vec::new(),
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }
}

/// Combined result of both phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub pre: PhaseOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post: Option<PhaseOutcome>,
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub duration_ms: f64,
}

/// The semantic governance service. Credentials are cached by DID and
/// evicted on revocation events.
#[derive(Debug, Default)]
pub struct SemanticGovernanceService {
    credentials: CredentialStore,
    budgets: ValidatorBudgets,
}

impl SemanticGovernanceService {
    pub fn new() -> Self {
        Self {
            credentials: CredentialStore::new(),
            budgets: ValidatorBudgets::default(),
        }
    }

    pub fn with_budgets(budgets: ValidatorBudgets) -> Self {
        Self {
            credentials: CredentialStore::new(),
            budgets,
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Handle a revocation event: evict the affected DIDs from the cache.
    pub fn on_revocation<'a>(&self, dids: impl IntoIterator<Item = &'a str>) {
        self.credentials.invalidate_many(dids);
    }

    fn credential_for(&self, did: &str) -> Option<Arc<SemanticCredential>> {
        self.credentials.get(did)
    }

    /// Pre-action gate. Order: channel enforcement, instruction, context
    /// items, declared inference ops. First failure short-circuits.
    pub fn pre_action_check(&self, interaction: &AgentInteraction) -> PhaseOutcome {
        let started = Instant::now();
        let credential = match self.credential_for(&interaction.agent.did) {
            Some(c) => c,
            None => {
                return PhaseOutcome::denied(
                    format!("config_error: no credential for {}", interaction.agent.did),
                    started,
                );
            }
        };

        let mut warnings = Vec::new();
        let mut sanitized_message = None;

        // Validator 1: dual-channel enforcement.
        let step = Instant::now();
        let enforcer = DualChannelEnforcer::new(&credential.dual_channel);
        let enforcement = enforcer.enforce(&interaction.message);
        let channel = enforcement.channel;
        if !enforcement.allowed {
            let mut outcome = PhaseOutcome::denied(
                enforcement
                    .warnings
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "channel_violation".to_string()),
                started,
            );
            outcome.channel = Some(channel);
            return outcome;
        }
        warnings.extend(enforcement.warnings);
        if enforcement.content != interaction.message.content {
            sanitized_message = Some(enforcement.content);
        }
        if let Some(outcome) = self.over_budget(step, started, Phase::Pre, channel) {
            return outcome;
        }

        // Validator 2: instruction integrity. A data-plane message with no
        // explicit instruction carries nothing to validate.
        let step = Instant::now();
        let needs_instruction =
            interaction.instruction.is_some() || channel == Channel::Control;
        if needs_instruction {
            let validator = InstructionValidator::new(&credential.instruction_integrity);
            let verdict = validator.validate(
                interaction.effective_instruction(),
                &interaction.message.source,
                None,
            );
            if !verdict.valid {
                let mut outcome = PhaseOutcome::denied(
                    format!("instruction_not_approved:{}", verdict.computed_hash),
                    started,
                );
                outcome.channel = Some(channel);
                return outcome;
            }
        }
        if let Some(outcome) = self.over_budget(step, started, Phase::Pre, channel) {
            return outcome;
        }

        // Validator 3: context items.
        let step = Instant::now();
        let context_validator = ContextValidator::new(&credential.context_authentication);
        for item in &interaction.context_items {
            let verdict = context_validator.validate_item(item);
            if !verdict.valid {
                let mut outcome = PhaseOutcome::denied(
                    verdict
                        .reason
                        .unwrap_or_else(|| "context_untrusted".to_string()),
                    started,
                );
                outcome.channel = Some(channel);
                return outcome;
            }
        }
        if let Some(outcome) = self.over_budget(step, started, Phase::Pre, channel) {
            return outcome;
        }

        // Validator 4: declared inference operations.
        let step = Instant::now();
        let inference_validator = InferenceValidator::new(&credential.inference_scope);
        for op in &interaction.declared_inferences {
            let verdict = inference_validator.check_op(op);
            if !verdict.allowed {
                let mut outcome = PhaseOutcome::denied(
                    verdict
                        .reason
                        .unwrap_or_else(|| "inference_out_of_scope".to_string()),
                    started,
                );
                outcome.channel = Some(channel);
                return outcome;
            }
        }
        if let Some(outcome) = self.over_budget(step, started, Phase::Pre, channel) {
            return outcome;
        }

        PhaseOutcome {
            allowed: true,
            reason: None,
            warnings,
            channel: Some(channel),
            sanitized_message,
            sanitized_output: None,
            modifications: Vec::new(),
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }

    /// Post-action gate. Order: output schemas and patterns, referenced
    /// endpoints, derived knowledge. Warnings without denials produce a
    /// sanitized output.
    pub fn post_action_check(
        &self,
        interaction: &AgentInteraction,
        record: &ActionRecord,
    ) -> PhaseOutcome {
        let started = Instant::now();
        let credential = match self.credential_for(&interaction.agent.did) {
            Some(c) => c,
            None => {
                return PhaseOutcome::denied(
                    format!("config_error: no credential for {}", interaction.agent.did),
                    started,
                );
            }
        };

        let mut warnings = Vec::new();
        let output_validator = OutputValidator::new(&credential.output_binding);

        // Validator 1: output schemas and prohibited patterns.
        let step = Instant::now();
        let verdict = output_validator.validate(&record.output);
        if !verdict.valid {
            return PhaseOutcome::denied(
                verdict.reason.unwrap_or_else(|| "output_rejected".to_string()),
                started,
            );
        }
        if let Some(outcome) = self.over_budget(step, started, Phase::Post, Channel::Control) {
            return outcome;
        }

        // Validator 2: declared endpoints.
        let step = Instant::now();
        for endpoint in &record.endpoints {
            if let Some(reason) = output_validator.check_endpoint(endpoint) {
                return PhaseOutcome::denied(reason, started);
            }
        }
        if let Some(outcome) = self.over_budget(step, started, Phase::Post, Channel::Control) {
            return outcome;
        }

        // Validator 3: derived knowledge (inference scope plus PII).
        let step = Instant::now();
        let inference_validator = InferenceValidator::new(&credential.inference_scope);
        for knowledge in &record.derived_knowledge {
            let verdict = inference_validator.check_derived(knowledge);
            if !verdict.allowed {
                return PhaseOutcome::denied(
                    verdict
                        .reason
                        .unwrap_or_else(|| "inference_out_of_scope".to_string()),
                    started,
                );
            }
            warnings.extend(verdict.warnings);
        }
        if let Some(outcome) = self.over_budget(step, started, Phase::Post, Channel::Control) {
            return outcome;
        }

        // Warnings (not denials) produce a sanitized output variant.
        let (sanitized_output, modifications) = if warnings.is_empty() {
            (None, Vec::new())
        } else {
            let (clean, log) = output_validator.sanitize(&record.output);
            (Some(clean), log)
        };

        PhaseOutcome {
            allowed: true,
            reason: None,
            warnings,
            channel: None,
            sanitized_message: None,
            sanitized_output,
            modifications,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }

    /// Run both phases over one interaction.
    pub fn validate_interaction(
        &self,
        interaction: &AgentInteraction,
        record: Option<&ActionRecord>,
    ) -> ValidationOutcome {
        let started = Instant::now();
        let pre = self.pre_action_check(interaction);
        if !pre.allowed {
            let reason = pre.reason.clone();
            return ValidationOutcome {
                pre,
                post: None,
                allowed: false,
                reason,
                duration_ms: started.elapsed().as_secs_f64() * 1000.0,
            };
        }

        let post = record.map(|r| self.post_action_check(interaction, r));
        let (allowed, reason) = match &post {
            Some(p) if !p.allowed => (false, p.reason.clone()),
            _ => (true, None),
        };
        ValidationOutcome {
            pre,
            post,
            allowed,
            reason,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }

    fn over_budget(
        &self,
        step: Instant,
        phase_started: Instant,
        phase: Phase,
        channel: Channel,
    ) -> Option<PhaseOutcome> {
        let (per_validator, hard_cap) = match phase {
            Phase::Pre => (self.budgets.pre_per_validator, self.budgets.pre_hard_cap),
            Phase::Post => (self.budgets.post_per_validator, self.budgets.post_hard_cap),
        };
        if step.elapsed() > per_validator || phase_started.elapsed() > hard_cap {
            let mut outcome = PhaseOutcome::denied("timeout", phase_started);
            if phase == Phase::Pre {
                outcome.channel = Some(channel);
            }
            Some(outcome)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pre,
    Post,
}
