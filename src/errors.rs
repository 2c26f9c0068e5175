//! Error taxonomy for the governance substrate.
//!
//! Validators return structured errors rather than panicking; the
//! orchestrator maps them into a single [`crate::types::Decision`] and a
//! single audit record. User-visible failures carry only the reason code and
//! a safe message; evidence (matched spans, regexes, actor IPs) stays in the
//! audit log.

use thiserror::Error;

/// Sub-kinds of a semantic rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticRejection {
    InstructionNotApproved,
    OutputSchemaMismatch,
    ProhibitedPattern,
    InjectionDetected,
    ContextUntrusted,
    ChannelViolation,
    InferenceOutOfScope,
    PiiInInference,
}

impl SemanticRejection {
    /// Stable reason-code string used in decisions and audit records.
    pub fn code(&self) -> &'static str {
        match self {
            SemanticRejection::InstructionNotApproved => "instruction_not_approved",
            SemanticRejection::OutputSchemaMismatch => "output_schema_mismatch",
            SemanticRejection::ProhibitedPattern => "prohibited_pattern",
            SemanticRejection::InjectionDetected => "injection_detected",
            SemanticRejection::ContextUntrusted => "context_untrusted",
            SemanticRejection::ChannelViolation => "channel_violation",
            SemanticRejection::InferenceOutOfScope => "inference_out_of_scope",
            SemanticRejection::PiiInInference => "pii_in_inference",
        }
    }
}

/// Top-level error taxonomy.
///
/// Kinds map 1:1 onto the wire-level `denialCode` values callers see.
#[derive(Debug, Error)]
pub enum GovernanceError {
    /// Input does not conform to the bundle or intent schema. Caller-fixable.
    #[error("validation error at {path}: {message}")]
    Validation { path: String, message: String },

    /// A policy evaluated to deny.
    #[error("denied by policy {policy_id}: {constraint_kind}")]
    PolicyDenied {
        policy_id: String,
        constraint_kind: String,
    },

    /// The actor lacks the requested capability.
    #[error("insufficient capability: {capability}")]
    InsufficientCapability { capability: String },

    /// The actor's trust tier is below the capability minimum.
    #[error("insufficient trust tier: have {actual}, need {required}")]
    InsufficientTrustTier { actual: String, required: String },

    /// Not a failure: the decision is escalate, pending human approval.
    #[error("requires escalation: {capability}")]
    RequiresEscalation { capability: String },

    /// A semantic validator rejected the interaction.
    #[error("semantic rejection: {0}")]
    Semantic(&'static str),

    /// A validator or rule exceeded its deadline.
    #[error("deadline exceeded in {stage}")]
    Timeout { stage: String },

    /// Audit chain verification found a broken link.
    #[error("audit chain integrity violation at sequence {sequence}")]
    ChainIntegrity { sequence: i64 },

    /// Retryable storage failure. Callers may retry with the same request id.
    #[error("transient storage error: {0}")]
    TransientStorage(String),

    /// Invalid credential or bundle at load time. The affected tenant is not
    /// served until the configuration is fixed.
    #[error("config error: {0}")]
    Config(String),

    /// Audit write failed; the enclosing request is failed. We never issue an
    /// allow without a durable audit record.
    #[error("audit write failed: {0}")]
    AuditWriteFailed(String),
}

impl GovernanceError {
    /// Wire-level denial code for this error kind.
    pub fn denial_code(&self) -> &'static str {
        match self {
            GovernanceError::Validation { .. } => "validation_error",
            GovernanceError::PolicyDenied { .. } => "policy_denied",
            GovernanceError::InsufficientCapability { .. } => "insufficient_capability",
            GovernanceError::InsufficientTrustTier { .. } => "insufficient_trust_tier",
            GovernanceError::RequiresEscalation { .. } => "requires_escalation",
            GovernanceError::Semantic(code) => code,
            GovernanceError::Timeout { .. } => "timeout",
            GovernanceError::ChainIntegrity { .. } => "chain_integrity_violation",
            GovernanceError::TransientStorage(_) => "transient_storage_error",
            GovernanceError::Config(_) => "config_error",
            GovernanceError::AuditWriteFailed(_) => "audit_write_failed",
        }
    }

    /// Whether the caller may retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GovernanceError::TransientStorage(_))
    }
}

impl From<SemanticRejection> for GovernanceError {
    fn from(kind: SemanticRejection) -> Self {
        GovernanceError::Semantic(kind.code())
    }
}

/// Errors raised while parsing or validating a policy bundle.
#[derive(Debug, Error)]
pub enum BundleError {
    /// The byte stream is not parseable in the detected format. `message`
    /// includes the line and column when the underlying parser reports one;
    /// `location` carries the same pair for programmatic use.
    #[error("{format} parse error: {message}")]
    Parse {
        format: &'static str,
        message: String,
        location: Option<(usize, usize)>,
    },

    /// The document parsed but failed schema validation.
    #[error("bundle failed validation with {} issue(s)", .issues.len())]
    Invalid { issues: Vec<crate::bundle::ValidationIssue> },

    /// `basis_version` is outside the supported set.
    #[error("unsupported basis_version {version}")]
    UnsupportedVersion { version: String },
}

/// Errors raised by the audit store.
#[derive(Debug, Error)]
pub enum AuditError {
    /// A generic storage operation error.
    #[error("audit storage error: {message}")]
    Storage { message: String },

    /// Sequence allocation lost the uniqueness race too many times.
    #[error("sequence contention for tenant {tenant_id} after {attempts} attempts")]
    SequenceContention { tenant_id: String, attempts: u32 },

    /// The queried record does not exist.
    #[error("audit record not found: {id}")]
    NotFound { id: String },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl From<AuditError> for GovernanceError {
    fn from(err: AuditError) -> Self {
        match err {
            AuditError::SequenceContention { .. } => {
                GovernanceError::TransientStorage(err.to_string())
            }
            other => GovernanceError::AuditWriteFailed(other.to_string()),
        }
    }
}
