//! Tamper-evident audit: per-tenant append-only hash-chained records.
//!
//! Every record binds its predecessor's hash, making any rewrite of
//! history detectable by a linear walk. Sequence numbers are gap-free per
//! tenant, starting at 1.

pub mod service;
pub mod store;

pub use service::{AuditService, ChainRoot, ChainVerification, CleanupReport};
pub use store::{AuditQuery, AuditStore, QueryPage};

use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Outcome of the audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Partial,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
            AuditOutcome::Partial => "partial",
        }
    }
}

/// Record severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Info,
    Notice,
    Warn,
    Error,
    Critical,
}

impl AuditSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditSeverity::Info => "info",
            AuditSeverity::Notice => "notice",
            AuditSeverity::Warn => "warn",
            AuditSeverity::Error => "error",
            AuditSeverity::Critical => "critical",
        }
    }
}

/// Event category, derived from the event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Policy,
    Security,
    Escalation,
    Trust,
    Data,
    System,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditCategory::Policy => "policy",
            AuditCategory::Security => "security",
            AuditCategory::Escalation => "escalation",
            AuditCategory::Trust => "trust",
            AuditCategory::Data => "data",
            AuditCategory::System => "system",
        }
    }
}

/// The actor recorded on an audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditActor {
    #[serde(rename = "type")]
    pub actor_type: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// The target of the audited action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditTarget {
    #[serde(rename = "type")]
    pub target_type: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Caller-supplied fields of a record; sequencing, hashing and timestamps
/// are filled in by the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditInput {
    pub tenant_id: String,
    /// Namespaced event type, e.g. `intent.denied`.
    pub event_type: String,
    pub actor: AuditActor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<AuditTarget>,
    pub action: String,
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_state: Option<Value>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// When the event happened; defaults to now at write time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<DateTime<Utc>>,
    /// Explicit severity override; the event-type table applies otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<AuditSeverity>,
}

/// A fully materialized, chained audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: String,
    pub tenant_id: String,
    pub event_type: String,
    pub event_category: AuditCategory,
    pub severity: AuditSeverity,
    pub actor: AuditActor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<AuditTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    pub action: String,
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_state: Option<Value>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Gap-free per-tenant sequence, starting at 1.
    pub sequence_number: i64,
    /// Lowercase hex, null for the first record of a tenant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_hash: Option<String>,
    /// Lowercase hex SHA-256 over the canonical projection.
    pub record_hash: String,
    pub event_time: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
}

/// Static event-type table: event type to (category, severity). Unknown
/// types default to `(system, info)`.
static EVENT_TABLE: Lazy<HashMap<&'static str, (AuditCategory, AuditSeverity)>> =
    Lazy::new(|| {
        use AuditCategory::*;
        use AuditSeverity::*;
        HashMap::from([
            ("intent.allowed", (Policy, Info)),
            ("intent.denied", (Policy, Warn)),
            ("intent.quarantined", (Policy, Error)),
            ("intent.evaluated", (Policy, Info)),
            ("bundle.installed", (Policy, Info)),
            ("bundle.rejected", (Policy, Warn)),
            ("escalation.requested", (Escalation, Notice)),
            ("escalation.resolved", (Escalation, Info)),
            ("semantic.rejected", (Security, Warn)),
            ("injection.detected", (Security, Critical)),
            ("channel.sanitized", (Security, Notice)),
            ("output.sanitized", (Security, Notice)),
            ("trust.adjusted", (Trust, Notice)),
            ("trust.revoked", (Trust, Critical)),
            ("capability.denied", (Trust, Warn)),
            ("data.redacted", (Data, Notice)),
            ("audit.archived", (System, Info)),
            ("audit.purged", (System, Info)),
            ("audit.verified", (System, Info)),
        ])
    });

/// Look up (category, severity) for an event type.
pub fn classify_event(event_type: &str) -> (AuditCategory, AuditSeverity) {
    EVENT_TABLE
        .get(event_type)
        .copied()
        .unwrap_or((AuditCategory::System, AuditSeverity::Info))
}

/// Build the canonical hash payload and digest it.
///
/// The projection covers exactly {action, actor, eventTime, eventType,
/// outcome, previousHash, sequenceNumber, target, tenantId}; serde_json
/// maps are sorted, so the serialization is key-ordered and deterministic.
/// Changing this set is a breaking migration.
pub fn compute_record_hash(
    tenant_id: &str,
    event_type: &str,
    actor: &AuditActor,
    target: Option<&AuditTarget>,
    action: &str,
    outcome: AuditOutcome,
    sequence_number: i64,
    previous_hash: Option<&str>,
    event_time: DateTime<Utc>,
) -> String {
    let payload = serde_json::json!({
        "tenantId": tenant_id,
        "eventType": event_type,
        "actor": actor,
        "target": target,
        "action": action,
        "outcome": outcome,
        "sequenceNumber": sequence_number,
        "previousHash": previous_hash,
        "eventTime": event_time.to_rfc3339_opts(SecondsFormat::Millis, true),
    });
    let canonical = payload.to_string();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}
