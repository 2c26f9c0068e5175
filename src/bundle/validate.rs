//! Schema validation for policy bundles.
//!
//! Works over a parsed JSON value tree so YAML and JSON documents share one
//! validator. Errors are collected, not thrown: each issue names the field
//! path, a message, and the schema keyword that failed. Closed-set fields
//! that carry an unrecognized value produce an `unknown_variant` issue
//! rather than silently falling through.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

use super::constraint::{
    Constraint, ConstraintAction, ConstraintKind, ConstraintScope, Obligation, ObligationTrigger,
};
use super::{BundleMetadata, PolicyBundle, SUPPORTED_BASIS_VERSIONS};
use crate::patterns::{self, CompiledPattern, PatternSeverity};

/// One validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    /// Field path, e.g. `constraints[2].type`.
    pub path: String,
    pub message: String,
    /// Schema keyword that failed: `required`, `type`, `pattern`,
    /// `unknown_variant`, `unsupported_version`, ...
    pub keyword: &'static str,
}

impl ValidationIssue {
    fn new(path: impl Into<String>, message: impl Into<String>, keyword: &'static str) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            keyword,
        }
    }
}

static POLICY_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]*[a-z0-9]$").expect("policy id regex"));
static SEMVER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(0|[1-9]\d*)\.(0|[1-9]\d*)\.(0|[1-9]\d*)(-[0-9A-Za-z.-]+)?$")
        .expect("semver regex")
});

/// Validate a parsed document and, when clean, build the typed bundle.
///
/// Returns either the bundle or every issue found; there are no partial
/// parses.
pub fn validate_and_build(doc: &Value) -> Result<PolicyBundle, Vec<ValidationIssue>> {
    let mut issues = Vec::new();

    let root = match doc.as_object() {
        Some(map) => map,
        None => {
            return Err(vec![ValidationIssue::new(
                "$",
                "bundle document must be an object",
                "type",
            )])
        }
    };

    let basis_version = require_string(root.get("basis_version"), "basis_version", &mut issues);
    if let Some(version) = &basis_version {
        if !SUPPORTED_BASIS_VERSIONS.contains(&version.as_str()) {
            issues.push(ValidationIssue::new(
                "basis_version",
                format!(
                    "unsupported basis_version '{version}', supported: {}",
                    SUPPORTED_BASIS_VERSIONS.join(", ")
                ),
                "unsupported_version",
            ));
        }
    }

    let policy_id = require_string(root.get("policy_id"), "policy_id", &mut issues);
    if let Some(id) = &policy_id {
        if id.len() < 3 || id.len() > 64 {
            issues.push(ValidationIssue::new(
                "policy_id",
                format!("policy_id must be 3-64 characters, got {}", id.len()),
                "length",
            ));
        } else if !POLICY_ID_RE.is_match(id) {
            issues.push(ValidationIssue::new(
                "policy_id",
                "policy_id must be lowercase kebab-case",
                "pattern",
            ));
        }
    }

    let metadata = validate_metadata(root.get("metadata"), &mut issues);

    let mut constraints = Vec::new();
    if let Some(value) = root.get("constraints") {
        match value.as_array() {
            Some(items) => {
                for (i, item) in items.iter().enumerate() {
                    if let Some(c) = validate_constraint(item, i, &mut issues) {
                        constraints.push(c);
                    }
                }
            }
            None => issues.push(ValidationIssue::new(
                "constraints",
                "constraints must be an array",
                "type",
            )),
        }
    }

    let mut obligations = Vec::new();
    if let Some(value) = root.get("obligations") {
        match value.as_array() {
            Some(items) => {
                for (i, item) in items.iter().enumerate() {
                    if let Some(o) = validate_obligation(item, i, &mut issues) {
                        obligations.push(o);
                    }
                }
            }
            None => issues.push(ValidationIssue::new(
                "obligations",
                "obligations must be an array",
                "type",
            )),
        }
    }

    if !issues.is_empty() {
        return Err(issues);
    }

    // All three are Some when no issues were recorded.
    match (basis_version, policy_id, metadata) {
        (Some(basis_version), Some(policy_id), Some(metadata)) => Ok(PolicyBundle {
            basis_version,
            policy_id,
            metadata,
            constraints,
            obligations,
        }),
        _ => Err(vec![ValidationIssue::new(
            "$",
            "bundle is missing required fields",
            "required",
        )]),
    }
}

fn require_string(
    value: Option<&Value>,
    path: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::String(_)) => {
            issues.push(ValidationIssue::new(path, "must not be empty", "minLength"));
            None
        }
        Some(_) => {
            issues.push(ValidationIssue::new(path, "must be a string", "type"));
            None
        }
        None => {
            issues.push(ValidationIssue::new(path, "is required", "required"));
            None
        }
    }
}

fn validate_metadata(
    value: Option<&Value>,
    issues: &mut Vec<ValidationIssue>,
) -> Option<BundleMetadata> {
    let map = match value {
        Some(Value::Object(map)) => map,
        Some(_) => {
            issues.push(ValidationIssue::new("metadata", "must be an object", "type"));
            return None;
        }
        None => {
            issues.push(ValidationIssue::new("metadata", "is required", "required"));
            return None;
        }
    };

    let name = require_string(map.get("name"), "metadata.name", issues);
    let version = require_string(map.get("version"), "metadata.version", issues);
    if let Some(v) = &version {
        if !SEMVER_RE.is_match(v) {
            issues.push(ValidationIssue::new(
                "metadata.version",
                format!("'{v}' is not a MAJOR.MINOR.PATCH[-pre] version"),
                "pattern",
            ));
        }
    }

    let created_at = match require_string(map.get("created_at"), "metadata.created_at", issues) {
        Some(raw) => match raw.parse::<DateTime<Utc>>() {
            Ok(ts) => Some(ts),
            Err(_) => {
                issues.push(ValidationIssue::new(
                    "metadata.created_at",
                    format!("'{raw}' is not an RFC 3339 timestamp"),
                    "format",
                ));
                None
            }
        },
        None => None,
    };

    match (name, version, created_at) {
        (Some(name), Some(version), Some(created_at)) => Some(BundleMetadata {
            name,
            version,
            created_at,
        }),
        _ => None,
    }
}

fn closed_set<T: serde::de::DeserializeOwned>(
    value: &Value,
    path: String,
    set_name: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Option<T> {
    match serde_json::from_value::<T>(value.clone()) {
        Ok(v) => Some(v),
        Err(_) => {
            issues.push(ValidationIssue::new(
                path,
                format!("'{}' is not a known {set_name}", value_preview(value)),
                "unknown_variant",
            ));
            None
        }
    }
}

fn value_preview(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn validate_constraint(
    item: &Value,
    index: usize,
    issues: &mut Vec<ValidationIssue>,
) -> Option<Constraint> {
    let at = |field: &str| format!("constraints[{index}].{field}");
    let map = match item.as_object() {
        Some(map) => map,
        None => {
            issues.push(ValidationIssue::new(
                format!("constraints[{index}]"),
                "must be an object",
                "type",
            ));
            return None;
        }
    };

    let kind: Option<ConstraintKind> = match map.get("type") {
        Some(v) => closed_set(v, at("type"), "constraint type", issues),
        None => {
            issues.push(ValidationIssue::new(at("type"), "is required", "required"));
            None
        }
    };
    let action: Option<ConstraintAction> = match map.get("action") {
        Some(v) => closed_set(v, at("action"), "constraint action", issues),
        None => {
            issues.push(ValidationIssue::new(at("action"), "is required", "required"));
            None
        }
    };

    let values = match map.get("values") {
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for (j, v) in items.iter().enumerate() {
                match v.as_str() {
                    Some(s) => out.push(s.to_string()),
                    None => issues.push(ValidationIssue::new(
                        format!("constraints[{index}].values[{j}]"),
                        "must be a string",
                        "type",
                    )),
                }
            }
            out
        }
        Some(_) => {
            issues.push(ValidationIssue::new(at("values"), "must be an array", "type"));
            Vec::new()
        }
        None => Vec::new(),
    };

    let named_pattern = match map.get("named_pattern") {
        Some(Value::String(name)) => {
            if patterns::named(name).is_none() {
                issues.push(ValidationIssue::new(
                    at("named_pattern"),
                    format!("'{name}' is not in the pattern library"),
                    "unknown_variant",
                ));
                None
            } else {
                Some(name.clone())
            }
        }
        Some(_) => {
            issues.push(ValidationIssue::new(at("named_pattern"), "must be a string", "type"));
            None
        }
        None => None,
    };

    let severity = match map.get("severity") {
        Some(v) => closed_set::<PatternSeverity>(v, at("severity"), "severity", issues)
            .unwrap_or(PatternSeverity::Medium),
        None => PatternSeverity::Medium,
    };

    let pattern = match map.get("pattern") {
        Some(Value::String(source)) => {
            if named_pattern.is_some() {
                issues.push(ValidationIssue::new(
                    at("pattern"),
                    "constraint may carry named_pattern or pattern, not both",
                    "oneOf",
                ));
                None
            } else {
                match CompiledPattern::compile(format!("custom_{index}"), source, severity) {
                    Ok(compiled) => Some(compiled),
                    Err(e) => {
                        issues.push(ValidationIssue::new(
                            at("pattern"),
                            format!("invalid regex: {e}"),
                            "pattern",
                        ));
                        None
                    }
                }
            }
        }
        Some(_) => {
            issues.push(ValidationIssue::new(at("pattern"), "must be a string", "type"));
            None
        }
        None => None,
    };

    let scope = match map.get("scope") {
        Some(v) => match serde_json::from_value::<ConstraintScope>(v.clone()) {
            Ok(scope) => scope,
            Err(e) => {
                issues.push(ValidationIssue::new(
                    at("scope"),
                    format!("invalid scope: {e}"),
                    "unknown_variant",
                ));
                ConstraintScope::default()
            }
        },
        None => ConstraintScope::default(),
    };

    let enabled = match map.get("enabled") {
        Some(Value::Bool(b)) => *b,
        Some(_) => {
            issues.push(ValidationIssue::new(at("enabled"), "must be a boolean", "type"));
            true
        }
        None => true,
    };

    let id = match map.get("id") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            issues.push(ValidationIssue::new(at("id"), "must be a string", "type"));
            None
        }
        None => None,
    };

    let message = match map.get("message") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            issues.push(ValidationIssue::new(at("message"), "must be a string", "type"));
            None
        }
        None => None,
    };

    Some(Constraint {
        id,
        kind: kind?,
        action: action?,
        values,
        named_pattern,
        pattern,
        scope,
        severity,
        enabled,
        message,
    })
}

fn validate_obligation(
    item: &Value,
    index: usize,
    issues: &mut Vec<ValidationIssue>,
) -> Option<Obligation> {
    let at = |field: &str| format!("obligations[{index}].{field}");
    let map = match item.as_object() {
        Some(map) => map,
        None => {
            issues.push(ValidationIssue::new(
                format!("obligations[{index}]"),
                "must be an object",
                "type",
            ));
            return None;
        }
    };

    let trigger = match require_string(map.get("trigger"), &at("trigger"), issues) {
        Some(raw) => match ObligationTrigger::parse(&raw) {
            Ok(t) => Some(t),
            Err(e) => {
                issues.push(ValidationIssue::new(at("trigger"), e, "format"));
                None
            }
        },
        None => None,
    };

    let action = require_string(map.get("action"), &at("action"), issues);

    let parameters: HashMap<String, Value> = match map.get("parameters") {
        Some(Value::Object(params)) => params.clone().into_iter().collect(),
        Some(_) => {
            issues.push(ValidationIssue::new(at("parameters"), "must be an object", "type"));
            HashMap::new()
        }
        None => HashMap::new(),
    };

    Some(Obligation {
        trigger: trigger?,
        action: action?,
        parameters,
    })
}

/// Project a typed bundle back into a JSON value for serialization.
pub fn to_document(bundle: &PolicyBundle) -> Value {
    let constraints: Vec<Value> = bundle
        .constraints
        .iter()
        .map(|c| {
            let mut map = serde_json::Map::new();
            if let Some(id) = &c.id {
                map.insert("id".into(), Value::String(id.clone()));
            }
            map.insert("type".into(), Value::String(c.kind.as_str().into()));
            map.insert("action".into(), Value::String(c.action.as_str().into()));
            if !c.values.is_empty() {
                map.insert(
                    "values".into(),
                    Value::Array(c.values.iter().cloned().map(Value::String).collect()),
                );
            }
            if let Some(name) = &c.named_pattern {
                map.insert("named_pattern".into(), Value::String(name.clone()));
            }
            if let Some(pattern) = &c.pattern {
                map.insert("pattern".into(), Value::String(pattern.regex.as_str().into()));
            }
            if !c.scope.trust_levels.is_empty() || !c.scope.roles.is_empty() {
                map.insert(
                    "scope".into(),
                    serde_json::to_value(&c.scope).unwrap_or(Value::Null),
                );
            }
            map.insert(
                "severity".into(),
                serde_json::to_value(c.severity).unwrap_or(Value::Null),
            );
            map.insert("enabled".into(), Value::Bool(c.enabled));
            if let Some(message) = &c.message {
                map.insert("message".into(), Value::String(message.clone()));
            }
            Value::Object(map)
        })
        .collect();

    let obligations: Vec<Value> = bundle
        .obligations
        .iter()
        .map(|o| serde_json::to_value(o).unwrap_or(Value::Null))
        .collect();

    serde_json::json!({
        "basis_version": bundle.basis_version,
        "policy_id": bundle.policy_id,
        "metadata": {
            "name": bundle.metadata.name,
            "version": bundle.metadata.version,
            "created_at": bundle.metadata.created_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        },
        "constraints": constraints,
        "obligations": obligations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal() -> Value {
        json!({
            "basis_version": "1.0",
            "policy_id": "baseline-guard",
            "metadata": {
                "name": "Baseline guard",
                "version": "1.2.0",
                "created_at": "2026-01-15T12:00:00Z",
            },
        })
    }

    #[test]
    fn minimal_bundle_validates() {
        let bundle = validate_and_build(&minimal()).unwrap();
        assert_eq!(bundle.policy_id, "baseline-guard");
        assert_eq!(bundle.metadata.version, "1.2.0");
        assert!(bundle.constraints.is_empty());
    }

    #[test]
    fn unsupported_basis_version() {
        let mut doc = minimal();
        doc["basis_version"] = json!("2.0");
        let issues = validate_and_build(&doc).unwrap_err();
        assert!(issues.iter().any(|i| i.keyword == "unsupported_version"));
    }

    #[test]
    fn policy_id_shape_is_enforced() {
        for (id, keyword) in [
            ("ab", "length"),
            ("UPPER-case", "pattern"),
            ("-leading", "pattern"),
            ("trailing-", "pattern"),
        ] {
            let mut doc = minimal();
            doc["policy_id"] = json!(id);
            let issues = validate_and_build(&doc).unwrap_err();
            assert!(
                issues.iter().any(|i| i.path == "policy_id" && i.keyword == keyword),
                "id {id:?} expected {keyword}"
            );
        }
    }

    #[test]
    fn bad_semver_is_rejected() {
        let mut doc = minimal();
        doc["metadata"]["version"] = json!("1.2");
        let issues = validate_and_build(&doc).unwrap_err();
        assert!(issues.iter().any(|i| i.path == "metadata.version"));
    }

    #[test]
    fn unknown_constraint_type_is_unknown_variant() {
        let mut doc = minimal();
        doc["constraints"] = json!([{"type": "firewall", "action": "block"}]);
        let issues = validate_and_build(&doc).unwrap_err();
        let issue = issues
            .iter()
            .find(|i| i.path == "constraints[0].type")
            .unwrap();
        assert_eq!(issue.keyword, "unknown_variant");
    }

    #[test]
    fn pattern_and_named_pattern_are_exclusive() {
        let mut doc = minimal();
        doc["constraints"] = json!([{
            "type": "data_protection",
            "action": "redact",
            "named_pattern": "ssn_us",
            "pattern": "TKT-\\d+",
        }]);
        let issues = validate_and_build(&doc).unwrap_err();
        assert!(issues.iter().any(|i| i.keyword == "oneOf"));
    }

    #[test]
    fn invalid_custom_regex_rejects_bundle() {
        let mut doc = minimal();
        doc["constraints"] = json!([{
            "type": "data_protection",
            "action": "block",
            "pattern": "([unclosed",
        }]);
        let issues = validate_and_build(&doc).unwrap_err();
        assert!(issues
            .iter()
            .any(|i| i.path == "constraints[0].pattern" && i.message.contains("invalid regex")));
    }

    #[test]
    fn unknown_named_pattern_rejects_bundle() {
        let mut doc = minimal();
        doc["constraints"] = json!([{
            "type": "data_protection",
            "action": "redact",
            "named_pattern": "passport_mars",
        }]);
        let issues = validate_and_build(&doc).unwrap_err();
        assert!(issues.iter().any(|i| i.keyword == "unknown_variant"));
    }

    #[test]
    fn obligation_trigger_is_parsed() {
        let mut doc = minimal();
        doc["obligations"] = json!([{
            "trigger": "context.amount gte 1000",
            "action": "notify_owner",
            "parameters": {"channel": "approvals"},
        }]);
        let bundle = validate_and_build(&doc).unwrap();
        assert_eq!(bundle.obligations.len(), 1);
        assert_eq!(bundle.obligations[0].action, "notify_owner");
    }

    #[test]
    fn issues_accumulate_rather_than_stopping_at_first() {
        let doc = json!({"policy_id": 7});
        let issues = validate_and_build(&doc).unwrap_err();
        // basis_version missing, policy_id wrong type, metadata missing.
        assert!(issues.len() >= 3);
    }
}
