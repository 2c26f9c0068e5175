//! Instruction integrity validation.
//!
//! An instruction is approved by the first of three paths that succeeds:
//! exact hash of the normalized text, a parametric template match, or a
//! signed trusted source. Rejection always returns the computed hash so the
//! attempt is auditable.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use super::credential::{InstructionIntegrity, InstructionTemplate};
use super::schema;
use super::signature;
use crate::engine::glob_match;

/// Which path approved the instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMethod {
    ExactHash,
    Template,
    SignedSource,
}

/// Outcome of instruction validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructionVerdict {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<ApprovalMethod>,
    /// `sha256:<hex>` of the normalized instruction, always present.
    pub computed_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    /// Matched-span length over input length for template matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Normalize instruction text for hashing: lowercase, collapse whitespace
/// runs to single spaces, strip non-printable and non-ASCII bytes, trim.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if !ch.is_ascii() || ch.is_ascii_control() {
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        for lowered in ch.to_lowercase() {
            out.push(lowered);
        }
    }
    out
}

/// `sha256:<hex>` over the normalized text.
pub fn instruction_hash(text: &str) -> String {
    let normalized = normalize(text);
    let digest = Sha256::digest(normalized.as_bytes());
    format!("sha256:{}", hex::encode(digest))
}

/// Validator over a credential's instruction-integrity section.
#[derive(Debug)]
pub struct InstructionValidator<'a> {
    integrity: &'a InstructionIntegrity,
}

impl<'a> InstructionValidator<'a> {
    pub fn new(integrity: &'a InstructionIntegrity) -> Self {
        Self { integrity }
    }

    /// Validate an instruction arriving from `source` with an optional
    /// signature over the raw (un-normalized) text.
    pub fn validate(
        &self,
        instruction: &str,
        source: &str,
        signature_b64: Option<&str>,
    ) -> InstructionVerdict {
        let computed_hash = instruction_hash(instruction);

        // Path 1: exact hash.
        if self.integrity.allowed_hashes.contains(&computed_hash) {
            return InstructionVerdict {
                valid: true,
                method: Some(ApprovalMethod::ExactHash),
                computed_hash,
                template_id: None,
                confidence: None,
                parameters: HashMap::new(),
                reason: None,
            };
        }

        // Path 2: parametric templates.
        for template in &self.integrity.templates {
            if let Some((params, confidence)) = match_template(template, instruction) {
                let params_value: Value = params
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect::<serde_json::Map<String, Value>>()
                    .into();
                if template.parameter_schema.is_null()
                    || schema::conforms(&template.parameter_schema, &params_value)
                {
                    return InstructionVerdict {
                        valid: true,
                        method: Some(ApprovalMethod::Template),
                        computed_hash,
                        template_id: Some(template.id.clone()),
                        confidence: Some(confidence),
                        parameters: params,
                        reason: None,
                    };
                }
                log::debug!(
                    "template {} matched but parameters failed schema validation",
                    template.id
                );
            }
        }

        // Path 3: signed trusted source.
        for allowed in &self.integrity.allowed_sources {
            if !glob_match(&allowed.pattern, source) {
                continue;
            }
            if !allowed.require_signature {
                return InstructionVerdict {
                    valid: true,
                    method: Some(ApprovalMethod::SignedSource),
                    computed_hash,
                    template_id: None,
                    confidence: None,
                    parameters: HashMap::new(),
                    reason: None,
                };
            }
            if let (Some(key), Some(tag)) = (&allowed.key, signature_b64) {
                if signature::verify(key.as_bytes(), instruction.as_bytes(), tag) {
                    return InstructionVerdict {
                        valid: true,
                        method: Some(ApprovalMethod::SignedSource),
                        computed_hash,
                        template_id: None,
                        confidence: None,
                        parameters: HashMap::new(),
                        reason: None,
                    };
                }
            }
        }

        InstructionVerdict {
            valid: false,
            method: None,
            computed_hash,
            template_id: None,
            confidence: None,
            parameters: HashMap::new(),
            reason: Some("instruction_not_approved".to_string()),
        }
    }
}

/// Turn a template description into an anchored regex: literal text is
/// escaped, `{{name}}` becomes a named capture, whitespace runs match
/// flexibly. Returns extracted parameters and the match confidence.
fn match_template(template: &InstructionTemplate, input: &str) -> Option<(HashMap<String, String>, f64)> {
    let regex = template_regex(&template.description)?;
    let caps = regex.captures(input)?;
    let full = caps.get(0)?;

    let mut params = HashMap::new();
    for name in regex.capture_names().flatten() {
        if let Some(m) = caps.name(name) {
            params.insert(name.to_string(), m.as_str().trim().to_string());
        }
    }
    let confidence = if input.is_empty() {
        0.0
    } else {
        full.as_str().chars().count() as f64 / input.chars().count() as f64
    };
    Some((params, confidence))
}

fn template_regex(description: &str) -> Option<Regex> {
    let mut body = String::new();
    let mut rest = description;
    while let Some(open) = rest.find("{{") {
        push_literal(&mut body, &rest[..open]);
        let after = &rest[open + 2..];
        let close = match after.find("}}") {
            Some(i) => i,
            None => {
                log::warn!("template description has an unclosed '{{{{' placeholder");
                return None;
            }
        };
        let name = after[..close].trim();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            log::warn!("template placeholder '{name}' is not a valid parameter name");
            return None;
        }
        body.push_str(&format!("(?P<{name}>.+?)"));
        rest = &after[close + 2..];
    }
    push_literal(&mut body, rest);

    match Regex::new(&format!("(?is)^{body}$")) {
        Ok(re) => Some(re),
        Err(e) => {
            log::warn!("template description did not compile to a regex: {e}");
            None
        }
    }
}

/// Escape a literal chunk, with whitespace runs matching flexibly.
fn push_literal(pattern: &mut String, literal: &str) {
    for part in literal.split_whitespace() {
        if !pattern.is_empty() {
            pattern.push_str(r"\s+");
        }
        pattern.push_str(&regex::escape(part));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::credential::InstructionSource;
    use serde_json::json;
    use std::collections::BTreeSet;

    #[test]
    fn normalize_collapses_and_strips() {
        assert_eq!(normalize("  Read   THE\tfile \u{1F600} "), "read the file");
        assert_eq!(normalize("a\nb"), "a b");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn hash_is_stable_across_formatting() {
        assert_eq!(
            instruction_hash("Summarize the report"),
            instruction_hash("  summarize   THE report  ")
        );
        assert!(instruction_hash("x").starts_with("sha256:"));
    }

    fn integrity_with_hash(instruction: &str) -> InstructionIntegrity {
        InstructionIntegrity {
            allowed_hashes: BTreeSet::from([instruction_hash(instruction)]),
            templates: Vec::new(),
            allowed_sources: Vec::new(),
        }
    }

    #[test]
    fn exact_hash_path() {
        let integrity = integrity_with_hash("Summarize the quarterly report");
        let validator = InstructionValidator::new(&integrity);
        let verdict = validator.validate("summarize THE quarterly report", "anywhere", None);
        assert!(verdict.valid);
        assert_eq!(verdict.method, Some(ApprovalMethod::ExactHash));
    }

    #[test]
    fn template_path_extracts_parameters() {
        let integrity = InstructionIntegrity {
            allowed_hashes: BTreeSet::new(),
            templates: vec![InstructionTemplate {
                id: "summarize".into(),
                description: "Summarize the {{document}} report for {{audience}}".into(),
                parameter_schema: json!({
                    "type": "object",
                    "required": ["document", "audience"],
                    "properties": {
                        "document": {"type": "string", "maxLength": 40},
                        "audience": {"type": "string"},
                    },
                }),
            }],
            allowed_sources: Vec::new(),
        };
        let validator = InstructionValidator::new(&integrity);
        let verdict = validator.validate(
            "Summarize the quarterly-finance report for executives",
            "anywhere",
            None,
        );
        assert!(verdict.valid, "reason: {:?}", verdict.reason);
        assert_eq!(verdict.method, Some(ApprovalMethod::Template));
        assert_eq!(verdict.template_id.as_deref(), Some("summarize"));
        assert_eq!(
            verdict.parameters.get("document").map(String::as_str),
            Some("quarterly-finance")
        );
        let confidence = verdict.confidence.unwrap();
        assert!(confidence > 0.9 && confidence <= 1.0);
    }

    #[test]
    fn template_schema_failure_falls_through() {
        let integrity = InstructionIntegrity {
            allowed_hashes: BTreeSet::new(),
            templates: vec![InstructionTemplate {
                id: "limited".into(),
                description: "Rename {{target}}".into(),
                parameter_schema: json!({
                    "type": "object",
                    "properties": {"target": {"type": "string", "maxLength": 3}},
                }),
            }],
            allowed_sources: Vec::new(),
        };
        let validator = InstructionValidator::new(&integrity);
        let verdict = validator.validate("Rename production-database", "anywhere", None);
        assert!(!verdict.valid);
        assert_eq!(verdict.reason.as_deref(), Some("instruction_not_approved"));
    }

    #[test]
    fn signed_source_path() {
        let key = "operator-shared-key";
        let integrity = InstructionIntegrity {
            allowed_hashes: BTreeSet::new(),
            templates: Vec::new(),
            allowed_sources: vec![InstructionSource {
                pattern: "operator-*".into(),
                require_signature: true,
                key: Some(key.into()),
            }],
        };
        let validator = InstructionValidator::new(&integrity);
        let instruction = "Rotate the backup credentials";
        let tag = signature::sign(key.as_bytes(), instruction.as_bytes());

        let verdict = validator.validate(instruction, "operator-console", Some(tag.as_str()));
        assert!(verdict.valid);
        assert_eq!(verdict.method, Some(ApprovalMethod::SignedSource));

        // Wrong source pattern.
        let verdict = validator.validate(instruction, "email-content", Some(tag.as_str()));
        assert!(!verdict.valid);

        // Missing signature.
        let verdict = validator.validate(instruction, "operator-console", None);
        assert!(!verdict.valid);
    }

    #[test]
    fn unsigned_source_without_requirement() {
        let integrity = InstructionIntegrity {
            allowed_hashes: BTreeSet::new(),
            templates: Vec::new(),
            allowed_sources: vec![InstructionSource {
                pattern: "scheduler".into(),
                require_signature: false,
                key: None,
            }],
        };
        let validator = InstructionValidator::new(&integrity);
        assert!(validator.validate("run nightly batch", "scheduler", None).valid);
    }

    #[test]
    fn rejection_returns_computed_hash() {
        let integrity = InstructionIntegrity::default();
        let validator = InstructionValidator::new(&integrity);
        let verdict = validator.validate("do something novel", "nowhere", None);
        assert!(!verdict.valid);
        assert_eq!(verdict.computed_hash, instruction_hash("do something novel"));
    }
}
