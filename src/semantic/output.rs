//! Output binding validation.
//!
//! Accepts an output when any allowed schema matches, then scans the
//! serialized form for prohibited patterns and checks every referenced URL
//! against block-then-allow endpoint globs. `sanitize` produces a redacted
//! variant with a redaction log and is idempotent.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::credential::OutputBinding;
use super::schema;
use crate::patterns::{self, CompiledPattern, PatternSeverity};
use crate::types::Modification;

/// Permissive URL extractor; anything that looks like a link counts.
static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s"'<>)\]},]+"#).expect("url regex"));

/// Outcome of output validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputVerdict {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub violations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_severity: Option<PatternSeverity>,
}

impl OutputVerdict {
    fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
            violations: Vec::new(),
            max_severity: None,
        }
    }
}

/// Validator over a credential's output-binding section.
#[derive(Debug)]
pub struct OutputValidator<'a> {
    binding: &'a OutputBinding,
    compiled_custom: Vec<CompiledPattern>,
}

impl<'a> OutputValidator<'a> {
    /// Custom prohibited patterns were validated at credential load, so a
    /// failure here is a programming error; it is skipped with a warning
    /// rather than failing open or closed at runtime.
    pub fn new(binding: &'a OutputBinding) -> Self {
        let compiled_custom = binding
            .prohibited_patterns
            .iter()
            .enumerate()
            .filter_map(|(i, source)| {
                match CompiledPattern::compile(
                    format!("custom_prohibited_{i}"),
                    source,
                    PatternSeverity::High,
                ) {
                    Ok(p) => Some(p),
                    Err(e) => {
                        log::warn!("skipping prohibited pattern '{source}': {e}");
                        None
                    }
                }
            })
            .collect();
        Self {
            binding,
            compiled_custom,
        }
    }

    /// Full post-action output check.
    pub fn validate(&self, output: &Value) -> OutputVerdict {
        // Schema gate: accept on first match; no schemas means no gate.
        if !self.binding.allowed_schemas.is_empty() {
            let accepted = self
                .binding
                .allowed_schemas
                .iter()
                .any(|s| schema::conforms(s, output));
            if !accepted {
                return OutputVerdict {
                    valid: false,
                    reason: Some("output_schema_mismatch".to_string()),
                    violations: Vec::new(),
                    max_severity: None,
                };
            }
        }

        let serialized = output.to_string();

        // Prohibited patterns: built-in catalogue plus configured extras.
        let mut violations = Vec::new();
        let mut max_severity: Option<PatternSeverity> = None;
        for def in patterns::all_builtin() {
            if def.severity >= self.binding.severity_threshold && def.regex.is_match(&serialized) {
                violations.push(def.id.to_string());
                max_severity = Some(max_severity.map_or(def.severity, |s| s.max(def.severity)));
            }
        }
        for custom in &self.compiled_custom {
            if custom.severity >= self.binding.severity_threshold
                && custom.regex.is_match(&serialized)
            {
                violations.push(custom.id.clone());
                max_severity = Some(max_severity.map_or(custom.severity, |s| s.max(custom.severity)));
            }
        }
        if !violations.is_empty() {
            return OutputVerdict {
                valid: false,
                reason: Some(format!("prohibited_pattern:{}", violations.join(","))),
                violations,
                max_severity,
            };
        }

        // Endpoint gate over every URL in the output.
        for url in extract_urls(&serialized) {
            if let Some(reason) = self.check_endpoint(&url) {
                return OutputVerdict {
                    valid: false,
                    reason: Some(reason),
                    violations: vec![url],
                    max_severity: None,
                };
            }
        }

        OutputVerdict::ok()
    }

    /// Check one endpoint against block-then-allow globs. Block wins.
    pub fn check_endpoint(&self, url: &str) -> Option<String> {
        let host = host_of(url);
        if self
            .binding
            .blocked_endpoints
            .iter()
            .any(|g| endpoint_glob_match(g, host))
        {
            return Some(format!("endpoint_blocked:{host}"));
        }
        if !self.binding.allowed_endpoints.is_empty()
            && !self
                .binding
                .allowed_endpoints
                .iter()
                .any(|g| endpoint_glob_match(g, host))
        {
            return Some(format!("endpoint_not_allowed:{host}"));
        }
        None
    }

    /// Redact every built-in and configured pattern from the output's
    /// string values, returning the rewritten value and a redaction log.
    pub fn sanitize(&self, output: &Value) -> (Value, Vec<Modification>) {
        let mut log: Vec<Modification> = Vec::new();
        let rewritten = sanitize_value(output, &self.compiled_custom, &mut log);
        (rewritten, log)
    }
}

fn sanitize_value(value: &Value, custom: &[CompiledPattern], log: &mut Vec<Modification>) -> Value {
    match value {
        Value::String(s) => {
            let mut text = s.clone();
            for def in patterns::all_builtin() {
                let count = def.regex.find_iter(&text).count();
                if count > 0 {
                    text = def.regex.replace_all(&text, "[REDACTED]").into_owned();
                    record(log, def.id, count);
                }
            }
            for pattern in custom {
                let (rewritten, count) = pattern.redact(&text, None);
                if count > 0 {
                    text = rewritten;
                    record(log, &pattern.id, count);
                }
            }
            Value::String(text)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| sanitize_value(v, custom, log))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), sanitize_value(v, custom, log)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn record(log: &mut Vec<Modification>, pattern: &str, count: usize) {
    if let Some(entry) = log.iter_mut().find(|m| m.pattern == pattern) {
        entry.count += count;
    } else {
        log.push(Modification {
            pattern: pattern.to_string(),
            count,
        });
    }
}

/// Extract all URLs from serialized output.
pub fn extract_urls(text: &str) -> Vec<String> {
    URL_RE
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';']).to_string())
        .collect()
}

/// The host portion of a URL, or the input when it has no scheme.
fn host_of(url: &str) -> &str {
    let without_scheme = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or(without_scheme)
        .split(':')
        .next()
        .unwrap_or(without_scheme)
}

/// Endpoint glob: leading `*` is a suffix match (`*.corp.example`),
/// trailing `*` a prefix match, `*` alone matches everything.
pub fn endpoint_glob_match(glob: &str, host: &str) -> bool {
    if glob == "*" {
        return true;
    }
    if let Some(suffix) = glob.strip_prefix('*') {
        return host.ends_with(suffix);
    }
    if let Some(prefix) = glob.strip_suffix('*') {
        return host.starts_with(prefix);
    }
    glob == host
}
