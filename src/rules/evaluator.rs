//! Evaluation of one rule group against an evaluation context.
//!
//! Operators are strict about types: numeric comparisons require both sides
//! numeric, `in` requires an array expectation, `matches` compiles its
//! expectation as a regex (an invalid regex yields a non-match plus a
//! warning, never a panic). AND groups short-circuit on the first false,
//! OR groups on the first true.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;

use super::path::{walk, PathValue};

/// Comparison operator over a resolved field and an expected value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperator {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    In,
    Contains,
    Matches,
}

impl RuleOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleOperator::Eq => "eq",
            RuleOperator::Ne => "ne",
            RuleOperator::Gt => "gt",
            RuleOperator::Lt => "lt",
            RuleOperator::Gte => "gte",
            RuleOperator::Lte => "lte",
            RuleOperator::In => "in",
            RuleOperator::Contains => "contains",
            RuleOperator::Matches => "matches",
        }
    }
}

/// A single field comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Dot-separated path into the evaluation context.
    pub field: String,
    pub operator: RuleOperator,
    pub value: Value,
}

/// How the rules of a group combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GroupLogic {
    And,
    Or,
}

/// An AND/OR group of rules. Groups nest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleGroup {
    pub logic: GroupLogic,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub groups: Vec<RuleGroup>,
}

impl RuleGroup {
    pub fn all(rules: Vec<Rule>) -> Self {
        Self {
            logic: GroupLogic::And,
            rules,
            groups: Vec::new(),
        }
    }

    pub fn any(rules: Vec<Rule>) -> Self {
        Self {
            logic: GroupLogic::Or,
            rules,
            groups: Vec::new(),
        }
    }
}

/// Per-rule audit entry produced during evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleTrace {
    pub field: String,
    pub operator: String,
    pub expected: Value,
    pub actual: Value,
    pub matched: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: f64,
}

/// Evaluate a rule group, appending per-rule entries to `trace`.
///
/// Evaluation errors (type mismatch, invalid regex) mark the rule unmatched
/// with an attached error string; the group continues.
pub fn evaluate_group(group: &RuleGroup, root: &Value, trace: &mut Vec<RuleTrace>) -> bool {
    match group.logic {
        GroupLogic::And => {
            for rule in &group.rules {
                if !evaluate_rule(rule, root, trace) {
                    return false;
                }
            }
            for sub in &group.groups {
                if !evaluate_group(sub, root, trace) {
                    return false;
                }
            }
            true
        }
        GroupLogic::Or => {
            for rule in &group.rules {
                if evaluate_rule(rule, root, trace) {
                    return true;
                }
            }
            for sub in &group.groups {
                if evaluate_group(sub, root, trace) {
                    return true;
                }
            }
            false
        }
    }
}

fn evaluate_rule(rule: &Rule, root: &Value, trace: &mut Vec<RuleTrace>) -> bool {
    let started = Instant::now();
    let resolved = walk(root, &rule.field);
    let (matched, error) = apply_operator(rule.operator, &resolved, &rule.value);

    if let Some(err) = &error {
        log::warn!(
            "rule on field '{}' ({}) did not evaluate cleanly: {err}",
            rule.field,
            rule.operator.as_str()
        );
    }

    trace.push(RuleTrace {
        field: rule.field.clone(),
        operator: rule.operator.as_str().to_string(),
        expected: rule.value.clone(),
        actual: resolved.value().cloned().unwrap_or(Value::Null),
        matched,
        error,
        duration_ms: started.elapsed().as_secs_f64() * 1000.0,
    });
    matched
}

/// Apply one operator. Returns (matched, optional error string).
fn apply_operator(op: RuleOperator, actual: &PathValue, expected: &Value) -> (bool, Option<String>) {
    // Undefined compares unequal to every scalar: only `ne` can match it.
    let actual = match actual {
        PathValue::Undefined => {
            return match op {
                RuleOperator::Ne => (true, None),
                _ => (false, None),
            };
        }
        PathValue::Found(v) => v,
    };

    match op {
        RuleOperator::Eq => (actual == expected, None),
        RuleOperator::Ne => (actual != expected, None),
        RuleOperator::Gt | RuleOperator::Lt | RuleOperator::Gte | RuleOperator::Lte => {
            match (actual.as_f64(), expected.as_f64()) {
                (Some(a), Some(e)) => {
                    let matched = match op {
                        RuleOperator::Gt => a > e,
                        RuleOperator::Lt => a < e,
                        RuleOperator::Gte => a >= e,
                        RuleOperator::Lte => a <= e,
                        _ => unreachable!(),
                    };
                    (matched, None)
                }
                _ => (
                    false,
                    Some(format!(
                        "numeric comparison requires numbers, got {} vs {}",
                        type_name(actual),
                        type_name(expected)
                    )),
                ),
            }
        }
        RuleOperator::In => match expected.as_array() {
            Some(candidates) => (candidates.contains(actual), None),
            None => (
                false,
                Some("'in' requires an array expectation".to_string()),
            ),
        },
        RuleOperator::Contains => match (actual, expected) {
            (Value::String(haystack), Value::String(needle)) => (haystack.contains(needle), None),
            (Value::Array(items), needle) => (items.contains(needle), None),
            _ => (
                false,
                Some(format!(
                    "'contains' requires a string or array field, got {}",
                    type_name(actual)
                )),
            ),
        },
        RuleOperator::Matches => {
            let pattern = match expected.as_str() {
                Some(p) => p,
                None => {
                    return (false, Some("'matches' requires a string pattern".to_string()));
                }
            };
            let subject = match actual.as_str() {
                Some(s) => s,
                None => {
                    return (
                        false,
                        Some(format!("'matches' requires a string field, got {}", type_name(actual))),
                    );
                }
            };
            match Regex::new(pattern) {
                Ok(re) => (re.is_match(subject), None),
                Err(e) => (false, Some(format!("invalid regex: {e}"))),
            }
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
