//! A small JSON-Schema-like checker.
//!
//! Supports the subset the credentials use: `type`, `properties`,
//! `required`, `items`, `enum`, `pattern`, `minimum`/`maximum`,
//! `minLength`/`maxLength`. Anything the schema does not mention is
//! accepted, matching permissive JSON Schema semantics.

use regex::Regex;
use serde_json::Value;

/// One schema violation, path-first for readability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub path: String,
    pub message: String,
}

/// Check `value` against `schema`, collecting violations.
pub fn check(schema: &Value, value: &Value) -> Vec<SchemaViolation> {
    let mut violations = Vec::new();
    check_at(schema, value, "$", &mut violations);
    violations
}

/// Convenience wrapper: true when the value conforms.
pub fn conforms(schema: &Value, value: &Value) -> bool {
    check(schema, value).is_empty()
}

fn check_at(schema: &Value, value: &Value, path: &str, out: &mut Vec<SchemaViolation>) {
    let schema = match schema.as_object() {
        Some(map) => map,
        // A non-object schema (e.g. `true`) accepts everything.
        None => return,
    };

    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !type_matches(expected, value) {
            out.push(SchemaViolation {
                path: path.to_string(),
                message: format!("expected {expected}, got {}", json_type(value)),
            });
            return;
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            out.push(SchemaViolation {
                path: path.to_string(),
                message: "value is not one of the allowed set".to_string(),
            });
        }
    }

    match value {
        Value::Object(map) => {
            if let Some(required) = schema.get("required").and_then(Value::as_array) {
                for name in required.iter().filter_map(Value::as_str) {
                    if !map.contains_key(name) {
                        out.push(SchemaViolation {
                            path: format!("{path}.{name}"),
                            message: "required property is missing".to_string(),
                        });
                    }
                }
            }
            if let Some(props) = schema.get("properties").and_then(Value::as_object) {
                for (name, sub_schema) in props {
                    if let Some(sub_value) = map.get(name) {
                        check_at(sub_schema, sub_value, &format!("{path}.{name}"), out);
                    }
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for (i, item) in items.iter().enumerate() {
                    check_at(item_schema, item, &format!("{path}[{i}]"), out);
                }
            }
        }
        Value::String(s) => {
            if let Some(pattern) = schema.get("pattern").and_then(Value::as_str) {
                match Regex::new(pattern) {
                    Ok(re) => {
                        if !re.is_match(s) {
                            out.push(SchemaViolation {
                                path: path.to_string(),
                                message: format!("does not match pattern {pattern}"),
                            });
                        }
                    }
                    Err(e) => {
                        log::warn!("schema pattern at {path} is invalid: {e}");
                    }
                }
            }
            if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
                if (s.chars().count() as u64) < min {
                    out.push(SchemaViolation {
                        path: path.to_string(),
                        message: format!("shorter than minLength {min}"),
                    });
                }
            }
            if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
                if (s.chars().count() as u64) > max {
                    out.push(SchemaViolation {
                        path: path.to_string(),
                        message: format!("longer than maxLength {max}"),
                    });
                }
            }
        }
        Value::Number(n) => {
            if let (Some(min), Some(v)) = (schema.get("minimum").and_then(Value::as_f64), n.as_f64())
            {
                if v < min {
                    out.push(SchemaViolation {
                        path: path.to_string(),
                        message: format!("below minimum {min}"),
                    });
                }
            }
            if let (Some(max), Some(v)) = (schema.get("maximum").and_then(Value::as_f64), n.as_f64())
            {
                if v > max {
                    out.push(SchemaViolation {
                        path: path.to_string(),
                        message: format!("above maximum {max}"),
                    });
                }
            }
        }
        _ => {}
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.as_i64().is_some() || value.as_u64().is_some(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
