//! Dot-separated field path walker over a JSON value tree.
//!
//! A missing segment resolves to [`PathValue::Undefined`], which compares
//! unequal to every scalar instead of erroring, so rules over absent fields
//! simply fail to match.

use serde_json::Value;

/// Resolution result for a field path.
#[derive(Debug, Clone, PartialEq)]
pub enum PathValue {
    /// The path resolved to a value (which may be JSON null).
    Found(Value),
    /// Some segment of the path does not exist.
    Undefined,
}

impl PathValue {
    pub fn is_undefined(&self) -> bool {
        matches!(self, PathValue::Undefined)
    }

    /// The resolved value, or `None` when undefined.
    pub fn value(&self) -> Option<&Value> {
        match self {
            PathValue::Found(v) => Some(v),
            PathValue::Undefined => None,
        }
    }
}

/// Walk `path` (e.g. `intent.context.trust_level`) through `root`.
///
/// Array segments accept numeric indexes (`tools.0`). Walking into a scalar
/// yields `Undefined`.
pub fn walk(root: &Value, path: &str) -> PathValue {
    let mut current = root;
    for segment in path.split('.') {
        if segment.is_empty() {
            return PathValue::Undefined;
        }
        match current {
            Value::Object(map) => match map.get(segment) {
                Some(next) => current = next,
                None => return PathValue::Undefined,
            },
            Value::Array(items) => match segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                Some(next) => current = next,
                None => return PathValue::Undefined,
            },
            _ => return PathValue::Undefined,
        }
    }
    PathValue::Found(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn walks_nested_objects() {
        let root = json!({"intent": {"context": {"trust_level": 3}}});
        assert_eq!(
            walk(&root, "intent.context.trust_level"),
            PathValue::Found(json!(3))
        );
    }

    #[test]
    fn missing_segment_is_undefined_not_error() {
        let root = json!({"intent": {"goal": "read"}});
        assert!(walk(&root, "intent.context.trust_level").is_undefined());
        assert!(walk(&root, "nothing").is_undefined());
    }

    #[test]
    fn walks_array_indexes() {
        let root = json!({"tools": ["file_read", "web_search"]});
        assert_eq!(walk(&root, "tools.1"), PathValue::Found(json!("web_search")));
        assert!(walk(&root, "tools.9").is_undefined());
        assert!(walk(&root, "tools.first").is_undefined());
    }

    #[test]
    fn scalar_traversal_is_undefined() {
        let root = json!({"goal": "read"});
        assert!(walk(&root, "goal.length").is_undefined());
    }

    #[test]
    fn null_is_found_not_undefined() {
        let root = json!({"content": null});
        assert_eq!(walk(&root, "content"), PathValue::Found(Value::Null));
    }
}
