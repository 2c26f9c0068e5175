//! Bundle parsing and serialization for the two wire formats.
//!
//! The format is auto-detected from the first non-whitespace byte: `{` or
//! `[` means JSON, anything else YAML. Parse failures surface the format
//! and, when the underlying parser reports one, the line and column.

use serde_json::Value;

use super::validate::{to_document, validate_and_build};
use super::PolicyBundle;
use crate::errors::BundleError;

/// Wire format of a bundle document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleFormat {
    Json,
    Yaml,
}

impl BundleFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            BundleFormat::Json => "json",
            BundleFormat::Yaml => "yaml",
        }
    }
}

/// Detect the format from the leading non-whitespace byte. Defaults to
/// YAML, which is a superset of scalar-ish documents.
pub fn detect_format(bytes: &[u8]) -> BundleFormat {
    match bytes.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'{') | Some(b'[') => BundleFormat::Json,
        _ => BundleFormat::Yaml,
    }
}

/// Parse and validate a bundle document.
///
/// `format` overrides auto-detection when the caller already knows the
/// encoding. There are no partial parses: any validation issue fails the
/// whole document.
pub fn parse(bytes: &[u8], format: Option<BundleFormat>) -> Result<PolicyBundle, BundleError> {
    let format = format.unwrap_or_else(|| detect_format(bytes));

    let doc: Value = match format {
        BundleFormat::Json => serde_json::from_slice(bytes).map_err(|e| BundleError::Parse {
            format: "json",
            message: e.to_string(),
            location: Some((e.line(), e.column())),
        })?,
        BundleFormat::Yaml => serde_yaml::from_slice(bytes).map_err(|e| BundleError::Parse {
            format: "yaml",
            message: e.to_string(),
            location: e.location().map(|l| (l.line(), l.column())),
        })?,
    };

    validate_and_build(&doc).map_err(|issues| {
        if let Some(unsupported) = issues.iter().find(|i| i.keyword == "unsupported_version") {
            log::debug!("bundle rejected: {}", unsupported.message);
        }
        BundleError::Invalid { issues }
    })
}

/// Serialize a bundle into the requested format.
///
/// Round-trips with [`parse`] up to whitespace and key order.
pub fn serialize(bundle: &PolicyBundle, format: BundleFormat) -> Result<String, BundleError> {
    let doc = to_document(bundle);
    match format {
        BundleFormat::Json => serde_json::to_string_pretty(&doc).map_err(|e| BundleError::Parse {
            format: "json",
            message: e.to_string(),
            location: None,
        }),
        BundleFormat::Yaml => serde_yaml::to_string(&doc).map_err(|e| BundleError::Parse {
            format: "yaml",
            message: e.to_string(),
            location: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{ConstraintAction, ConstraintKind};

    const YAML_BUNDLE: &str = r#"
basis_version: "1.1"
policy_id: exfiltration-guard
metadata:
  name: Exfiltration guard
  version: 2.0.1
  created_at: 2026-02-01T09:30:00Z
constraints:
  - type: tool_restriction
    action: block
    values: [shell_execute, file_delete]
  - type: data_protection
    action: redact
    named_pattern: ssn_us
obligations:
  - trigger: context.amount gte 1000
    action: notify_owner
    parameters:
      channel: approvals
"#;

    #[test]
    fn detects_json_by_leading_byte() {
        assert_eq!(detect_format(b"  {\"a\": 1}"), BundleFormat::Json);
        assert_eq!(detect_format(b"\n[1]"), BundleFormat::Json);
        assert_eq!(detect_format(b"basis_version: '1.0'"), BundleFormat::Yaml);
    }

    #[test]
    fn parses_yaml_bundle() {
        let bundle = parse(YAML_BUNDLE.as_bytes(), None).unwrap();
        assert_eq!(bundle.policy_id, "exfiltration-guard");
        assert_eq!(bundle.constraints.len(), 2);
        assert_eq!(bundle.constraints[0].kind, ConstraintKind::ToolRestriction);
        assert_eq!(bundle.constraints[1].action, ConstraintAction::Redact);
        assert_eq!(bundle.obligations.len(), 1);
    }

    #[test]
    fn parses_json_bundle() {
        let json = serde_json::json!({
            "basis_version": "1.0",
            "policy_id": "net-guard",
            "metadata": {
                "name": "Net guard",
                "version": "0.1.0",
                "created_at": "2026-01-01T00:00:00Z",
            },
            "constraints": [
                {"type": "egress_whitelist", "action": "block", "values": ["*.internal.example"]},
            ],
        })
        .to_string();
        let bundle = parse(json.as_bytes(), None).unwrap();
        assert_eq!(bundle.constraints[0].kind, ConstraintKind::EgressWhitelist);
    }

    #[test]
    fn json_parse_error_carries_location() {
        let err = parse(b"{\"basis_version\": ", None).unwrap_err();
        match err {
            BundleError::Parse {
                format, location, ..
            } => {
                assert_eq!(format, "json");
                assert!(location.is_some());
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn yaml_parse_error_is_yaml_flavored() {
        let err = parse(b"basis_version: [unclosed", None).unwrap_err();
        match err {
            BundleError::Parse { format, .. } => assert_eq!(format, "yaml"),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn round_trip_preserves_semantics() {
        let bundle = parse(YAML_BUNDLE.as_bytes(), None).unwrap();
        for format in [BundleFormat::Yaml, BundleFormat::Json] {
            let out = serialize(&bundle, format).unwrap();
            let again = parse(out.as_bytes(), None).unwrap();
            assert_eq!(again.policy_id, bundle.policy_id);
            assert_eq!(again.basis_version, bundle.basis_version);
            assert_eq!(again.constraints.len(), bundle.constraints.len());
            assert_eq!(
                again.constraints[0].values,
                bundle.constraints[0].values
            );
            assert_eq!(again.obligations.len(), bundle.obligations.len());
        }
    }

    #[test]
    fn format_hint_overrides_detection() {
        // A JSON document is also valid YAML; forcing YAML still parses.
        let json = serde_json::json!({
            "basis_version": "1.0",
            "policy_id": "hint-check",
            "metadata": {
                "name": "Hint check",
                "version": "0.0.1",
                "created_at": "2026-01-01T00:00:00Z",
            },
        })
        .to_string();
        assert!(parse(json.as_bytes(), Some(BundleFormat::Yaml)).is_ok());
    }
}
