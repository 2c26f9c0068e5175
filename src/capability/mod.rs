//! Capability taxonomy: hierarchical permission strings.
//!
//! A capability is `namespace:category/action[/scope]`. Wildcards are legal
//! only as a trailing segment (`data:read/*`) or as a whole-namespace grant
//! (`data:*`). A bare `*` is rejected at parse time.

pub mod derive;
pub mod registry;

pub use derive::{detect_cycle, CapabilityScope};
pub use registry::{CapabilityRegistry, TierRule};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error produced when a capability string does not match the grammar.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid capability '{input}': {reason}")]
pub struct CapabilityParseError {
    pub input: String,
    pub reason: String,
}

static NAMESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+$").expect("namespace regex"));
static SEGMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9_]+$").expect("segment regex"));

/// A parsed capability.
///
/// `segments` holds category, action and any scope path; `wildcard` marks a
/// trailing `*`. A namespace-wide grant (`ns:*`) has empty segments and
/// `wildcard == true`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Capability {
    pub namespace: String,
    pub segments: Vec<String>,
    pub wildcard: bool,
}

impl Capability {
    /// Parse a capability string against the taxonomy grammar.
    pub fn parse(input: &str) -> Result<Self, CapabilityParseError> {
        let fail = |reason: &str| CapabilityParseError {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        if input == "*" {
            return Err(fail("a bare '*' grants everything and is rejected"));
        }
        let (namespace, rest) = input
            .split_once(':')
            .ok_or_else(|| fail("missing ':' between namespace and category"))?;
        if !NAMESPACE_RE.is_match(namespace) {
            return Err(fail("namespace must be [a-z0-9]+"));
        }

        if rest == "*" {
            return Ok(Self {
                namespace: namespace.to_string(),
                segments: Vec::new(),
                wildcard: true,
            });
        }

        let mut segments: Vec<String> = Vec::new();
        let mut wildcard = false;
        let raw: Vec<&str> = rest.split('/').collect();
        for (i, seg) in raw.iter().enumerate() {
            if *seg == "*" {
                if i != raw.len() - 1 {
                    return Err(fail("'*' is only legal as the final segment"));
                }
                wildcard = true;
            } else if SEGMENT_RE.is_match(seg) {
                segments.push((*seg).to_string());
            } else {
                return Err(fail("segments must be [a-z0-9_]+"));
            }
        }
        if segments.is_empty() {
            return Err(fail("missing category segment"));
        }
        if !wildcard && segments.len() < 2 {
            return Err(fail("a concrete capability needs category and action"));
        }
        Ok(Self {
            namespace: namespace.to_string(),
            segments,
            wildcard,
        })
    }

    pub fn category(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }

    pub fn action(&self) -> Option<&str> {
        self.segments.get(1).map(String::as_str)
    }

    pub fn scope(&self) -> Option<&str> {
        self.segments.get(2).map(String::as_str)
    }

    /// Whether this capability names a single concrete permission.
    pub fn is_concrete(&self) -> bool {
        !self.wildcard
    }

    /// Whether this (possibly wildcard) grant covers `requested`.
    ///
    /// Exact equality always matches. `ns:*` covers every capability in the
    /// namespace. A trailing `/*` covers any requested capability whose
    /// leading segments equal the grant's segments.
    pub fn covers(&self, requested: &Capability) -> bool {
        if self.namespace != requested.namespace {
            return false;
        }
        if !self.wildcard {
            return self.segments == requested.segments && !requested.wildcard;
        }
        if self.segments.is_empty() {
            return true;
        }
        requested.segments.len() >= self.segments.len()
            && requested.segments[..self.segments.len()] == self.segments[..]
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.namespace)?;
        let mut first = true;
        for seg in &self.segments {
            if !first {
                write!(f, "/")?;
            }
            write!(f, "{seg}")?;
            first = false;
        }
        if self.wildcard {
            if !first {
                write!(f, "/")?;
            }
            write!(f, "*")?;
        }
        Ok(())
    }
}

impl Serialize for Capability {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Capability {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Capability::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Whether any grant in `granted` covers `requested`.
pub fn matches(granted: &[Capability], requested: &Capability) -> bool {
    granted.iter().any(|g| g.covers(requested))
}
