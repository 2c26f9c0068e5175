//! BASIS policy bundles: parse, validate, serialize, cache.
//!
//! A bundle is a versioned declarative artifact (YAML or JSON) of
//! constraints and obligations governing one or more agents. Bundles are
//! authored offline, parsed once, and cached keyed by
//! (tenant, policy_id, version).

pub mod constraint;
pub mod parser;
pub mod registry;
pub mod store;
pub mod validate;

pub use constraint::{
    Constraint, ConstraintAction, ConstraintKind, ConstraintScope, Obligation, ObligationTrigger,
};
pub use parser::{detect_format, parse, serialize, BundleFormat};
pub use registry::BundleRegistry;
pub use store::BundleStore;
pub use validate::ValidationIssue;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Basis-language versions this engine understands.
pub const SUPPORTED_BASIS_VERSIONS: [&str; 2] = ["1.0", "1.1"];

/// Bundle metadata block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleMetadata {
    pub name: String,
    /// Semver `MAJOR.MINOR.PATCH[-pre]`.
    pub version: String,
    pub created_at: DateTime<Utc>,
}

/// A parsed, validated policy bundle.
#[derive(Debug, Clone)]
pub struct PolicyBundle {
    pub basis_version: String,
    /// Lowercase-kebab identifier, 3-64 chars.
    pub policy_id: String,
    pub metadata: BundleMetadata,
    pub constraints: Vec<Constraint>,
    pub obligations: Vec<Obligation>,
}

impl PolicyBundle {
    /// Cache key within a tenant.
    pub fn cache_key(&self) -> (String, String) {
        (self.policy_id.clone(), self.metadata.version.clone())
    }

    /// Enabled constraints only, in declared order.
    pub fn enabled_constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter().filter(|c| c.enabled)
    }
}
