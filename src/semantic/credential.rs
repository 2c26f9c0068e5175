//! Semantic credentials: the per-agent configuration the five validators
//! enforce, plus the DID-keyed credential store.
//!
//! Credentials are authored offline (YAML or JSON), loaded once, and cached
//! by DID. Revocation events evict the affected DID and any descendants the
//! trust service names.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use super::inference::{InferenceLevel, PiiHandling};
use crate::errors::GovernanceError;
use crate::patterns::PatternSeverity;
use crate::trust::TrustTier;

/// A parametric instruction template. `{{name}}` segments in the
/// description become named capture groups when matched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructionTemplate {
    pub id: String,
    /// Human-readable template, e.g. `Summarize the {{document}} report`.
    pub description: String,
    /// JSON schema the extracted parameters must satisfy.
    #[serde(default)]
    pub parameter_schema: Value,
}

/// An instruction source an agent will accept instructions from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructionSource {
    /// Glob over source identifiers, trailing `*` is a prefix match.
    pub pattern: String,
    #[serde(default)]
    pub require_signature: bool,
    /// Shared verification key, present when signatures are required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Section (a): what instructions the agent may act on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstructionIntegrity {
    /// Approved exact hashes, `sha256:<hex>` over the normalized text.
    #[serde(default)]
    pub allowed_hashes: BTreeSet<String>,
    #[serde(default)]
    pub templates: Vec<InstructionTemplate>,
    #[serde(default)]
    pub allowed_sources: Vec<InstructionSource>,
}

/// Section (b): what the agent may emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputBinding {
    /// Output is accepted when any schema matches.
    #[serde(default)]
    pub allowed_schemas: Vec<Value>,
    /// Extra prohibited patterns beyond the built-in catalogue, as regex
    /// source strings compiled at load.
    #[serde(default)]
    pub prohibited_patterns: Vec<String>,
    /// Endpoint globs; block wins over allow.
    #[serde(default)]
    pub allowed_endpoints: Vec<String>,
    #[serde(default)]
    pub blocked_endpoints: Vec<String>,
    /// Hits at or above this severity deny the output.
    #[serde(default = "default_severity_threshold")]
    pub severity_threshold: PatternSeverity,
}

fn default_severity_threshold() -> PatternSeverity {
    PatternSeverity::Medium
}

impl Default for OutputBinding {
    fn default() -> Self {
        Self {
            allowed_schemas: Vec::new(),
            prohibited_patterns: Vec::new(),
            allowed_endpoints: Vec::new(),
            blocked_endpoints: Vec::new(),
            severity_threshold: default_severity_threshold(),
        }
    }
}

/// Retention rules for derived knowledge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Whether knowledge may outlive the session.
    #[serde(default)]
    pub allow_persistent: bool,
    /// Recipients derived knowledge may be shared with; empty means none.
    #[serde(default)]
    pub allowed_recipients: Vec<String>,
}

/// PII-in-inference rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiPolicy {
    #[serde(default)]
    pub allowed: bool,
    #[serde(default)]
    pub handling: PiiHandling,
}

impl Default for PiiPolicy {
    fn default() -> Self {
        Self {
            allowed: false,
            handling: PiiHandling::default(),
        }
    }
}

/// Section (c): how far the agent may infer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceScope {
    #[serde(default = "default_max_level")]
    pub max_level: InferenceLevel,
    /// Tighter caps for particular source domains.
    #[serde(default)]
    pub domain_overrides: HashMap<String, InferenceLevel>,
    #[serde(default)]
    pub retention: RetentionPolicy,
    #[serde(default)]
    pub pii: PiiPolicy,
}

fn default_max_level() -> InferenceLevel {
    InferenceLevel::Aggregate
}

impl Default for InferenceScope {
    fn default() -> Self {
        Self {
            max_level: default_max_level(),
            domain_overrides: HashMap::new(),
            retention: RetentionPolicy::default(),
            pii: PiiPolicy::default(),
        }
    }
}

/// A context provider the agent recognizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub tier: TrustTier,
    #[serde(default)]
    pub domains: BTreeSet<String>,
    /// Shared key used to verify content signatures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Content-integrity rules for context items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentIntegrity {
    #[serde(default)]
    pub signature_required: bool,
    /// Maximum content age; items older than this are stale.
    #[serde(default = "default_max_age")]
    pub max_age_seconds: u64,
    /// Accepted detected formats.
    #[serde(default = "default_mime_types")]
    pub allowed_mime_types: BTreeSet<String>,
}

fn default_max_age() -> u64 {
    3600
}

fn default_mime_types() -> BTreeSet<String> {
    BTreeSet::from([
        "application/json".to_string(),
        "text/plain".to_string(),
    ])
}

impl Default for ContentIntegrity {
    fn default() -> Self {
        Self {
            signature_required: false,
            max_age_seconds: default_max_age(),
            allowed_mime_types: default_mime_types(),
        }
    }
}

/// Section (d): which context the agent may consume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextAuthentication {
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_provider_tier: Option<TrustTier>,
    #[serde(default)]
    pub required_domains: BTreeSet<String>,
    /// Provider-id globs. Block is checked first and wins.
    #[serde(default)]
    pub allow_patterns: Vec<String>,
    #[serde(default)]
    pub block_patterns: Vec<String>,
    #[serde(default)]
    pub content_integrity: ContentIntegrity,
    /// Known providers, keyed by provider id.
    #[serde(default)]
    pub providers: HashMap<String, ProviderProfile>,
}

/// Section (e): control-plane vs data-plane separation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DualChannelConfig {
    #[serde(default = "default_true")]
    pub enforce: bool,
    /// Source globs that are always control plane.
    #[serde(default)]
    pub control_plane_sources: Vec<String>,
    /// Source globs that are always data plane.
    #[serde(default)]
    pub data_plane_sources: Vec<String>,
    #[serde(default)]
    pub data_plane_treatment: super::dual_channel::DataPlaneTreatment,
}

fn default_true() -> bool {
    true
}

impl Default for DualChannelConfig {
    fn default() -> Self {
        Self {
            enforce: true,
            control_plane_sources: Vec::new(),
            data_plane_sources: Vec::new(),
            data_plane_treatment: super::dual_channel::DataPlaneTreatment::default(),
        }
    }
}

/// The full per-agent credential.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemanticCredential {
    pub did: String,
    #[serde(default)]
    pub instruction_integrity: InstructionIntegrity,
    #[serde(default)]
    pub output_binding: OutputBinding,
    #[serde(default)]
    pub inference_scope: InferenceScope,
    #[serde(default)]
    pub context_authentication: ContextAuthentication,
    #[serde(default)]
    pub dual_channel: DualChannelConfig,
}

impl SemanticCredential {
    /// Validate load-time invariants. Invalid credentials refuse to serve
    /// the agent rather than failing open at evaluation time.
    pub fn validate(&self) -> Result<(), GovernanceError> {
        if self.did.is_empty() {
            return Err(GovernanceError::Config(
                "credential is missing a did".to_string(),
            ));
        }
        for pattern in &self.output_binding.prohibited_patterns {
            if let Err(e) = regex::Regex::new(pattern) {
                return Err(GovernanceError::Config(format!(
                    "credential {}: prohibited pattern '{pattern}' is invalid: {e}",
                    self.did
                )));
            }
        }
        for source in &self.instruction_integrity.allowed_sources {
            if source.require_signature && source.key.is_none() {
                return Err(GovernanceError::Config(format!(
                    "credential {}: source '{}' requires signatures but has no key",
                    self.did, source.pattern
                )));
            }
        }
        for hash in &self.instruction_integrity.allowed_hashes {
            if !hash.starts_with("sha256:") {
                return Err(GovernanceError::Config(format!(
                    "credential {}: allowed hash '{hash}' is not sha256-prefixed",
                    self.did
                )));
            }
        }
        Ok(())
    }
}

/// DID-keyed credential store with a read-through cache.
///
/// The backing source is a directory of credential files; the cache is
/// invalidated per-DID on revocation events.
#[derive(Debug, Default)]
pub struct CredentialStore {
    cache: DashMap<String, Arc<SemanticCredential>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a credential after validating it.
    pub fn register(&self, credential: SemanticCredential) -> Result<(), GovernanceError> {
        credential.validate()?;
        self.cache
            .insert(credential.did.clone(), Arc::new(credential));
        Ok(())
    }

    pub fn get(&self, did: &str) -> Option<Arc<SemanticCredential>> {
        self.cache.get(did).map(|entry| Arc::clone(entry.value()))
    }

    /// Evict one DID, e.g. on a revocation event.
    pub fn invalidate(&self, did: &str) {
        if self.cache.remove(did).is_some() {
            log::info!("evicted credential cache for {did}");
        }
    }

    /// Evict a DID and every descendant the revocation propagated to.
    pub fn invalidate_many<'a>(&self, dids: impl IntoIterator<Item = &'a str>) {
        for did in dids {
            self.invalidate(did);
        }
    }

    /// Load every credential file in a directory. Invalid files are
    /// load-time config errors collected into the result.
    pub fn load_directory(&self, dir: &Path) -> Result<usize, GovernanceError> {
        let mut count = 0;
        let entries = std::fs::read_dir(dir)
            .map_err(|e| GovernanceError::Config(format!("credential dir {dir:?}: {e}")))?;
        for entry in entries {
            let path = entry
                .map_err(|e| GovernanceError::Config(e.to_string()))?
                .path();
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            if !matches!(ext, "yaml" | "yml" | "json") {
                continue;
            }
            let bytes = std::fs::read(&path)
                .map_err(|e| GovernanceError::Config(format!("{}: {e}", path.display())))?;
            let credential: SemanticCredential = if ext == "json" {
                serde_json::from_slice(&bytes)
                    .map_err(|e| GovernanceError::Config(format!("{}: {e}", path.display())))?
            } else {
                serde_yaml::from_slice(&bytes)
                    .map_err(|e| GovernanceError::Config(format!("{}: {e}", path.display())))?
            };
            self.register(credential)?;
            count += 1;
        }
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
