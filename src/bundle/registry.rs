//! Bundle registry: parsed-bundle cache with atomic snapshot installs.
//!
//! Bundles are read-mostly. Each parsed bundle is held behind an `Arc`
//! keyed by (tenant, policy_id, version); installing a newer version
//! atomically replaces the tenant's active snapshot for that policy id.
//! Registries can bulk-load a directory of `.yaml`/`.yml`/`.json` files.

use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;

use super::parser::parse;
use super::PolicyBundle;
use crate::errors::BundleError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct VersionKey {
    tenant_id: String,
    policy_id: String,
    version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ActiveKey {
    tenant_id: String,
    policy_id: String,
}

/// Thread-safe registry of parsed bundles.
#[derive(Debug, Default)]
pub struct BundleRegistry {
    versions: DashMap<VersionKey, Arc<PolicyBundle>>,
    active: DashMap<ActiveKey, Arc<PolicyBundle>>,
}

impl BundleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a parsed bundle for a tenant and make it the active snapshot
    /// for its policy id. Returns the shared handle.
    pub fn install(&self, tenant_id: &str, bundle: PolicyBundle) -> Arc<PolicyBundle> {
        let shared = Arc::new(bundle);
        self.versions.insert(
            VersionKey {
                tenant_id: tenant_id.to_string(),
                policy_id: shared.policy_id.clone(),
                version: shared.metadata.version.clone(),
            },
            Arc::clone(&shared),
        );
        self.active.insert(
            ActiveKey {
                tenant_id: tenant_id.to_string(),
                policy_id: shared.policy_id.clone(),
            },
            Arc::clone(&shared),
        );
        log::info!(
            "installed bundle {}@{} for tenant {}",
            shared.policy_id,
            shared.metadata.version,
            tenant_id
        );
        shared
    }

    /// Parse raw bytes and install on success.
    pub fn install_bytes(
        &self,
        tenant_id: &str,
        bytes: &[u8],
    ) -> Result<Arc<PolicyBundle>, BundleError> {
        let bundle = parse(bytes, None)?;
        Ok(self.install(tenant_id, bundle))
    }

    /// The active snapshot for a policy id, if any.
    pub fn active(&self, tenant_id: &str, policy_id: &str) -> Option<Arc<PolicyBundle>> {
        self.active
            .get(&ActiveKey {
                tenant_id: tenant_id.to_string(),
                policy_id: policy_id.to_string(),
            })
            .map(|entry| Arc::clone(entry.value()))
    }

    /// A specific cached version.
    pub fn get_version(
        &self,
        tenant_id: &str,
        policy_id: &str,
        version: &str,
    ) -> Option<Arc<PolicyBundle>> {
        self.versions
            .get(&VersionKey {
                tenant_id: tenant_id.to_string(),
                policy_id: policy_id.to_string(),
                version: version.to_string(),
            })
            .map(|entry| Arc::clone(entry.value()))
    }

    /// All active bundles for a tenant, in no particular order.
    pub fn active_for_tenant(&self, tenant_id: &str) -> Vec<Arc<PolicyBundle>> {
        self.active
            .iter()
            .filter(|entry| entry.key().tenant_id == tenant_id)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Load every bundle file in a directory (non-recursive) for a tenant.
    /// Files that fail to parse are skipped with a warning; the count of
    /// installed bundles is returned.
    pub fn load_directory(&self, tenant_id: &str, dir: &Path) -> Result<usize, std::io::Error> {
        let mut count = 0;
        if !dir.exists() {
            return Ok(0);
        }
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_bundle = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| matches!(e, "yaml" | "yml" | "json"))
                .unwrap_or(false);
            if !is_bundle {
                continue;
            }
            let bytes = std::fs::read(&path)?;
            match self.install_bytes(tenant_id, &bytes) {
                Ok(_) => count += 1,
                Err(e) => {
                    log::warn!("skipping bundle file {}: {e}", path.display());
                }
            }
        }
        Ok(count)
    }

    /// Drop every cached bundle for a tenant.
    pub fn evict_tenant(&self, tenant_id: &str) {
        self.versions.retain(|key, _| key.tenant_id != tenant_id);
        self.active.retain(|key, _| key.tenant_id != tenant_id);
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}
