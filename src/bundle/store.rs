//! SQLite persistence for policy bundles and runtime policies.
//!
//! Bundle rows are immutable: installing a new version inserts a new row
//! and the registry snapshot moves forward. The in-memory registry is a
//! read-through cache over this store.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection};

use super::parser::{parse, serialize, BundleFormat};
use super::PolicyBundle;
use crate::engine::{Policy, PolicySet};
use crate::errors::GovernanceError;

/// SQLite-backed bundle and policy store.
#[derive(Debug, Clone)]
pub struct BundleStore {
    db_path: PathBuf,
}

impl BundleStore {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, GovernanceError> {
        let store = Self {
            db_path: db_path.as_ref().to_path_buf(),
        };
        store.initialize_db()?;
        Ok(store)
    }

    fn open(&self) -> Result<Connection, GovernanceError> {
        Connection::open(&self.db_path)
            .map_err(|e| GovernanceError::TransientStorage(format!("bundle store open: {e}")))
    }

    fn initialize_db(&self) -> Result<(), GovernanceError> {
        let conn = self.open()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS policy_bundles (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                policy_id TEXT NOT NULL,
                version TEXT NOT NULL,
                body_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_bundles_tenant_policy_version
                ON policy_bundles(tenant_id, policy_id, version);
            CREATE TABLE IF NOT EXISTS policies (
                id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                bundle_id TEXT,
                priority INTEGER NOT NULL,
                effect TEXT NOT NULL,
                rules_json TEXT NOT NULL,
                conditions_json TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (tenant_id, id)
            );",
        )
        .map_err(|e| GovernanceError::Config(format!("bundle store init: {e}")))
    }

    /// Persist a parsed bundle as an immutable row. Re-installing the same
    /// (tenant, policy_id, version) replaces the row byte-for-byte.
    pub fn insert_bundle(
        &self,
        tenant_id: &str,
        bundle: &PolicyBundle,
    ) -> Result<(), GovernanceError> {
        let body_json = serialize(bundle, BundleFormat::Json)
            .map_err(|e| GovernanceError::TransientStorage(e.to_string()))?;
        let conn = self.open()?;
        conn.execute(
            "INSERT OR REPLACE INTO policy_bundles
                 (id, tenant_id, policy_id, version, body_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                uuid::Uuid::new_v4().to_string(),
                tenant_id,
                bundle.policy_id,
                bundle.metadata.version,
                body_json,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| GovernanceError::TransientStorage(format!("insert bundle: {e}")))?;
        Ok(())
    }

    /// Load every stored bundle for a tenant, oldest row first. Rows that
    /// no longer validate are skipped with a warning rather than taking
    /// the tenant down.
    pub fn load_bundles(&self, tenant_id: &str) -> Result<Vec<PolicyBundle>, GovernanceError> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare(
                "SELECT body_json FROM policy_bundles
                 WHERE tenant_id = ?1 ORDER BY created_at ASC",
            )
            .map_err(|e| GovernanceError::TransientStorage(e.to_string()))?;
        let rows = stmt
            .query_map(params![tenant_id], |row| row.get::<_, String>(0))
            .map_err(|e| GovernanceError::TransientStorage(e.to_string()))?;

        let mut bundles = Vec::new();
        for row in rows {
            let body = row.map_err(|e| GovernanceError::TransientStorage(e.to_string()))?;
            match parse(body.as_bytes(), Some(BundleFormat::Json)) {
                Ok(bundle) => bundles.push(bundle),
                Err(e) => log::warn!("skipping stored bundle for tenant {tenant_id}: {e}"),
            }
        }
        Ok(bundles)
    }

    /// Persist a runtime policy.
    pub fn upsert_policy(&self, tenant_id: &str, policy: &Policy) -> Result<(), GovernanceError> {
        let rules_json = serde_json::to_string(&policy.rules)
            .map_err(|e| GovernanceError::TransientStorage(e.to_string()))?;
        let conditions_json = serde_json::to_string(&policy.conditions)
            .map_err(|e| GovernanceError::TransientStorage(e.to_string()))?;
        let now = Utc::now().to_rfc3339();
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO policies
                 (id, tenant_id, bundle_id, priority, effect, rules_json,
                  conditions_json, enabled, created_at, updated_at)
             VALUES (?1, ?2, NULL, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT(tenant_id, id) DO UPDATE SET
                 priority = excluded.priority,
                 effect = excluded.effect,
                 rules_json = excluded.rules_json,
                 conditions_json = excluded.conditions_json,
                 enabled = excluded.enabled,
                 updated_at = excluded.updated_at",
            params![
                policy.id,
                tenant_id,
                policy.priority,
                policy.effect.as_str(),
                rules_json,
                conditions_json,
                policy.enabled,
                now,
            ],
        )
        .map_err(|e| GovernanceError::TransientStorage(format!("upsert policy: {e}")))?;
        Ok(())
    }

    /// Load a tenant's runtime policies.
    pub fn load_policies(&self, tenant_id: &str) -> Result<PolicySet, GovernanceError> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, priority, effect, rules_json, conditions_json, enabled
                 FROM policies WHERE tenant_id = ?1",
            )
            .map_err(|e| GovernanceError::TransientStorage(e.to_string()))?;
        let rows = stmt
            .query_map(params![tenant_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i32>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, bool>(5)?,
                ))
            })
            .map_err(|e| GovernanceError::TransientStorage(e.to_string()))?;

        let mut set = PolicySet::default();
        for row in rows {
            let (id, priority, effect, rules_json, conditions_json, enabled) =
                row.map_err(|e| GovernanceError::TransientStorage(e.to_string()))?;
            let effect = match effect.as_str() {
                "allow" => crate::engine::PolicyEffect::Allow,
                "deny" => crate::engine::PolicyEffect::Deny,
                other => {
                    log::warn!("stored policy {id} has unknown effect '{other}', skipping");
                    continue;
                }
            };
            let rules = match serde_json::from_str(&rules_json) {
                Ok(rules) => rules,
                Err(e) => {
                    log::warn!("stored policy {id} has unreadable rules: {e}");
                    continue;
                }
            };
            let conditions = serde_json::from_str(&conditions_json).unwrap_or_default();
            set.push(Policy {
                name: id.clone(),
                id,
                priority,
                effect,
                rules,
                conditions,
                enabled,
            });
        }
        Ok(set)
    }
}
