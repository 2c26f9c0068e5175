//! SQLite storage for trust profiles, attestations and access tokens.
//!
//! Profiles are keyed by (tenant_id, entity_id). Attestations double as
//! delegation records: the issuer delegated authority to the subject.
//! Writes go straight to the store; the service layer owns caching.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{TrustProfile, TrustTier};
use crate::capability::Capability;
use crate::errors::GovernanceError;

/// One attestation row: issuer vouches for subject within a scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationRow {
    pub id: String,
    pub subject: String,
    pub issuer: String,
    pub scope: String,
    pub tier: TrustTier,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

/// One outstanding access token derived from a delegation chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenRow {
    pub id: String,
    pub entity_id: String,
    pub expires_at: DateTime<Utc>,
    pub expired: bool,
}

/// SQLite-backed trust store.
#[derive(Debug, Clone)]
pub struct TrustStore {
    db_path: PathBuf,
}

impl TrustStore {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, GovernanceError> {
        let store = Self {
            db_path: db_path.as_ref().to_path_buf(),
        };
        store.initialize_db()?;
        Ok(store)
    }

    fn open(&self) -> Result<Connection, GovernanceError> {
        Connection::open(&self.db_path)
            .map_err(|e| GovernanceError::TransientStorage(format!("trust store open: {e}")))
    }

    fn initialize_db(&self) -> Result<(), GovernanceError> {
        let conn = self.open()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS trust_profiles (
                entity_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                score INTEGER NOT NULL,
                tier TEXT NOT NULL,
                domains TEXT NOT NULL,
                granted_capabilities TEXT NOT NULL,
                revoked INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (tenant_id, entity_id)
            );
            CREATE TABLE IF NOT EXISTS attestations (
                id TEXT PRIMARY KEY,
                subject TEXT NOT NULL,
                issuer TEXT NOT NULL,
                scope TEXT NOT NULL,
                tier TEXT NOT NULL,
                issued_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                evidence_json TEXT,
                revoked INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_attestations_issuer ON attestations(issuer);
            CREATE INDEX IF NOT EXISTS idx_attestations_subject ON attestations(subject);
            CREATE TABLE IF NOT EXISTS access_tokens (
                id TEXT PRIMARY KEY,
                entity_id TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                expired INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_tokens_entity ON access_tokens(entity_id);",
        )
        .map_err(|e| GovernanceError::Config(format!("trust store init: {e}")))
    }

    pub fn upsert_profile(&self, profile: &TrustProfile) -> Result<(), GovernanceError> {
        let conn = self.open()?;
        let domains = serde_json::to_string(&profile.domains)
            .map_err(|e| GovernanceError::TransientStorage(e.to_string()))?;
        let capabilities: Vec<String> = profile
            .granted_capabilities
            .iter()
            .map(|c| c.to_string())
            .collect();
        let capabilities = serde_json::to_string(&capabilities)
            .map_err(|e| GovernanceError::TransientStorage(e.to_string()))?;
        conn.execute(
            "INSERT INTO trust_profiles
                 (entity_id, tenant_id, score, tier, domains, granted_capabilities, revoked, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)
             ON CONFLICT(tenant_id, entity_id) DO UPDATE SET
                 score = excluded.score,
                 tier = excluded.tier,
                 domains = excluded.domains,
                 granted_capabilities = excluded.granted_capabilities,
                 updated_at = excluded.updated_at",
            params![
                profile.entity_id,
                profile.tenant_id,
                profile.score,
                profile.tier.as_str(),
                domains,
                capabilities,
                profile.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| GovernanceError::TransientStorage(format!("upsert profile: {e}")))?;
        Ok(())
    }

    /// Load one profile plus its revocation flag.
    pub fn get_profile(
        &self,
        tenant_id: &str,
        entity_id: &str,
    ) -> Result<Option<(TrustProfile, bool)>, GovernanceError> {
        let conn = self.open()?;
        let row = conn
            .query_row(
                "SELECT score, domains, granted_capabilities, revoked, updated_at
                 FROM trust_profiles WHERE tenant_id = ?1 AND entity_id = ?2",
                params![tenant_id, entity_id],
                |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| GovernanceError::TransientStorage(format!("get profile: {e}")))?;

        let Some((score, domains, capabilities, revoked, updated_at)) = row else {
            return Ok(None);
        };

        let mut profile = TrustProfile::new(entity_id, tenant_id, score);
        profile.domains = serde_json::from_str(&domains).unwrap_or_default();
        let capability_strings: Vec<String> =
            serde_json::from_str(&capabilities).unwrap_or_default();
        profile.granted_capabilities = capability_strings
            .iter()
            .filter_map(|raw| match Capability::parse(raw) {
                Ok(cap) => Some(cap),
                Err(e) => {
                    log::warn!("dropping stored capability '{raw}': {e}");
                    None
                }
            })
            .collect();
        if let Ok(ts) = updated_at.parse::<DateTime<Utc>>() {
            profile.updated_at = ts;
        }
        Ok(Some((profile, revoked)))
    }

    /// Apply a score delta, clamped to 0-1000, and return the new score.
    pub fn adjust_score(
        &self,
        tenant_id: &str,
        entity_id: &str,
        delta: i32,
    ) -> Result<Option<u32>, GovernanceError> {
        let conn = self.open()?;
        let current: Option<u32> = conn
            .query_row(
                "SELECT score FROM trust_profiles WHERE tenant_id = ?1 AND entity_id = ?2",
                params![tenant_id, entity_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| GovernanceError::TransientStorage(format!("adjust score: {e}")))?;
        let Some(current) = current else {
            return Ok(None);
        };
        let updated = (current as i64 + delta as i64).clamp(0, 1000) as u32;
        let tier = TrustTier::from_score(updated);
        conn.execute(
            "UPDATE trust_profiles SET score = ?3, tier = ?4, updated_at = ?5
             WHERE tenant_id = ?1 AND entity_id = ?2",
            params![
                tenant_id,
                entity_id,
                updated,
                tier.as_str(),
                Utc::now().to_rfc3339()
            ],
        )
        .map_err(|e| GovernanceError::TransientStorage(format!("adjust score: {e}")))?;
        Ok(Some(updated))
    }

    pub fn mark_revoked(&self, tenant_id: &str, entity_id: &str) -> Result<(), GovernanceError> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE trust_profiles SET revoked = 1, updated_at = ?3
             WHERE tenant_id = ?1 AND entity_id = ?2",
            params![tenant_id, entity_id, Utc::now().to_rfc3339()],
        )
        .map_err(|e| GovernanceError::TransientStorage(format!("mark revoked: {e}")))?;
        Ok(())
    }

    pub fn insert_attestation(&self, row: &AttestationRow) -> Result<(), GovernanceError> {
        let conn = self.open()?;
        conn.execute(
            "INSERT OR REPLACE INTO attestations
                 (id, subject, issuer, scope, tier, issued_at, expires_at, evidence_json, revoked)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8)",
            params![
                row.id,
                row.subject,
                row.issuer,
                row.scope,
                row.tier.as_str(),
                row.issued_at.to_rfc3339(),
                row.expires_at.to_rfc3339(),
                row.revoked,
            ],
        )
        .map_err(|e| GovernanceError::TransientStorage(format!("insert attestation: {e}")))?;
        Ok(())
    }

    /// Every non-revoked attestation, for building the delegation graph.
    pub fn active_attestations(&self) -> Result<Vec<AttestationRow>, GovernanceError> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, subject, issuer, scope, tier, issued_at, expires_at, revoked
                 FROM attestations WHERE revoked = 0",
            )
            .map_err(|e| GovernanceError::TransientStorage(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, bool>(7)?,
                ))
            })
            .map_err(|e| GovernanceError::TransientStorage(e.to_string()))?;

        let mut out = Vec::new();
        for row in rows {
            let (id, subject, issuer, scope, tier, issued_at, expires_at, revoked) =
                row.map_err(|e| GovernanceError::TransientStorage(e.to_string()))?;
            out.push(AttestationRow {
                id,
                subject,
                issuer,
                scope,
                tier: tier_from_str(&tier),
                issued_at: issued_at.parse().unwrap_or_else(|_| Utc::now()),
                expires_at: expires_at.parse().unwrap_or_else(|_| Utc::now()),
                revoked,
            });
        }
        Ok(out)
    }

    pub fn revoke_attestation(&self, id: &str) -> Result<(), GovernanceError> {
        let conn = self.open()?;
        conn.execute("UPDATE attestations SET revoked = 1 WHERE id = ?1", params![id])
            .map_err(|e| GovernanceError::TransientStorage(format!("revoke attestation: {e}")))?;
        Ok(())
    }

    pub fn insert_token(&self, token: &AccessTokenRow) -> Result<(), GovernanceError> {
        let conn = self.open()?;
        conn.execute(
            "INSERT OR REPLACE INTO access_tokens (id, entity_id, expires_at, expired)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                token.id,
                token.entity_id,
                token.expires_at.to_rfc3339(),
                token.expired
            ],
        )
        .map_err(|e| GovernanceError::TransientStorage(format!("insert token: {e}")))?;
        Ok(())
    }

    /// Expire every outstanding token for the given entities. Returns the
    /// number of tokens expired.
    pub fn expire_tokens_for(&self, entity_ids: &[String]) -> Result<usize, GovernanceError> {
        let conn = self.open()?;
        let mut total = 0;
        for entity_id in entity_ids {
            total += conn
                .execute(
                    "UPDATE access_tokens SET expired = 1 WHERE entity_id = ?1 AND expired = 0",
                    params![entity_id],
                )
                .map_err(|e| GovernanceError::TransientStorage(format!("expire tokens: {e}")))?;
        }
        Ok(total)
    }

    pub fn token_is_valid(&self, id: &str) -> Result<bool, GovernanceError> {
        let conn = self.open()?;
        let row: Option<(String, bool)> = conn
            .query_row(
                "SELECT expires_at, expired FROM access_tokens WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| GovernanceError::TransientStorage(e.to_string()))?;
        let Some((expires_at, expired)) = row else {
            return Ok(false);
        };
        if expired {
            return Ok(false);
        }
        let still_current = expires_at
            .parse::<DateTime<Utc>>()
            .map(|ts| ts > Utc::now())
            .unwrap_or(false);
        Ok(still_current)
    }
}

fn tier_from_str(raw: &str) -> TrustTier {
    match raw {
        "sandbox" => TrustTier::Sandbox,
        "provisional" => TrustTier::Provisional,
        "standard" => TrustTier::Standard,
        "trusted" => TrustTier::Trusted,
        "certified" => TrustTier::Certified,
        "autonomous" => TrustTier::Autonomous,
        other => {
            log::warn!("unknown tier '{other}' in store, defaulting to sandbox");
            TrustTier::Sandbox
        }
    }
}
