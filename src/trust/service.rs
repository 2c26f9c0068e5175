//! The trust and capability service.
//!
//! Resolves profiles through a tier-TTL cache, answers capability checks,
//! adjusts scores, and propagates revocations with tier-dependent SLAs.
//! Critical operations always re-check revocation against the store,
//! bypassing the cache.

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::revocation::{plan_revocation, DelegationGraph, RevocationOutcome};
use super::store::TrustStore;
use super::{TrustProfile, TrustTier};
use crate::capability::{self, Capability, CapabilityRegistry};
use crate::errors::GovernanceError;

/// Outcome of a capability check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityCheck {
    pub granted: bool,
    /// `granted`, `revoked`, `insufficient_trust_tier`,
    /// `insufficient_capability` or `capability_requires_escalation`.
    pub reason: String,
    pub requires_escalation: bool,
}

/// Context for a capability check.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckContext {
    /// Financial, PII-access, external-API and export operations are
    /// critical: revocation state is always re-read from the store.
    pub critical: bool,
}

#[derive(Debug, Clone)]
struct CachedProfile {
    profile: TrustProfile,
    revoked: bool,
    cached_at: Instant,
}

/// Evidence attached to a trust adjustment, kept for the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustEvidence {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// The trust service.
#[derive(Debug)]
pub struct TrustService {
    store: TrustStore,
    registry: CapabilityRegistry,
    cache: DashMap<(String, String), CachedProfile>,
}

impl TrustService {
    pub fn new(store: TrustStore) -> Self {
        Self {
            store,
            registry: CapabilityRegistry::new(),
            cache: DashMap::new(),
        }
    }

    pub fn with_registry(store: TrustStore, registry: CapabilityRegistry) -> Self {
        Self {
            store,
            registry,
            cache: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut CapabilityRegistry {
        &mut self.registry
    }

    pub fn store(&self) -> &TrustStore {
        &self.store
    }

    /// Register or replace a profile, writing through to the store.
    pub fn put_profile(&self, profile: &TrustProfile) -> Result<(), GovernanceError> {
        self.store.upsert_profile(profile)?;
        self.cache
            .remove(&(profile.tenant_id.clone(), profile.entity_id.clone()));
        Ok(())
    }

    /// Seed a profile from an externally issued ACI. The entity id is the
    /// ACI's dotted path, the score is the tier bucket midpoint, and the
    /// ACI tags become declared domains. ACIs are consumed, never minted.
    pub fn register_from_aci(
        &self,
        tenant_id: &str,
        aci_str: &str,
    ) -> Result<TrustProfile, GovernanceError> {
        let aci = super::aci::AciString::parse(aci_str).map_err(|message| {
            GovernanceError::Validation {
                path: "aci".to_string(),
                message,
            }
        })?;
        let mut profile =
            TrustProfile::new(aci.entity_path(), tenant_id, aci.tier.default_score());
        for tag in &aci.tags {
            profile.domains.insert(tag.clone());
        }
        self.put_profile(&profile)?;
        Ok(profile)
    }

    /// Resolve an entity's current profile. Cache TTL depends on the
    /// cached tier; T4+ profiles are never served from cache.
    pub fn resolve(
        &self,
        tenant_id: &str,
        entity_id: &str,
    ) -> Result<Option<TrustProfile>, GovernanceError> {
        self.resolve_with_flags(tenant_id, entity_id, false)
            .map(|opt| opt.map(|(profile, _)| profile))
    }

    fn resolve_with_flags(
        &self,
        tenant_id: &str,
        entity_id: &str,
        bypass_cache: bool,
    ) -> Result<Option<(TrustProfile, bool)>, GovernanceError> {
        let key = (tenant_id.to_string(), entity_id.to_string());
        if !bypass_cache {
            if let Some(cached) = self.cache.get(&key) {
                let ttl = Duration::from_secs(cached.profile.tier.cache_ttl_secs());
                if !ttl.is_zero() && cached.cached_at.elapsed() < ttl {
                    return Ok(Some((cached.profile.clone(), cached.revoked)));
                }
            }
        }

        let Some((profile, revoked)) = self.store.get_profile(tenant_id, entity_id)? else {
            self.cache.remove(&key);
            return Ok(None);
        };
        self.cache.insert(
            key,
            CachedProfile {
                profile: profile.clone(),
                revoked,
                cached_at: Instant::now(),
            },
        );
        Ok(Some((profile, revoked)))
    }

    /// Check whether an entity may exercise a capability.
    pub fn check_capability(
        &self,
        tenant_id: &str,
        entity_id: &str,
        requested: &Capability,
        ctx: CheckContext,
    ) -> Result<CapabilityCheck, GovernanceError> {
        let resolved = self.resolve_with_flags(tenant_id, entity_id, ctx.critical)?;
        let Some((profile, revoked)) = resolved else {
            return Ok(CapabilityCheck {
                granted: false,
                reason: "insufficient_capability".to_string(),
                requires_escalation: false,
            });
        };

        if revoked {
            return Ok(CapabilityCheck {
                granted: false,
                reason: "revoked".to_string(),
                requires_escalation: false,
            });
        }

        let rule = self.registry.rule_for(requested);

        // Escalation-required capabilities report the flag regardless of
        // grants; an override can lower the tier but never clears this.
        if rule.requires_escalation {
            return Ok(CapabilityCheck {
                granted: false,
                reason: "capability_requires_escalation".to_string(),
                requires_escalation: true,
            });
        }

        if profile.tier < rule.minimum_tier {
            return Ok(CapabilityCheck {
                granted: false,
                reason: "insufficient_trust_tier".to_string(),
                requires_escalation: false,
            });
        }

        if !capability::matches(&profile.granted_capabilities, requested) {
            return Ok(CapabilityCheck {
                granted: false,
                reason: "insufficient_capability".to_string(),
                requires_escalation: false,
            });
        }

        Ok(CapabilityCheck {
            granted: true,
            reason: "granted".to_string(),
            requires_escalation: false,
        })
    }

    /// Apply a score delta with supporting evidence. Returns the new score.
    pub fn adjust_trust(
        &self,
        tenant_id: &str,
        entity_id: &str,
        delta: i32,
        evidence: &TrustEvidence,
    ) -> Result<u32, GovernanceError> {
        let updated = self
            .store
            .adjust_score(tenant_id, entity_id, delta)?
            .ok_or_else(|| GovernanceError::Validation {
                path: "entity_id".to_string(),
                message: format!("unknown entity '{entity_id}'"),
            })?;
        self.cache
            .remove(&(tenant_id.to_string(), entity_id.to_string()));
        log::info!(
            "trust adjusted for {entity_id}: delta {delta}, new score {updated} ({})",
            evidence.description
        );
        Ok(updated)
    }

    /// Revoke an entity and propagate through its delegation chain.
    ///
    /// Every downstream delegate is marked revoked, their delegations are
    /// invalidated and outstanding tokens expired. The returned SLA is the
    /// propagation budget for the entity's tier.
    pub fn revoke(
        &self,
        tenant_id: &str,
        entity_id: &str,
        reason: &str,
    ) -> Result<RevocationOutcome, GovernanceError> {
        let tier = self
            .resolve(tenant_id, entity_id)?
            .map(|p| p.tier)
            .unwrap_or(TrustTier::Sandbox);

        let graph = DelegationGraph::from_attestations(&self.store.active_attestations()?);
        let mut outcome = plan_revocation(&graph, entity_id, tier).map_err(|cycle| {
            GovernanceError::Validation {
                path: "delegations".to_string(),
                message: format!("circular_dependency: {}", cycle.join(" -> ")),
            }
        })?;

        for entity in &outcome.revoked_entities {
            self.store.mark_revoked(tenant_id, entity)?;
            self.cache.remove(&(tenant_id.to_string(), entity.clone()));
        }
        for attestation_id in &outcome.invalidated_delegations {
            self.store.revoke_attestation(attestation_id)?;
        }
        outcome.expired_tokens = self.store.expire_tokens_for(&outcome.revoked_entities)?;

        let deadline = Utc::now()
            + chrono::Duration::milliseconds(outcome.sla_ms as i64);
        log::warn!(
            "revoked {entity_id} ({reason}); {} entities, {} delegations, {} tokens; propagation due {deadline}",
            outcome.revoked_entities.len(),
            outcome.invalidated_delegations.len(),
            outcome.expired_tokens,
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::TierRule;
    use crate::trust::store::{AccessTokenRow, AttestationRow};
    use chrono::Duration as ChronoDuration;

    fn service() -> (tempfile::TempDir, TrustService) {
        let dir = tempfile::tempdir().unwrap();
        let store = TrustStore::new(dir.path().join("trust.db")).unwrap();
        (dir, TrustService::new(store))
    }

    fn cap(s: &str) -> Capability {
        Capability::parse(s).unwrap()
    }

    #[test]
    fn resolve_caches_by_ttl() {
        let (_dir, service) = service();
        let profile = TrustProfile::new("agent-1", "tenant-a", 150);
        service.put_profile(&profile).unwrap();

        let first = service.resolve("tenant-a", "agent-1").unwrap().unwrap();
        assert_eq!(first.tier, TrustTier::Provisional);

        // A direct store write is invisible while the 60s T1 cache holds.
        service
            .store()
            .adjust_score("tenant-a", "agent-1", 500)
            .unwrap();
        let cached = service.resolve("tenant-a", "agent-1").unwrap().unwrap();
        assert_eq!(cached.score, 150);
    }

    #[test]
    fn high_tier_profiles_are_never_cached() {
        let (_dir, service) = service();
        service
            .put_profile(&TrustProfile::new("agent-1", "tenant-a", 920))
            .unwrap();
        service.resolve("tenant-a", "agent-1").unwrap().unwrap();

        service
            .store()
            .adjust_score("tenant-a", "agent-1", -500)
            .unwrap();
        // T5 has a zero TTL, so the new score is visible immediately.
        let fresh = service.resolve("tenant-a", "agent-1").unwrap().unwrap();
        assert_eq!(fresh.score, 420);
    }

    #[test]
    fn capability_check_paths() {
        let (_dir, service) = service();
        let profile = TrustProfile::new("agent-1", "tenant-a", 620)
            .with_capability(cap("data:read/*"));
        service.put_profile(&profile).unwrap();

        let granted = service
            .check_capability("tenant-a", "agent-1", &cap("data:read/sensitive"), CheckContext::default())
            .unwrap();
        assert!(granted.granted);
        assert_eq!(granted.reason, "granted");

        let no_grant = service
            .check_capability("tenant-a", "agent-1", &cap("comms:send/email"), CheckContext::default())
            .unwrap();
        assert!(!no_grant.granted);
        assert_eq!(no_grant.reason, "insufficient_capability");

        let escalation = service
            .check_capability(
                "tenant-a",
                "agent-1",
                &cap("financial:transaction/high"),
                CheckContext::default(),
            )
            .unwrap();
        assert!(escalation.requires_escalation);
        assert_eq!(escalation.reason, "capability_requires_escalation");
    }

    #[test]
    fn register_from_aci_seeds_profile() {
        let (_dir, service) = service();
        let profile = service
            .register_from_aci("tenant-a", "acme.sales.assistant:AGENT-L3-T3@1.4.0#finance,reports")
            .unwrap();
        assert_eq!(profile.entity_id, "acme.sales.assistant");
        assert_eq!(profile.tier, TrustTier::Trusted);
        assert!(profile.domains.contains("finance"));

        let resolved = service
            .resolve("tenant-a", "acme.sales.assistant")
            .unwrap()
            .unwrap();
        assert_eq!(resolved.score, 600);

        assert!(service.register_from_aci("tenant-a", "not an aci").is_err());
    }

    #[test]
    fn tier_below_minimum_reports_insufficient_trust_tier() {
        let (_dir, service) = service();
        let profile = TrustProfile::new("agent-1", "tenant-a", 120)
            .with_capability(cap("data:read/sensitive"));
        service.put_profile(&profile).unwrap();
        let check = service
            .check_capability(
                "tenant-a",
                "agent-1",
                &cap("data:read/sensitive"),
                CheckContext::default(),
            )
            .unwrap();
        assert_eq!(check.reason, "insufficient_trust_tier");
    }

    #[test]
    fn override_lowers_tier_but_escalation_survives() {
        let (_dir, mut service) = service();
        service.registry_mut().register_override(
            "financial:transaction/high",
            TierRule {
                minimum_tier: TrustTier::Standard,
                requires_escalation: false,
            },
        );
        let profile = TrustProfile::new("agent-1", "tenant-a", 400)
            .with_capability(cap("financial:transaction/high"));
        service.put_profile(&profile).unwrap();

        let check = service
            .check_capability(
                "tenant-a",
                "agent-1",
                &cap("financial:transaction/high"),
                CheckContext::default(),
            )
            .unwrap();
        assert!(check.requires_escalation);
    }

    #[test]
    fn adjust_trust_writes_through_and_invalidates_cache() {
        let (_dir, service) = service();
        service
            .put_profile(&TrustProfile::new("agent-1", "tenant-a", 100))
            .unwrap();
        service.resolve("tenant-a", "agent-1").unwrap();

        let evidence = TrustEvidence {
            description: "completed 50 supervised tasks".into(),
            reference: None,
        };
        let updated = service
            .adjust_trust("tenant-a", "agent-1", 250, &evidence)
            .unwrap();
        assert_eq!(updated, 350);
        let fresh = service.resolve("tenant-a", "agent-1").unwrap().unwrap();
        assert_eq!(fresh.score, 350);
    }

    #[test]
    fn revocation_propagates_transitively() {
        let (_dir, service) = service();
        for (entity, score) in [("root", 500), ("child", 300), ("grandchild", 200)] {
            service
                .put_profile(
                    &TrustProfile::new(entity, "tenant-a", score)
                        .with_capability(cap("data:read/*")),
                )
                .unwrap();
        }
        let attestation = |id: &str, issuer: &str, subject: &str| AttestationRow {
            id: id.into(),
            subject: subject.into(),
            issuer: issuer.into(),
            scope: "default".into(),
            tier: TrustTier::Standard,
            issued_at: Utc::now(),
            expires_at: Utc::now() + ChronoDuration::days(1),
            revoked: false,
        };
        service
            .store()
            .insert_attestation(&attestation("a1", "root", "child"))
            .unwrap();
        service
            .store()
            .insert_attestation(&attestation("a2", "child", "grandchild"))
            .unwrap();
        service
            .store()
            .insert_token(&AccessTokenRow {
                id: "tok-1".into(),
                entity_id: "grandchild".into(),
                expires_at: Utc::now() + ChronoDuration::hours(1),
                expired: false,
            })
            .unwrap();

        let outcome = service.revoke("tenant-a", "root", "key compromise").unwrap();
        assert_eq!(outcome.revoked_entities.len(), 3);
        assert_eq!(outcome.invalidated_delegations.len(), 2);
        assert_eq!(outcome.expired_tokens, 1);
        assert_eq!(outcome.sla_ms, 10_000);

        // Descendants now fail capability checks with `revoked`.
        for entity in ["root", "child", "grandchild"] {
            let check = service
                .check_capability(
                    "tenant-a",
                    entity,
                    &cap("data:read/internal"),
                    CheckContext { critical: true },
                )
                .unwrap();
            assert_eq!(check.reason, "revoked", "{entity}");
        }
    }

    #[test]
    fn delegation_cycle_is_circular_dependency() {
        let (_dir, service) = service();
        service
            .put_profile(&TrustProfile::new("a", "tenant-a", 400))
            .unwrap();
        let attestation = |id: &str, issuer: &str, subject: &str| AttestationRow {
            id: id.into(),
            subject: subject.into(),
            issuer: issuer.into(),
            scope: "default".into(),
            tier: TrustTier::Standard,
            issued_at: Utc::now(),
            expires_at: Utc::now() + ChronoDuration::days(1),
            revoked: false,
        };
        service.store().insert_attestation(&attestation("a1", "a", "b")).unwrap();
        service.store().insert_attestation(&attestation("a2", "b", "a")).unwrap();

        let err = service.revoke("tenant-a", "a", "test").unwrap_err();
        assert!(err.to_string().contains("circular_dependency"));
    }
}
