//! Trust and capability service.
//!
//! Resolves an entity's trust score and tier, computes capability grants,
//! enforces escalation triggers and propagates revocations.

pub mod aci;
pub mod revocation;
pub mod service;
pub mod store;

pub use aci::AciString;
pub use revocation::{Delegation, DelegationGraph, RevocationOutcome};
pub use service::{CapabilityCheck, TrustService};
pub use store::TrustStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::capability::Capability;

/// Coarse ordinal bucket over a numeric trust score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    /// 0-99.
    Sandbox,
    /// 100-299.
    Provisional,
    /// 300-499.
    Standard,
    /// 500-699.
    Trusted,
    /// 700-899.
    Certified,
    /// 900-1000.
    Autonomous,
}

impl TrustTier {
    /// Derive the tier bucket for a raw score. Scores are clamped to 0-1000.
    pub fn from_score(score: u32) -> Self {
        match score.min(1000) {
            0..=99 => TrustTier::Sandbox,
            100..=299 => TrustTier::Provisional,
            300..=499 => TrustTier::Standard,
            500..=699 => TrustTier::Trusted,
            700..=899 => TrustTier::Certified,
            _ => TrustTier::Autonomous,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrustTier::Sandbox => "sandbox",
            TrustTier::Provisional => "provisional",
            TrustTier::Standard => "standard",
            TrustTier::Trusted => "trusted",
            TrustTier::Certified => "certified",
            TrustTier::Autonomous => "autonomous",
        }
    }

    /// Numeric level, T0 through T5.
    pub fn level(&self) -> u8 {
        match self {
            TrustTier::Sandbox => 0,
            TrustTier::Provisional => 1,
            TrustTier::Standard => 2,
            TrustTier::Trusted => 3,
            TrustTier::Certified => 4,
            TrustTier::Autonomous => 5,
        }
    }

    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(TrustTier::Sandbox),
            1 => Some(TrustTier::Provisional),
            2 => Some(TrustTier::Standard),
            3 => Some(TrustTier::Trusted),
            4 => Some(TrustTier::Certified),
            5 => Some(TrustTier::Autonomous),
            _ => None,
        }
    }

    /// Cache TTL for resolved profiles at this tier, in seconds. Higher
    /// tiers are revalidated more aggressively; T4+ is never cached.
    pub fn cache_ttl_secs(&self) -> u64 {
        match self.level() {
            0 | 1 => 60,
            2 => 30,
            3 => 10,
            _ => 0,
        }
    }

    /// Revocation propagation SLA for this tier, in milliseconds.
    pub fn revocation_sla_ms(&self) -> u64 {
        match self.level() {
            0 | 1 => 60_000,
            2 | 3 => 10_000,
            _ => 1_000,
        }
    }

    /// Midpoint score of this tier's bucket, used when seeding a profile
    /// from an externally issued certification.
    pub fn default_score(&self) -> u32 {
        match self {
            TrustTier::Sandbox => 50,
            TrustTier::Provisional => 200,
            TrustTier::Standard => 400,
            TrustTier::Trusted => 600,
            TrustTier::Certified => 800,
            TrustTier::Autonomous => 950,
        }
    }
}

/// A third-party attestation about an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attestation {
    pub issuer: String,
    pub scope: String,
    pub tier: TrustTier,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub revoked: bool,
}

impl Attestation {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.issued_at <= now && now < self.expires_at
    }
}

/// An entity's current standing: score, derived tier, grants and domains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustProfile {
    pub entity_id: String,
    pub tenant_id: String,
    /// Numeric trust score, 0-1000.
    pub score: u32,
    pub tier: TrustTier,
    /// Explicitly granted capabilities, wildcards allowed.
    #[serde(default)]
    pub granted_capabilities: Vec<Capability>,
    /// Domains the entity has declared expertise in.
    #[serde(default)]
    pub domains: BTreeSet<String>,
    #[serde(default)]
    pub attestations: Vec<Attestation>,
    pub updated_at: DateTime<Utc>,
}

impl TrustProfile {
    pub fn new(entity_id: impl Into<String>, tenant_id: impl Into<String>, score: u32) -> Self {
        let score = score.min(1000);
        Self {
            entity_id: entity_id.into(),
            tenant_id: tenant_id.into(),
            score,
            tier: TrustTier::from_score(score),
            granted_capabilities: Vec::new(),
            domains: BTreeSet::new(),
            attestations: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_capability(mut self, cap: Capability) -> Self {
        self.granted_capabilities.push(cap);
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domains.insert(domain.into());
        self
    }

    /// Re-derive the tier after a score change.
    pub fn rescore(&mut self, score: u32) {
        self.score = score.min(1000);
        self.tier = TrustTier::from_score(self.score);
        self.updated_at = Utc::now();
    }
}
