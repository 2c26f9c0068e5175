//! ACI string parsing.
//!
//! An ACI names an agent's certified identity:
//! `org.unit.name:ROLE-L<n>-T<n>@MAJOR.MINOR.PATCH[#tag,tag]`. This service
//! consumes ACIs issued elsewhere; it never mints them.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::TrustTier;

static ACI_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<org>[a-z0-9]+)\.(?P<unit>[a-z0-9-]+)\.(?P<name>[a-z0-9-]+):(?P<role>[A-Z]+)-L(?P<level>[0-5])-T(?P<tier>[0-5])@(?P<version>\d+\.\d+\.\d+)(?:#(?P<tags>[a-z]+(?:,[a-z]+)*))?$",
    )
    .expect("aci regex")
});

/// A parsed ACI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AciString {
    pub org: String,
    pub unit: String,
    pub name: String,
    /// Upper-case role tag, e.g. `AGENT`.
    pub role: String,
    /// Certification level, 0-5.
    pub level: u8,
    /// Trust tier encoded in the ACI.
    pub tier: TrustTier,
    /// Semantic version of the certification.
    pub version: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl AciString {
    /// Parse an ACI against the grammar. Tier digits map onto the T0-T5
    /// trust tiers.
    pub fn parse(input: &str) -> Result<Self, String> {
        let caps = ACI_RE
            .captures(input)
            .ok_or_else(|| format!("'{input}' does not match the ACI grammar"))?;

        let level: u8 = caps["level"].parse().map_err(|_| "bad level digit")?;
        let tier_digit: u8 = caps["tier"].parse().map_err(|_| "bad tier digit")?;
        let tier = TrustTier::from_level(tier_digit)
            .ok_or_else(|| format!("tier digit {tier_digit} out of range"))?;

        Ok(Self {
            org: caps["org"].to_string(),
            unit: caps["unit"].to_string(),
            name: caps["name"].to_string(),
            role: caps["role"].to_string(),
            level,
            tier,
            version: caps["version"].to_string(),
            tags: caps
                .name("tags")
                .map(|m| m.as_str().split(',').map(str::to_string).collect())
                .unwrap_or_default(),
        })
    }

    /// The dotted entity path, `org.unit.name`.
    pub fn entity_path(&self) -> String {
        format!("{}.{}.{}", self.org, self.unit, self.name)
    }
}
