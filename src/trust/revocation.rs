//! Revocation propagation over the delegation graph.
//!
//! Attestations double as delegations: the issuer vouched for the subject.
//! Revoking an entity invalidates every delegation it issued and walks the
//! chain transitively; all tokens derived from the affected chain are
//! expired. Cycles in the graph are a configuration defect and surface as
//! a distinct error carrying the cycle path.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

use super::store::AttestationRow;
use super::TrustTier;
use crate::capability::detect_cycle;

/// One delegation edge: `issuer` granted authority to `delegate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delegation {
    pub attestation_id: String,
    pub issuer: String,
    pub delegate: String,
}

/// Outcome of a revocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevocationOutcome {
    /// The revoked entity plus every downstream delegate.
    pub revoked_entities: Vec<String>,
    /// Attestation ids invalidated along the chain.
    pub invalidated_delegations: Vec<String>,
    /// Count of access tokens marked expired.
    pub expired_tokens: usize,
    /// Propagation budget for the revoked entity's tier, in milliseconds.
    pub sla_ms: u64,
}

/// In-memory delegation graph built from active attestations.
#[derive(Debug, Default)]
pub struct DelegationGraph {
    /// issuer -> outgoing delegations.
    edges: HashMap<String, Vec<Delegation>>,
}

impl DelegationGraph {
    pub fn from_attestations(rows: &[AttestationRow]) -> Self {
        let mut edges: HashMap<String, Vec<Delegation>> = HashMap::new();
        for row in rows {
            edges
                .entry(row.issuer.clone())
                .or_default()
                .push(Delegation {
                    attestation_id: row.id.clone(),
                    issuer: row.issuer.clone(),
                    delegate: row.subject.clone(),
                });
        }
        Self { edges }
    }

    /// Detect a cycle in the delegation graph, returning its path.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let plain: HashMap<String, Vec<String>> = self
            .edges
            .iter()
            .map(|(issuer, delegations)| {
                (
                    issuer.clone(),
                    delegations.iter().map(|d| d.delegate.clone()).collect(),
                )
            })
            .collect();
        detect_cycle(&plain)
    }

    /// Everything downstream of `entity`: the transitive closure of its
    /// delegations, breadth-first so nearer delegates come first.
    pub fn downstream_of(&self, entity: &str) -> (Vec<String>, Vec<String>) {
        let mut entities = Vec::new();
        let mut attestation_ids = Vec::new();
        let mut seen: HashSet<String> = HashSet::from([entity.to_string()]);
        let mut queue: VecDeque<&str> = VecDeque::from([entity]);

        while let Some(current) = queue.pop_front() {
            if let Some(delegations) = self.edges.get(current) {
                for delegation in delegations {
                    attestation_ids.push(delegation.attestation_id.clone());
                    if seen.insert(delegation.delegate.clone()) {
                        entities.push(delegation.delegate.clone());
                        queue.push_back(&delegation.delegate);
                    }
                }
            }
        }
        (entities, attestation_ids)
    }
}

/// Plan a revocation: the full affected entity set (revoked entity first),
/// the attestations to invalidate and the tier SLA.
pub fn plan_revocation(
    graph: &DelegationGraph,
    entity: &str,
    tier: TrustTier,
) -> Result<RevocationOutcome, Vec<String>> {
    if let Some(cycle) = graph.find_cycle() {
        return Err(cycle);
    }
    let (downstream, attestation_ids) = graph.downstream_of(entity);
    let mut revoked_entities = Vec::with_capacity(downstream.len() + 1);
    revoked_entities.push(entity.to_string());
    revoked_entities.extend(downstream);

    Ok(RevocationOutcome {
        revoked_entities,
        invalidated_delegations: attestation_ids,
        expired_tokens: 0,
        sla_ms: tier.revocation_sla_ms(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn attestation(id: &str, issuer: &str, subject: &str) -> AttestationRow {
        AttestationRow {
            id: id.to_string(),
            subject: subject.to_string(),
            issuer: issuer.to_string(),
            scope: "default".into(),
            tier: TrustTier::Standard,
            issued_at: Utc::now(),
            expires_at: Utc::now(),
            revoked: false,
        }
    }

    #[test]
    fn transitive_closure_is_collected() {
        let graph = DelegationGraph::from_attestations(&[
            attestation("a1", "root", "child-a"),
            attestation("a2", "root", "child-b"),
            attestation("a3", "child-a", "grandchild"),
            attestation("a4", "unrelated", "other"),
        ]);
        let outcome = plan_revocation(&graph, "root", TrustTier::Trusted).unwrap();
        assert_eq!(outcome.revoked_entities[0], "root");
        assert!(outcome.revoked_entities.contains(&"grandchild".to_string()));
        assert!(!outcome.revoked_entities.contains(&"other".to_string()));
        assert_eq!(outcome.invalidated_delegations.len(), 3);
        assert_eq!(outcome.sla_ms, 10_000);
    }

    #[test]
    fn leaf_revocation_touches_only_itself() {
        let graph = DelegationGraph::from_attestations(&[attestation("a1", "root", "leaf")]);
        let outcome = plan_revocation(&graph, "leaf", TrustTier::Autonomous).unwrap();
        assert_eq!(outcome.revoked_entities, vec!["leaf".to_string()]);
        assert!(outcome.invalidated_delegations.is_empty());
        assert_eq!(outcome.sla_ms, 1_000);
    }

    #[test]
    fn cycle_is_a_distinct_error_with_path() {
        let graph = DelegationGraph::from_attestations(&[
            attestation("a1", "a", "b"),
            attestation("a2", "b", "c"),
            attestation("a3", "c", "a"),
        ]);
        let cycle = plan_revocation(&graph, "a", TrustTier::Standard).unwrap_err();
        assert_eq!(cycle.first(), cycle.last());
        assert!(cycle.len() >= 3);
    }
}
