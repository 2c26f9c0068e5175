//! Delegation scope derivation.
//!
//! A child scope derived from a parent never expands: its capabilities must
//! be covered by the parent's grants, its domains are a subset of the
//! parent's, and its inference level and trust tier never exceed the
//! parent's. Derivation chains are checked for cycles.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

use super::Capability;
use crate::semantic::inference::InferenceLevel;
use crate::trust::TrustTier;

/// The scope a delegation carries: what the delegate may do, where, and at
/// which inference level and trust tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityScope {
    pub capabilities: Vec<Capability>,
    pub domains: BTreeSet<String>,
    pub max_inference_level: InferenceLevel,
    pub tier: TrustTier,
}

impl CapabilityScope {
    pub fn new(tier: TrustTier) -> Self {
        Self {
            capabilities: Vec::new(),
            domains: BTreeSet::new(),
            max_inference_level: InferenceLevel::Entity,
            tier,
        }
    }

    pub fn with_capability(mut self, cap: Capability) -> Self {
        self.capabilities.push(cap);
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domains.insert(domain.into());
        self
    }

    pub fn with_inference_level(mut self, level: InferenceLevel) -> Self {
        self.max_inference_level = level;
        self
    }

    /// Derive a child scope. The result keeps only the requested
    /// capabilities the parent covers, intersects domains, and takes the
    /// minimum of level and tier. Requested grants wider than the parent
    /// are silently narrowed rather than erroring, so a delegate can ask
    /// for "everything I'm allowed".
    pub fn derive_child(&self, requested: &CapabilityScope) -> CapabilityScope {
        let capabilities = requested
            .capabilities
            .iter()
            .filter(|cap| self.capabilities.iter().any(|parent| parent.covers(cap) || parent == *cap))
            .cloned()
            .collect();
        let domains = requested
            .domains
            .intersection(&self.domains)
            .cloned()
            .collect();
        CapabilityScope {
            capabilities,
            domains,
            max_inference_level: requested.max_inference_level.min(self.max_inference_level),
            tier: requested.tier.min(self.tier),
        }
    }

    /// Whether `child` is a valid reduction of this scope.
    pub fn contains(&self, child: &CapabilityScope) -> bool {
        child.domains.is_subset(&self.domains)
            && child.max_inference_level <= self.max_inference_level
            && child.tier <= self.tier
            && child
                .capabilities
                .iter()
                .all(|cap| self.capabilities.iter().any(|parent| parent.covers(cap) || parent == cap))
    }
}

/// Find a cycle in a directed edge map, returning the cycle path
/// (`a -> b -> c -> a` yields `[a, b, c, a]`). Used for both capability
/// derivation chains and delegation graphs.
pub fn detect_cycle(edges: &HashMap<String, Vec<String>>) -> Option<Vec<String>> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut nodes: Vec<&String> = edges.keys().collect();
    nodes.sort();

    for start in nodes {
        if visited.contains(start.as_str()) {
            continue;
        }
        let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
        let mut path: Vec<&str> = vec![start.as_str()];
        let mut on_path: HashSet<&str> = HashSet::from([start.as_str()]);

        while let Some((node, next_child)) = stack.pop() {
            let children = edges.get(node).map(Vec::as_slice).unwrap_or_default();
            if next_child < children.len() {
                stack.push((node, next_child + 1));
                let child = children[next_child].as_str();
                if on_path.contains(child) {
                    let mut cycle: Vec<String> = path
                        .iter()
                        .skip_while(|&&n| n != child)
                        .map(|n| (*n).to_string())
                        .collect();
                    cycle.push(child.to_string());
                    return Some(cycle);
                }
                if !visited.contains(child) {
                    stack.push((child, 0));
                    path.push(child);
                    on_path.insert(child);
                }
            } else {
                visited.insert(node);
                if path.last() == Some(&node) {
                    path.pop();
                }
                on_path.remove(node);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(s: &str) -> Capability {
        Capability::parse(s).unwrap()
    }

    fn parent() -> CapabilityScope {
        CapabilityScope::new(TrustTier::Certified)
            .with_capability(cap("data:read/*"))
            .with_capability(cap("comms:send/email"))
            .with_domain("finance")
            .with_domain("hr")
            .with_inference_level(InferenceLevel::Pattern)
    }

    #[test]
    fn child_never_expands() {
        let requested = CapabilityScope::new(TrustTier::Autonomous)
            .with_capability(cap("data:read/internal"))
            .with_capability(cap("financial:transaction/high"))
            .with_domain("finance")
            .with_domain("legal")
            .with_inference_level(InferenceLevel::Identification);

        let child = parent().derive_child(&requested);

        assert_eq!(child.capabilities, vec![cap("data:read/internal")]);
        assert_eq!(child.domains, BTreeSet::from(["finance".to_string()]));
        assert_eq!(child.max_inference_level, InferenceLevel::Pattern);
        assert_eq!(child.tier, TrustTier::Certified);
        assert!(parent().contains(&child));
    }

    #[test]
    fn derivation_is_monotone_over_chains() {
        let lvl1 = parent();
        let lvl2 = lvl1.derive_child(
            &CapabilityScope::new(TrustTier::Trusted)
                .with_capability(cap("data:read/internal"))
                .with_domain("hr")
                .with_inference_level(InferenceLevel::Aggregate),
        );
        let lvl3 = lvl2.derive_child(
            &CapabilityScope::new(TrustTier::Autonomous)
                .with_capability(cap("data:read/internal"))
                .with_domain("hr")
                .with_domain("finance")
                .with_inference_level(InferenceLevel::Identification),
        );
        assert!(lvl1.contains(&lvl2));
        assert!(lvl2.contains(&lvl3));
        assert_eq!(lvl3.tier, TrustTier::Trusted);
        assert_eq!(lvl3.max_inference_level, InferenceLevel::Aggregate);
        assert_eq!(lvl3.domains, BTreeSet::from(["hr".to_string()]));
    }

    #[test]
    fn cycle_detection_finds_path() {
        let edges = HashMap::from([
            ("a".to_string(), vec!["b".to_string()]),
            ("b".to_string(), vec!["c".to_string()]),
            ("c".to_string(), vec!["a".to_string()]),
        ]);
        let cycle = detect_cycle(&edges).unwrap();
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
    }

    #[test]
    fn acyclic_graph_has_no_cycle() {
        let edges = HashMap::from([
            ("root".to_string(), vec!["left".to_string(), "right".to_string()]),
            ("left".to_string(), vec!["leaf".to_string()]),
            ("right".to_string(), vec!["leaf".to_string()]),
        ]);
        assert!(detect_cycle(&edges).is_none());
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let edges = HashMap::from([("a".to_string(), vec!["a".to_string()])]);
        let cycle = detect_cycle(&edges).unwrap();
        assert_eq!(cycle, vec!["a".to_string(), "a".to_string()]);
    }
}
