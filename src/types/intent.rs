//! Intent: a structured, pre-execution description of what an agent
//! proposes to do. Created by an upstream caller and immutable after
//! handoff to the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// The kind of entity behind an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    User,
    Agent,
    Service,
    System,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::User => "user",
            ActorType::Agent => "agent",
            ActorType::Service => "service",
            ActorType::System => "system",
        }
    }
}

/// The entity proposing an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Stable entity identifier (a DID for agents).
    pub entity_id: String,
    #[serde(rename = "type")]
    pub actor_type: ActorType,
    /// Optional display name carried through to audit records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Optional source address carried through to audit records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl Actor {
    pub fn agent(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            actor_type: ActorType::Agent,
            name: None,
            ip: None,
        }
    }

    pub fn user(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            actor_type: ActorType::User,
            name: None,
            ip: None,
        }
    }
}

/// A proposed action, handed to the governance pipeline before execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    /// Unique intent id.
    pub id: String,
    /// Tenant the intent belongs to. Audit sequencing is per tenant.
    pub tenant_id: String,
    pub actor: Actor,
    /// Short phrase describing what the actor wants to accomplish.
    pub goal: String,
    /// Short tag classifying the intent (e.g. "data_processing").
    #[serde(default)]
    pub intent_type: String,
    /// Tool ids the action would invoke.
    #[serde(default)]
    pub tools: BTreeSet<String>,
    /// Host patterns the action would reach.
    #[serde(default)]
    pub endpoints: BTreeSet<String>,
    /// Optional text payload (prompt, document, message body).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Structured evaluation context visible to rule field paths.
    #[serde(default)]
    pub context: HashMap<String, Value>,
    /// Request correlation id, propagated from the caller when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Distributed trace id, propagated from the caller when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Intent {
    /// Build a minimal intent for the given tenant and actor.
    pub fn new(tenant_id: impl Into<String>, actor: Actor, goal: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            actor,
            goal: goal.into(),
            intent_type: String::new(),
            tools: BTreeSet::new(),
            endpoints: BTreeSet::new(),
            content: None,
            context: HashMap::new(),
            request_id: None,
            trace_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tools.insert(tool.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoints.insert(endpoint.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_intent_type(mut self, intent_type: impl Into<String>) -> Self {
        self.intent_type = intent_type.into();
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Project the intent into the JSON value rule field paths walk over.
    ///
    /// Paths are rooted at `intent.*` and `context.*`; the projection keeps
    /// the two roots distinct so `context.trust_level` and
    /// `intent.context.trust_level` both resolve.
    pub fn evaluation_root(&self) -> Value {
        serde_json::json!({
            "intent": {
                "id": self.id,
                "tenant_id": self.tenant_id,
                "actor": self.actor,
                "goal": self.goal,
                "intent_type": self.intent_type,
                "tools": self.tools,
                "endpoints": self.endpoints,
                "content": self.content,
                "context": self.context,
            },
            "context": self.context,
            "environment": {
                "evaluated_at": Utc::now().to_rfc3339(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_builder_round_trips_through_json() {
        let intent = Intent::new("tenant-a", Actor::agent("did:ex:agent-1"), "Read a file")
            .with_tool("file_read")
            .with_context("trust_level", serde_json::json!(3));

        let json = serde_json::to_string(&intent).unwrap();
        let back: Intent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tenant_id, "tenant-a");
        assert!(back.tools.contains("file_read"));
        assert_eq!(back.context["trust_level"], serde_json::json!(3));
    }

    #[test]
    fn evaluation_root_exposes_both_context_paths() {
        let intent = Intent::new("t", Actor::user("u-1"), "g")
            .with_context("department", serde_json::json!("finance"));
        let root = intent.evaluation_root();
        assert_eq!(root["context"]["department"], "finance");
        assert_eq!(root["intent"]["context"]["department"], "finance");
    }

    #[test]
    fn unknown_actor_type_is_rejected() {
        let err = serde_json::from_str::<ActorType>("\"robot\"");
        assert!(err.is_err());
    }
}
