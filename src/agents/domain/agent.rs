//! Agent descriptor and per-call context types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lightweight projection of an agent exposed to classifiers and listings.
///
/// Carries no backend configuration or credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
    pub description: String,
    /// Free-form classification tag (e.g. "ChatAgent", "RemoteAgent")
    #[serde(rename = "type")]
    pub agent_type: String,
}

impl AgentInfo {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        agent_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            agent_type: agent_type.into(),
        }
    }
}

/// Per-call context passed alongside a message.
///
/// `agent_name` is the explicit routing override honored by orchestrators;
/// `extra` carries arbitrary caller values (also usable as system prompt
/// template variables).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl MessageContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            ..Self::default()
        }
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_agent(mut self, agent_name: impl Into<String>) -> Self {
        self.agent_name = Some(agent_name.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}
