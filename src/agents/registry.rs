//! Agent registry: storage of live agents plus discovery helpers

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::agents::core::Agent;
use crate::agents::domain::AgentInfo;

/// Storage for agent instances, keyed by name
#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Store or replace an agent
    async fn save_agent(&self, agent: Arc<dyn Agent>);

    async fn remove_agent(&self, name: &str);

    async fn get_agent(&self, name: &str) -> Option<Arc<dyn Agent>>;

    /// Descriptors of all stored agents, in registration order
    async fn list_agents(&self) -> Vec<AgentInfo>;
}

/// RAM-only agent repository.
///
/// Registration order is kept; re-registering a name replaces the agent in
/// its original position.
#[derive(Default, Clone)]
pub struct InMemoryAgentRepository {
    agents: Arc<RwLock<Vec<Arc<dyn Agent>>>>,
}

impl InMemoryAgentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentRepository for InMemoryAgentRepository {
    async fn save_agent(&self, agent: Arc<dyn Agent>) {
        let mut agents = self.agents.write().await;
        match agents.iter_mut().find(|a| a.name() == agent.name()) {
            Some(slot) => *slot = agent,
            None => agents.push(agent),
        }
    }

    async fn remove_agent(&self, name: &str) {
        self.agents.write().await.retain(|a| a.name() != name);
    }

    async fn get_agent(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents
            .read()
            .await
            .iter()
            .find(|a| a.name() == name)
            .cloned()
    }

    async fn list_agents(&self) -> Vec<AgentInfo> {
        self.agents.read().await.iter().map(|a| a.info()).collect()
    }
}

/// Register, remove and discover agents at runtime
#[derive(Clone)]
pub struct AgentRegistry {
    repository: Arc<dyn AgentRepository>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    /// Registry over an in-memory repository
    pub fn new() -> Self {
        Self::with_repository(Arc::new(InMemoryAgentRepository::new()))
    }

    pub fn with_repository(repository: Arc<dyn AgentRepository>) -> Self {
        Self { repository }
    }

    pub async fn register_agent(&self, agent: Arc<dyn Agent>) {
        debug!(agent = %agent.name(), agent_type = %agent.agent_type(), "Registering agent");
        self.repository.save_agent(agent).await;
    }

    pub async fn remove_agent(&self, name: &str) {
        self.repository.remove_agent(name).await;
    }

    pub async fn get_agent(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.repository.get_agent(name).await
    }

    pub async fn list_agents(&self) -> Vec<AgentInfo> {
        self.repository.list_agents().await
    }

    pub async fn is_empty(&self) -> bool {
        self.list_agents().await.is_empty()
    }

    pub async fn find_agents_by_type(&self, agent_type: &str) -> Vec<Arc<dyn Agent>> {
        let mut matching = Vec::new();
        for info in self.list_agents().await {
            if info.agent_type == agent_type {
                if let Some(agent) = self.get_agent(&info.name).await {
                    matching.push(agent);
                }
            }
        }
        matching
    }

    /// Agents whose description contains `search_text`, ignoring case
    pub async fn find_agents_by_description(&self, search_text: &str) -> Vec<Arc<dyn Agent>> {
        let needle = search_text.to_lowercase();
        let mut matching = Vec::new();
        for info in self.list_agents().await {
            if info.description.to_lowercase().contains(&needle) {
                if let Some(agent) = self.get_agent(&info.name).await {
                    matching.push(agent);
                }
            }
        }
        matching
    }
}
