//! Conversation orchestration
//!
//! An orchestrator owns one conversation turn: it resolves which agent
//! answers, dispatches the message and returns (or streams) the reply.
//! - Simple: override, default or first registered agent
//! - MultiAgent: classifier-routed single hop, records the turn in memory
//! - ReAct: classifier-routed think/act/observe loop with a termination check

mod multi_agent;
mod react;
mod simple;

pub use multi_agent::MultiAgentOrchestrator;
pub use react::{Planner, ReActOrchestrator, ReActStep, RolePrompt, DEFAULT_MAX_STEPS};
pub use simple::SimpleOrchestrator;

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::agents::classifiers::{Classifier, RoutingRule};
use crate::agents::core::Agent;
use crate::agents::domain::MessageContext;
use crate::agents::error::{AgentError, AgentResult};
use crate::agents::memory::MemoryService;
use crate::agents::registry::AgentRegistry;

/// Returned when no agent can be resolved for a message
pub const NO_AGENT_FOUND: &str = "[No suitable agent found to handle message.]";

/// Returned by classifier-routed orchestrators when the registry is empty
pub const NO_AGENTS_AVAILABLE: &str = "[No agents available to handle message.]";

/// Receives streamed fragments as they arrive
pub type StreamSink<'a> = dyn FnMut(&str) + Send + 'a;

/// Top-level control loop for one conversation turn
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Resolve an agent and return its complete reply
    async fn orchestrate(&self, thread_id: &str, message: &str, ctx: &MessageContext) -> String;

    /// Like `orchestrate`, passing each fragment to `sink` as it arrives.
    ///
    /// Returns the concatenation of everything passed to `sink`.
    async fn orchestrate_stream(
        &self,
        thread_id: &str,
        message: &str,
        ctx: &MessageContext,
        sink: &mut StreamSink<'_>,
    ) -> String;
}

/// Context handed to the chosen agent: the caller's values plus the thread
pub(crate) fn agent_context(thread_id: &str, ctx: &MessageContext) -> MessageContext {
    ctx.clone().with_thread(thread_id)
}

/// Drain an agent's stream into `sink`, returning the full text
pub(crate) async fn forward_stream(
    agent: &dyn Agent,
    message: &str,
    ctx: &MessageContext,
    sink: &mut StreamSink<'_>,
) -> String {
    let mut stream = agent.handle_message_stream(message, ctx).await;
    let mut response = String::new();
    while let Some(chunk) = stream.next().await {
        sink(&chunk);
        response.push_str(&chunk);
    }
    response
}

/// Orchestrator selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorKind {
    #[default]
    Simple,
    MultiAgent,
    React,
}

/// Orchestrator configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub kind: OrchestratorKind,
    /// Fallback agent name
    pub default_agent: Option<String>,
    /// Agent that answers classification prompts
    pub classifier_agent: Option<String>,
    /// Agent whose backend drives ReAct reasoning
    pub planner_agent: Option<String>,
    /// Keyword routing used when no classifier agent is configured
    pub rules: Vec<RoutingRule>,
    pub max_steps: usize,
    /// Emit the ReAct step trace
    pub verbose: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            kind: OrchestratorKind::Simple,
            default_agent: None,
            classifier_agent: None,
            planner_agent: None,
            rules: Vec::new(),
            max_steps: DEFAULT_MAX_STEPS,
            verbose: false,
        }
    }
}

/// Build the configured orchestrator over a populated registry
pub fn build_orchestrator(
    settings: &OrchestratorSettings,
    registry: AgentRegistry,
    memory: MemoryService,
    classifier: Option<Arc<dyn Classifier>>,
    planner: Option<Planner>,
) -> AgentResult<Arc<dyn Orchestrator>> {
    let default_agent = settings.default_agent.clone();

    match settings.kind {
        OrchestratorKind::Simple => Ok(Arc::new(SimpleOrchestrator::new(registry, default_agent))),
        OrchestratorKind::MultiAgent => {
            let classifier = classifier.ok_or_else(|| {
                AgentError::Configuration("multi_agent orchestrator requires a classifier".to_string())
            })?;
            Ok(Arc::new(MultiAgentOrchestrator::new(
                registry,
                classifier,
                memory,
                default_agent,
            )))
        }
        OrchestratorKind::React => {
            let classifier = classifier.ok_or_else(|| {
                AgentError::Configuration("react orchestrator requires a classifier".to_string())
            })?;
            let planner = planner.ok_or_else(|| {
                AgentError::Configuration("react orchestrator requires a planner_agent".to_string())
            })?;
            Ok(Arc::new(
                ReActOrchestrator::new(registry, classifier, planner, default_agent)
                    .with_max_steps(settings.max_steps)
                    .with_verbose(settings.verbose),
            ))
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::agents::config::{AgentConfig, BackendConfig, ProviderKind};
    use crate::agents::core::{Agent, ChatAgent};
    use crate::agents::llm::MockProvider;

    /// Agent that answers with a fixed reply
    pub fn scripted_agent(name: &str, description: &str, provider: MockProvider) -> Arc<dyn Agent> {
        let config = AgentConfig::new(name, description, BackendConfig::llm(ProviderKind::Mock)).unwrap();
        Arc::new(ChatAgent::new(config, Arc::new(provider), None, None))
    }

    pub fn fixed_agent(name: &str, reply: &str) -> Arc<dyn Agent> {
        let reply = reply.to_string();
        scripted_agent(
            name,
            &format!("{} agent", name),
            MockProvider::new().with_handler(move |_| Some(crate::agents::llm::MockResponse::text(reply.clone()))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::memory::InMemoryRepository;

    #[test]
    fn test_settings_defaults() {
        let settings: OrchestratorSettings = serde_json::from_str(r#"{"kind": "react"}"#).unwrap();
        assert_eq!(settings.kind, OrchestratorKind::React);
        assert_eq!(settings.max_steps, DEFAULT_MAX_STEPS);
        assert!(!settings.verbose);
    }

    #[test]
    fn test_build_requires_collaborators() {
        let memory = MemoryService::new(Arc::new(InMemoryRepository::new()));
        let settings = OrchestratorSettings {
            kind: OrchestratorKind::MultiAgent,
            ..Default::default()
        };
        assert!(matches!(
            build_orchestrator(&settings, AgentRegistry::new(), memory.clone(), None, None),
            Err(AgentError::Configuration(_))
        ));

        let settings = OrchestratorSettings::default();
        assert!(build_orchestrator(&settings, AgentRegistry::new(), memory, None, None).is_ok());
    }
}
