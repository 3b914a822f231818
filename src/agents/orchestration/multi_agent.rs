//! Classifier-routed orchestration

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{agent_context, forward_stream, Orchestrator, StreamSink, NO_AGENTS_AVAILABLE, NO_AGENT_FOUND};
use crate::agents::classifiers::Classifier;
use crate::agents::core::Agent;
use crate::agents::domain::MessageContext;
use crate::agents::memory::MemoryService;
use crate::agents::registry::AgentRegistry;

/// Routes each message to the agent a [`Classifier`] picks.
///
/// Records the user message before dispatch and the prefixed reply after it,
/// so every turn adds exactly two messages to the thread.
pub struct MultiAgentOrchestrator {
    registry: AgentRegistry,
    classifier: Arc<dyn Classifier>,
    memory: MemoryService,
    default_agent: Option<String>,
}

/// What a turn resolved to
enum Route {
    Agent(Arc<dyn Agent>),
    Unavailable(&'static str),
}

impl MultiAgentOrchestrator {
    pub fn new(
        registry: AgentRegistry,
        classifier: Arc<dyn Classifier>,
        memory: MemoryService,
        default_agent: Option<String>,
    ) -> Self {
        Self {
            registry,
            classifier,
            memory,
            default_agent,
        }
    }

    async fn route(&self, thread_id: &str, message: &str, ctx: &MessageContext) -> Route {
        let available = self.registry.list_agents().await;
        if available.is_empty() {
            return Route::Unavailable(NO_AGENTS_AVAILABLE);
        }

        let selected = match &ctx.agent_name {
            Some(name) => Some(name.clone()),
            None => self.classifier.classify(message, Some(thread_id), &available).await,
        }
        .or_else(|| self.default_agent.clone());

        let agent = match selected {
            Some(name) => self.registry.get_agent(&name).await,
            None => None,
        };
        match agent {
            Some(agent) => Route::Agent(agent),
            None => Route::Unavailable(NO_AGENT_FOUND),
        }
    }

    async fn record(&self, thread_id: &str, sender: &str, content: &str) {
        if let Err(e) = self.memory.store_message(thread_id, sender, content, None).await {
            warn!(thread_id, sender, error = %e, "Failed to store message");
        }
    }
}

#[async_trait]
impl Orchestrator for MultiAgentOrchestrator {
    async fn orchestrate(&self, thread_id: &str, message: &str, ctx: &MessageContext) -> String {
        let agent = match self.route(thread_id, message, ctx).await {
            Route::Agent(agent) => agent,
            Route::Unavailable(sentinel) => return sentinel.to_string(),
        };
        debug!(agent = %agent.name(), thread_id, "Routed message");

        self.record(thread_id, "user", message).await;
        let reply = agent.handle_message(message, &agent_context(thread_id, ctx)).await;
        let response = format!("[{}] {}", agent.name(), reply);
        self.record(thread_id, agent.name(), &response).await;
        response
    }

    async fn orchestrate_stream(
        &self,
        thread_id: &str,
        message: &str,
        ctx: &MessageContext,
        sink: &mut StreamSink<'_>,
    ) -> String {
        let agent = match self.route(thread_id, message, ctx).await {
            Route::Agent(agent) => agent,
            Route::Unavailable(sentinel) => return sentinel.to_string(),
        };
        debug!(agent = %agent.name(), thread_id, "Routed streamed message");

        self.record(thread_id, "user", message).await;
        let prefix = format!("[{}] ", agent.name());
        sink(&prefix);
        let body = forward_stream(agent.as_ref(), message, &agent_context(thread_id, ctx), sink).await;
        let response = prefix + &body;
        self.record(thread_id, agent.name(), &response).await;
        response
    }
}
