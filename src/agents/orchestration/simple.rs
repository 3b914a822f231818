//! Fixed-target orchestration

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{agent_context, forward_stream, Orchestrator, StreamSink, NO_AGENT_FOUND};
use crate::agents::core::Agent;
use crate::agents::domain::MessageContext;
use crate::agents::registry::AgentRegistry;

/// Sends every message to one agent.
///
/// The target is the context override if given, else the default agent,
/// else the first registered agent. Leaves memory to the caller.
pub struct SimpleOrchestrator {
    registry: AgentRegistry,
    default_agent: Option<String>,
}

impl SimpleOrchestrator {
    pub fn new(registry: AgentRegistry, default_agent: Option<String>) -> Self {
        Self {
            registry,
            default_agent,
        }
    }

    async fn resolve(&self, ctx: &MessageContext) -> Option<Arc<dyn Agent>> {
        if let Some(name) = &ctx.agent_name {
            return self.registry.get_agent(name).await;
        }
        if let Some(name) = &self.default_agent {
            return self.registry.get_agent(name).await;
        }
        let first = self.registry.list_agents().await.into_iter().next()?;
        self.registry.get_agent(&first.name).await
    }
}

#[async_trait]
impl Orchestrator for SimpleOrchestrator {
    async fn orchestrate(&self, thread_id: &str, message: &str, ctx: &MessageContext) -> String {
        let Some(agent) = self.resolve(ctx).await else {
            return NO_AGENT_FOUND.to_string();
        };
        debug!(agent = %agent.name(), thread_id, "Dispatching message");
        agent.handle_message(message, &agent_context(thread_id, ctx)).await
    }

    async fn orchestrate_stream(
        &self,
        thread_id: &str,
        message: &str,
        ctx: &MessageContext,
        sink: &mut StreamSink<'_>,
    ) -> String {
        let Some(agent) = self.resolve(ctx).await else {
            return NO_AGENT_FOUND.to_string();
        };
        debug!(agent = %agent.name(), thread_id, "Streaming message");
        forward_stream(agent.as_ref(), message, &agent_context(thread_id, ctx), sink).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::orchestration::test_support::fixed_agent;

    async fn registry() -> AgentRegistry {
        let registry = AgentRegistry::new();
        registry.register_agent(fixed_agent("first", "from first")).await;
        registry.register_agent(fixed_agent("second", "from second")).await;
        registry
    }

    #[tokio::test]
    async fn test_empty_registry_returns_sentinel() {
        let orchestrator = SimpleOrchestrator::new(AgentRegistry::new(), None);
        assert_eq!(orchestrator.orchestrate("t", "hi", &MessageContext::new()).await, NO_AGENT_FOUND);
    }

    #[tokio::test]
    async fn test_resolution_order() {
        let orchestrator = SimpleOrchestrator::new(registry().await, None);
        assert_eq!(orchestrator.orchestrate("t", "hi", &MessageContext::new()).await, "from first");

        let orchestrator = SimpleOrchestrator::new(registry().await, Some("second".to_string()));
        assert_eq!(orchestrator.orchestrate("t", "hi", &MessageContext::new()).await, "from second");

        let ctx = MessageContext::new().with_agent("first");
        assert_eq!(orchestrator.orchestrate("t", "hi", &ctx).await, "from first");

        let ctx = MessageContext::new().with_agent("ghost");
        assert_eq!(orchestrator.orchestrate("t", "hi", &ctx).await, NO_AGENT_FOUND);
    }

    #[tokio::test]
    async fn test_stream_passes_chunks_to_sink() {
        let orchestrator = SimpleOrchestrator::new(registry().await, None);
        let mut chunks = Vec::new();
        let response = orchestrator
            .orchestrate_stream("t", "hi", &MessageContext::new(), &mut |chunk: &str| {
                chunks.push(chunk.to_string())
            })
            .await;

        assert_eq!(response, "from first");
        assert_eq!(chunks, vec!["from ", "first"]);
    }
}
