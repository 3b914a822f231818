//! Application wiring: settings in, a ready orchestrator out

use std::sync::Arc;

use tracing::{info, warn};

use crate::agents::classifiers::{refresh_classifier_prompt, Classifier, LlmClassifier, RuleClassifier};
use crate::agents::core::{create_agent, Agent, AgentDeps};
use crate::agents::domain::MessageContext;
use crate::agents::error::{AgentError, AgentResult};
use crate::agents::llm::LlmProvider;
use crate::agents::memory::{create_repository, MemoryService};
use crate::agents::orchestration::{build_orchestrator, Orchestrator, OrchestratorKind, Planner, StreamSink};
use crate::agents::registry::AgentRegistry;
use crate::agents::retrieval::{
    configure_retrieval_tools, load_corpus, DocumentStore, InMemoryDocumentStore, SectionChunker,
};
use crate::agents::tools::ToolRegistry;
use crate::config::Settings;

/// Sender recorded for replies on orchestrators that leave memory to the caller
pub const ASSISTANT_SENDER: &str = "assistant";

/// Everything one configured deployment needs to answer messages.
///
/// The classifier and planner agents are built but kept out of the routing
/// registry so they are never picked to answer a user.
pub struct Switchboard {
    registry: AgentRegistry,
    memory: MemoryService,
    tools: Arc<ToolRegistry>,
    documents: Arc<dyn DocumentStore>,
    orchestrator: Arc<dyn Orchestrator>,
    kind: OrchestratorKind,
}

impl Switchboard {
    pub async fn from_settings(settings: &Settings) -> AgentResult<Self> {
        Self::build(settings, AgentDeps::new()).await
    }

    /// Build with every LLM-backed agent (and the planner) driven by `provider`
    pub async fn with_provider(settings: &Settings, provider: Arc<dyn LlmProvider>) -> AgentResult<Self> {
        Self::build(settings, AgentDeps::new().with_provider(provider)).await
    }

    async fn build(settings: &Settings, deps: AgentDeps) -> AgentResult<Self> {
        let memory = MemoryService::new(create_repository(&settings.memory)?);

        let mut tools = ToolRegistry::new();
        memory.configure_memory_tools(&mut tools)?;

        let documents: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        if let Some(retrieval) = &settings.retrieval {
            let chunker = SectionChunker::new(retrieval.sections.clone(), retrieval.word_limit);
            let loaded = load_corpus(&retrieval.corpus_dir, &chunker, documents.as_ref()).await?;
            info!(chunks = loaded, dir = %retrieval.corpus_dir.display(), "Loaded paper corpus");
            configure_retrieval_tools(&mut tools, documents.clone())?;
        }

        let tools = Arc::new(tools);
        let deps = deps
            .with_tools(tools.clone())
            .with_memory(memory.clone())
            .with_documents(documents.clone());

        let orchestration = &settings.orchestrator;
        let reserved = |name: &str| {
            orchestration.classifier_agent.as_deref() == Some(name)
                || orchestration.planner_agent.as_deref() == Some(name)
        };

        let registry = AgentRegistry::new();
        let mut classifier_agent: Option<Arc<dyn Agent>> = None;
        for config in &settings.agents {
            let agent = match create_agent(config, &deps) {
                Ok(agent) => agent,
                Err(e) => {
                    warn!(agent = %config.name, error = %e, "Failed to create agent");
                    continue;
                }
            };
            if orchestration.classifier_agent.as_deref() == Some(config.name.as_str()) {
                classifier_agent = Some(agent.clone());
            }
            if !reserved(&config.name) {
                registry.register_agent(agent).await;
            }
        }
        info!(agents = registry.list_agents().await.len(), "Registered agents");

        let classifier: Arc<dyn Classifier> = match (&orchestration.classifier_agent, classifier_agent) {
            (Some(_), Some(agent)) => {
                refresh_classifier_prompt(agent.as_ref(), &registry.list_agents().await);
                Arc::new(LlmClassifier::new(agent, orchestration.default_agent.clone()))
            }
            (Some(name), None) => {
                return Err(AgentError::Configuration(format!(
                    "Classifier agent '{}' could not be created",
                    name
                )))
            }
            (None, _) => Arc::new(RuleClassifier::new(
                orchestration.rules.clone(),
                orchestration.default_agent.clone(),
            )),
        };

        let planner = match &orchestration.planner_agent {
            Some(name) => {
                let config = settings
                    .agents
                    .iter()
                    .find(|a| &a.name == name)
                    .ok_or_else(|| AgentError::Configuration(format!("Planner agent '{}' is not configured", name)))?;
                Some(Planner::new(deps.provider_for(config)?, config.llm.clone()))
            }
            None => None,
        };

        let orchestrator = build_orchestrator(
            orchestration,
            registry.clone(),
            memory.clone(),
            Some(classifier),
            planner,
        )?;

        Ok(Self {
            registry,
            memory,
            tools,
            documents,
            orchestrator,
            kind: orchestration.kind,
        })
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn memory(&self) -> &MemoryService {
        &self.memory
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    pub fn orchestrator(&self) -> &Arc<dyn Orchestrator> {
        &self.orchestrator
    }

    /// The multi-agent orchestrator records turns itself
    fn records_turns(&self) -> bool {
        self.kind != OrchestratorKind::MultiAgent
    }

    async fn record(&self, thread_id: &str, sender: &str, content: &str) {
        if let Err(e) = self.memory.store_message(thread_id, sender, content, None).await {
            warn!(thread_id, sender, error = %e, "Failed to store message");
        }
    }

    /// Run one turn, recording it in the thread
    pub async fn send(&self, thread_id: &str, message: &str, ctx: &MessageContext) -> String {
        if !self.records_turns() {
            return self.orchestrator.orchestrate(thread_id, message, ctx).await;
        }
        self.record(thread_id, "user", message).await;
        let reply = self.orchestrator.orchestrate(thread_id, message, ctx).await;
        self.record(thread_id, ASSISTANT_SENDER, &reply).await;
        reply
    }

    /// Streaming variant of [`send`](Self::send)
    pub async fn send_stream(
        &self,
        thread_id: &str,
        message: &str,
        ctx: &MessageContext,
        sink: &mut StreamSink<'_>,
    ) -> String {
        if !self.records_turns() {
            return self.orchestrator.orchestrate_stream(thread_id, message, ctx, sink).await;
        }
        self.record(thread_id, "user", message).await;
        let reply = self.orchestrator.orchestrate_stream(thread_id, message, ctx, sink).await;
        self.record(thread_id, ASSISTANT_SENDER, &reply).await;
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::llm::{MockProvider, MockResponse};

    const CONFIG: &str = r#"
[orchestrator]
kind = "multi_agent"
classifier_agent = "router"
default_agent = "english"

[[agents]]
name = "english"
description = "Answers in English"
[agents.backend]
type = "llm"
provider = "mock"

[[agents]]
name = "spanish"
description = "Answers in Spanish"
[agents.backend]
type = "llm"
provider = "mock"

[[agents]]
name = "router"
description = "Routes messages"
[agents.backend]
type = "llm"
provider = "mock"
"#;

    fn provider() -> MockProvider {
        MockProvider::new().with_handler(|request| {
            let system = request.system_prompt().unwrap_or_default();
            let user = request.last_user_message().unwrap_or_default();
            if system.starts_with("You are a classifier") {
                let target = if user.contains("hola") { "spanish" } else { "english" };
                Some(MockResponse::text(target))
            } else {
                Some(MockResponse::text(format!("reply to {}", user)))
            }
        })
    }

    #[tokio::test]
    async fn test_classifier_is_not_routable() {
        let settings = Settings::from_toml_str(CONFIG).unwrap();
        let switchboard = Switchboard::with_provider(&settings, Arc::new(provider())).await.unwrap();

        let names: Vec<String> = switchboard
            .registry()
            .list_agents()
            .await
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["english", "spanish"]);
        assert!(switchboard.tools().get_tool("store_message").is_some());
        assert!(switchboard.tools().get_tool("search_by_paper").is_none());
    }

    #[tokio::test]
    async fn test_multi_agent_routing_records_once() {
        let settings = Settings::from_toml_str(CONFIG).unwrap();
        let switchboard = Switchboard::with_provider(&settings, Arc::new(provider())).await.unwrap();

        let reply = switchboard.send("t1", "hola", &MessageContext::new()).await;
        assert_eq!(reply, "[spanish] reply to hola");
        assert_eq!(switchboard.memory().get_last_n_messages("t1", 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_simple_orchestrator_records_turn() {
        let settings = Settings::from_toml_str(
            r#"
[[agents]]
name = "echo"
description = "Echoes"
[agents.backend]
type = "llm"
provider = "mock"
"#,
        )
        .unwrap();
        let switchboard = Switchboard::with_provider(&settings, Arc::new(MockProvider::echo())).await.unwrap();

        let mut chunks = Vec::new();
        let reply = switchboard
            .send_stream("t", "ping pong", &MessageContext::new(), &mut |c: &str| chunks.push(c.to_string()))
            .await;
        assert_eq!(reply, "ping pong");
        assert_eq!(chunks.concat(), reply);

        let stored = switchboard.memory().get_last_n_messages("t", 10).await.unwrap();
        let senders: Vec<&str> = stored.iter().map(|m| m.sender.as_str()).collect();
        assert_eq!(senders, vec!["user", ASSISTANT_SENDER]);
    }

    #[tokio::test]
    async fn test_react_requires_planner() {
        let settings = Settings::from_toml_str(
            r#"
[orchestrator]
kind = "react"
[[agents]]
name = "a"
description = "Anything"
[agents.backend]
type = "llm"
provider = "mock"
"#,
        )
        .unwrap();
        let result = Switchboard::with_provider(&settings, Arc::new(MockProvider::new())).await;
        assert!(matches!(result, Err(AgentError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_corpus_registers_search_tool() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("paper-1.txt"), "Abstract\nRouting agents by intent.").unwrap();
        let toml = format!("[retrieval]\ncorpus_dir = {:?}\n", dir.path().display().to_string());
        let settings = Settings::from_toml_str(&toml).unwrap();

        let switchboard = Switchboard::from_settings(&settings).await.unwrap();
        let found = switchboard
            .tools()
            .invoke("search_by_paper", &serde_json::json!({"query": "routing", "paper_id": "paper-1"}))
            .await
            .unwrap();
        assert_eq!(found, serde_json::json!(["Abstract Routing agents by intent."]));
    }
}
