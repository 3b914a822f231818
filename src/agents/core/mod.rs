//! Agent contract and its backend variants
//!
//! Every agent answers through the same two operations:
//! - `handle_message`: one completion, backend failures folded into a
//!   tagged error string
//! - `handle_message_stream`: a single-pass [`TextStream`] of fragments,
//!   backend failures yielded as one tagged chunk
//!
//! Variants:
//! - [`ChatAgent`]: chat-completion providers, with iterative tool calling
//! - [`CrewAgent`]: persona-driven single task
//! - [`RemoteAgent`]: an agent served over HTTP
//! - [`RetrievalAgent`](crate::agents::retrieval::RetrievalAgent): answers from a document store

mod chat;
mod crew;
mod remote;

pub use chat::{ChatAgent, MAX_TOOL_ITERATIONS};
pub use crew::CrewAgent;
pub use remote::RemoteAgent;

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tera::{Context, Tera};

use crate::agents::config::{AgentConfig, BackendConfig};
use crate::agents::domain::{AgentInfo, MessageContext, TextStream};
use crate::agents::error::{AgentError, AgentResult};
use crate::agents::llm::{create_provider, LlmProvider};
use crate::agents::memory::{MemoryService, Message};
use crate::agents::retrieval::{DocumentStore, RetrievalAgent};
use crate::agents::tools::{ToolArgs, ToolRegistry};

/// Render the system prompt as a Tera template with the caller's context values
///
/// ```text
/// You are a {{role}} assistant. The user's name is {{user_name}}.
/// ```
///
/// Falls back to the original prompt if rendering fails.
pub fn render_system_prompt(system_prompt: &str, values: &Map<String, Value>) -> String {
    if !system_prompt.contains("{{") {
        return system_prompt.to_string();
    }

    let mut context = Context::new();
    for (key, value) in values {
        match value {
            Value::String(s) => context.insert(key, s),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    context.insert(key, &i);
                } else if let Some(f) = n.as_f64() {
                    context.insert(key, &f);
                }
            }
            Value::Bool(b) => context.insert(key, b),
            Value::Array(_) | Value::Object(_) => context.insert(key, &value.to_string()),
            Value::Null => context.insert(key, &""),
        }
    }

    match Tera::one_off(system_prompt, &context, false) {
        Ok(rendered) => rendered,
        Err(e) => {
            tracing::warn!("Failed to render system prompt template: {}", e);
            system_prompt.to_string()
        }
    }
}

/// Mutable system prompt shared between an agent and whoever rewrites it
#[derive(Debug, Default)]
pub struct SystemPrompt(RwLock<String>);

impl SystemPrompt {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self(RwLock::new(prompt.into()))
    }

    pub fn get(&self) -> String {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set(&self, prompt: impl Into<String>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = prompt.into();
    }
}

/// Uniform contract over every agent backend
#[async_trait]
pub trait Agent: Send + Sync {
    fn config(&self) -> &AgentConfig;

    fn name(&self) -> &str {
        &self.config().name
    }

    fn description(&self) -> &str {
        &self.config().description
    }

    fn agent_type(&self) -> String {
        self.config().agent_type()
    }

    fn system_prompt(&self) -> String;

    /// Replace the system prompt (classifiers refresh theirs as peers change)
    fn set_system_prompt(&self, prompt: String);

    fn info(&self) -> AgentInfo {
        AgentInfo::new(self.name(), self.description(), self.agent_type())
    }

    fn tool_registry(&self) -> Option<&Arc<ToolRegistry>> {
        None
    }

    fn memory(&self) -> Option<&MemoryService> {
        None
    }

    /// Produce one complete reply; never fails, errors come back tagged
    async fn handle_message(&self, message: &str, ctx: &MessageContext) -> String;

    /// Produce the reply as a stream of fragments
    async fn handle_message_stream(&self, message: &str, ctx: &MessageContext) -> TextStream;

    /// Call `method` on a registered tool directly
    async fn call_tool(&self, tool_name: &str, method: &str, args: &Value) -> AgentResult<Value> {
        let registry = self.tool_registry().ok_or_else(|| {
            AgentError::NotFound(format!("Agent '{}' has no tool registry", self.name()))
        })?;
        let tool = registry
            .get_tool(tool_name)
            .ok_or_else(|| AgentError::NotFound(format!("Tool '{}' not found in the registry", tool_name)))?;
        if !tool.has_method(method) {
            return Err(AgentError::MethodNotFound {
                tool: tool_name.to_string(),
                method: method.to_string(),
            });
        }

        let args: ToolArgs = args.as_object().cloned().unwrap_or_default();
        tool.call_method(method, args)
            .await
            .map_err(AgentError::ToolExecution)
    }

    /// Names of the tools this agent can use
    fn discover_tools(&self) -> Vec<String> {
        self.tool_registry()
            .map(|registry| registry.list_tools())
            .unwrap_or_default()
    }

    async fn get_conversation_summary(&self, thread_id: &str) -> AgentResult<String> {
        match self.memory() {
            Some(memory) => memory.get_thread_summary(thread_id).await,
            None => Ok(String::new()),
        }
    }

    async fn get_last_n_messages(&self, thread_id: &str, n: usize) -> AgentResult<Vec<Message>> {
        match self.memory() {
            Some(memory) => memory.get_last_n_messages(thread_id, n).await,
            None => Ok(Vec::new()),
        }
    }
}

/// Shared collaborators handed to agents at construction
#[derive(Clone, Default)]
pub struct AgentDeps {
    /// Attached to agents whose config sets `tools = true`
    pub tools: Option<Arc<ToolRegistry>>,
    pub memory: Option<MemoryService>,
    /// Required by retrieval agents
    pub documents: Option<Arc<dyn DocumentStore>>,
    /// Use this provider instead of building one from the backend config
    pub provider: Option<Arc<dyn LlmProvider>>,
}

impl AgentDeps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_memory(mut self, memory: MemoryService) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_documents(mut self, documents: Arc<dyn DocumentStore>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub(crate) fn provider_for(&self, config: &AgentConfig) -> AgentResult<Arc<dyn LlmProvider>> {
        if let Some(provider) = &self.provider {
            return Ok(provider.clone());
        }
        let provider_config = config.backend.provider().ok_or_else(|| {
            AgentError::Configuration(format!("Agent '{}' has no LLM backend", config.name))
        })?;
        Ok(create_provider(provider_config)?)
    }
}

/// Create an agent from configuration
pub fn create_agent(config: &AgentConfig, deps: &AgentDeps) -> AgentResult<Arc<dyn Agent>> {
    config.validate()?;
    let tools = if config.tools { deps.tools.clone() } else { None };

    match &config.backend {
        BackendConfig::Llm(_) => {
            let provider = deps.provider_for(config)?;
            Ok(Arc::new(ChatAgent::new(
                config.clone(),
                provider,
                tools,
                deps.memory.clone(),
            )))
        }
        BackendConfig::Crew(crew) => {
            let provider = deps.provider_for(config)?;
            Ok(Arc::new(CrewAgent::new(config.clone(), crew.clone(), provider)))
        }
        BackendConfig::Remote(remote) => Ok(Arc::new(RemoteAgent::new(config.clone(), remote)?)),
        BackendConfig::Retrieval(retrieval) => {
            let provider = deps.provider_for(config)?;
            let documents = deps.documents.clone().ok_or_else(|| {
                AgentError::Configuration(format!(
                    "Retrieval agent '{}' requires a document store",
                    config.name
                ))
            })?;
            Ok(Arc::new(RetrievalAgent::new(
                config.clone(),
                retrieval.clone(),
                provider,
                documents,
            )))
        }
    }
}
