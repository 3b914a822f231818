//! LLM provider implementations with streaming support
//!
//! Every backend is consumed through one contract: generate a completion,
//! optionally with tool calls, optionally streamed.
//! - OpenAI (and OpenAI-compatible endpoints)
//! - Azure OpenAI
//! - Amazon Bedrock (Claude messages, legacy Claude, Titan)
//! - Google Gemini
//! - Ollama (local models)
//! - Mock (scripted, for tests and offline runs)

mod azure;
mod bedrock;
mod gemini;
mod mock;
mod ollama;
mod openai;
mod stream;

pub use azure::AzureOpenAiProvider;
pub use bedrock::BedrockProvider;
pub use gemini::GeminiProvider;
pub use mock::{MockProvider, MockResponse};
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use stream::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;

use crate::agents::config::{LlmConfig, ProviderConfig, ProviderKind};
use crate::agents::domain::{ChatMessage, ToolDefinition};
use crate::agents::error::{LlmError, LlmResult};

/// Trait for LLM providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name
    fn name(&self) -> &str;

    /// Default model used when a request does not name one
    fn model(&self) -> &str;

    fn supports_streaming(&self) -> bool {
        true
    }

    /// Whether tool definitions are honored
    fn supports_tools(&self) -> bool {
        true
    }

    /// Complete a request (non-streaming)
    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse>;

    /// Complete a request with streaming
    fn complete_stream(&self, request: CompletionRequest) -> LlmStream;
}

/// Request for LLM completion
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    /// Model override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default)]
    pub stream: bool,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    /// Apply generation settings from an agent's merged LLM configuration
    pub fn with_llm_config(mut self, llm: &LlmConfig) -> Self {
        self.model = llm.model_override();
        self.temperature = Some(llm.temperature);
        self.max_tokens = Some(llm.max_tokens);
        self.top_p = Some(llm.top_p);
        self.frequency_penalty = Some(llm.frequency_penalty);
        self.presence_penalty = Some(llm.presence_penalty);
        self.stop = if llm.stop_sequences.is_empty() {
            None
        } else {
            Some(llm.stop_sequences.clone())
        };
        self
    }

    /// Text of the system turn, if any
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == crate::agents::domain::Role::System)
            .map(|m| m.content.as_str())
    }

    /// Text of the last user turn, if any
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::agents::domain::Role::User)
            .map(|m| m.content.as_str())
    }
}

/// Tool choice mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    /// Let the model decide
    Auto,
    /// Don't use tools
    None,
    /// Must use a tool
    Required,
    /// Use a specific tool
    Tool { name: String },
}

/// Response from LLM completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub message: ChatMessage,
    pub finish_reason: FinishReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

/// Reason completion stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

/// Token usage information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Resolve an API key from the configured variable, falling back to the provider default
pub(crate) fn resolve_api_key(config: &ProviderConfig, default_var: &str) -> LlmResult<String> {
    let var = config.api_key_env.as_deref().unwrap_or(default_var);
    env::var(var).map_err(|_| LlmError::Authentication(format!("Environment variable {} not set", var)))
}

/// Create an LLM provider from configuration
pub fn create_provider(config: &ProviderConfig) -> LlmResult<Arc<dyn LlmProvider>> {
    match config.provider {
        ProviderKind::OpenAi => Ok(Arc::new(OpenAiProvider::new(config)?)),
        ProviderKind::AzureOpenAi => Ok(Arc::new(AzureOpenAiProvider::new(config)?)),
        ProviderKind::Bedrock => Ok(Arc::new(BedrockProvider::new(config)?)),
        ProviderKind::Gemini => Ok(Arc::new(GeminiProvider::new(config)?)),
        ProviderKind::Ollama => Ok(Arc::new(OllamaProvider::new(config)?)),
        ProviderKind::Mock => Ok(Arc::new(MockProvider::echo())),
    }
}
