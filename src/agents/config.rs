//! Configuration types for agents and their backends

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{AgentError, AgentResult};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Generation settings shared by every LLM-backed agent.
///
/// Caller-supplied settings are merged over these defaults key by key, so a
/// partial override keeps the remaining defaults.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmConfig {
    /// `"default"` leaves the model choice to the provider
    pub model_name: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub stop_sequences: Vec<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model_name: "default".to_string(),
            temperature: 0.7,
            max_tokens: 2000,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            stop_sequences: Vec::new(),
        }
    }
}

impl LlmConfig {
    /// Deep-merge `overrides` (a JSON object) over this configuration
    pub fn merged(&self, overrides: &Value) -> AgentResult<Self> {
        if overrides.is_null() {
            return Ok(self.clone());
        }
        if !overrides.is_object() {
            return Err(AgentError::Configuration(
                "llm overrides must be an object".to_string(),
            ));
        }

        let mut base = serde_json::to_value(self)?;
        deep_merge(&mut base, overrides);
        serde_json::from_value(base)
            .map_err(|e| AgentError::Configuration(format!("Invalid llm settings: {}", e)))
    }

    /// Model to request, or `None` to use the provider's own default
    pub fn model_override(&self) -> Option<String> {
        if self.model_name.is_empty() || self.model_name == "default" {
            None
        } else {
            Some(self.model_name.clone())
        }
    }
}

/// Merge `patch` into `base`; nested objects merge per key, everything else replaces
pub fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                match base.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        deep_merge(existing, value)
                    }
                    _ => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

/// Configuration for one agent
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    /// Unique agent name
    pub name: String,
    /// Human-readable description, used for routing
    pub description: String,
    /// Free-form type label; defaults to the backend's label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Generation settings, merged over defaults
    #[serde(default)]
    pub llm: LlmConfig,
    pub backend: BackendConfig,
    /// Attach the shared tool registry
    #[serde(default)]
    pub tools: bool,
    /// Generate through the streaming path even for non-streaming calls
    #[serde(default)]
    pub streaming: bool,
    /// Number of prior thread messages replayed to the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_window: Option<usize>,
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

impl AgentConfig {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        backend: BackendConfig,
    ) -> AgentResult<Self> {
        let config = Self {
            name: name.into(),
            description: description.into(),
            agent_type: None,
            system_prompt: default_system_prompt(),
            llm: LlmConfig::default(),
            backend,
            tools: false,
            streaming: false,
            history_window: None,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_agent_type(mut self, agent_type: impl Into<String>) -> Self {
        self.agent_type = Some(agent_type.into());
        self
    }

    pub fn with_tools(mut self) -> Self {
        self.tools = true;
        self
    }

    pub fn with_streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    pub fn with_history_window(mut self, n: usize) -> Self {
        self.history_window = Some(n);
        self
    }

    /// Reject configurations without a name or description
    pub fn validate(&self) -> AgentResult<()> {
        if self.name.trim().is_empty() {
            return Err(AgentError::Configuration(
                "Agent name cannot be empty".to_string(),
            ));
        }
        if self.description.trim().is_empty() {
            return Err(AgentError::Configuration(format!(
                "Agent '{}' must have a description",
                self.name
            )));
        }
        Ok(())
    }

    /// Effective type label
    pub fn agent_type(&self) -> String {
        self.agent_type
            .clone()
            .unwrap_or_else(|| self.backend.label().to_string())
    }
}

/// Where an agent's answers come from
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    /// A chat-completion provider
    Llm(ProviderConfig),
    /// A persona-driven single-task agent
    Crew(CrewConfig),
    /// An agent served over HTTP
    Remote(RemoteConfig),
    /// Retrieval-augmented answering over a document store
    Retrieval(RetrievalConfig),
}

impl BackendConfig {
    pub fn llm(provider: ProviderKind) -> Self {
        Self::Llm(ProviderConfig::new(provider))
    }

    /// Type label used when the agent does not set one
    pub fn label(&self) -> &'static str {
        match self {
            Self::Llm(provider) => provider.provider.agent_label(),
            Self::Crew(_) => "CrewAIAgent",
            Self::Remote(_) => "RemoteAgent",
            Self::Retrieval(_) => "RetrievalAgent",
        }
    }

    /// Provider configuration, for backends that talk to an LLM
    pub fn provider(&self) -> Option<&ProviderConfig> {
        match self {
            Self::Llm(provider) => Some(provider),
            Self::Crew(crew) => Some(&crew.llm),
            Self::Retrieval(retrieval) => Some(&retrieval.llm),
            Self::Remote(_) => None,
        }
    }
}

/// Supported LLM providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "azure_openai", alias = "azure")]
    AzureOpenAi,
    Bedrock,
    #[serde(alias = "google")]
    Gemini,
    Ollama,
    /// Scripted provider; echoes the user message when unscripted
    Mock,
}

impl ProviderKind {
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAi | Self::AzureOpenAi => "gpt-4o",
            Self::Bedrock => "anthropic.claude-v2",
            Self::Gemini => "gemini-1.5-flash",
            Self::Ollama => "llama3.1:latest",
            Self::Mock => "mock",
        }
    }

    pub fn agent_label(&self) -> &'static str {
        match self {
            Self::OpenAi => "OpenAIAgent",
            Self::AzureOpenAi => "AzureOpenAIAgent",
            Self::Bedrock => "BedrockAgent",
            Self::Gemini => "GeminiAgent",
            Self::Ollama => "OllamaAgent",
            Self::Mock => "MockAgent",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::AzureOpenAi => write!(f, "azure_openai"),
            Self::Bedrock => write!(f, "bedrock"),
            Self::Gemini => write!(f, "gemini"),
            Self::Ollama => write!(f, "ollama"),
            Self::Mock => write!(f, "mock"),
        }
    }
}

/// LLM provider connection settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProviderConfig {
    pub provider: ProviderKind,
    /// Model, or deployment name for Azure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Environment variable holding the API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Custom endpoint (self-hosted, proxied, or the Azure resource URL)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// AWS region for Bedrock
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Azure OpenAI `api-version`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

impl ProviderConfig {
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn model_or_default(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }
}

/// Persona agent settings.
///
/// `goal` falls back to the agent's system prompt and `backstory` to its
/// description.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrewConfig {
    pub llm: ProviderConfig,
    #[serde(default = "default_crew_role")]
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backstory: Option<String>,
}

fn default_crew_role() -> String {
    "assistant".to_string()
}

impl CrewConfig {
    pub fn new(llm: ProviderConfig) -> Self {
        Self {
            llm,
            role: default_crew_role(),
            goal: None,
            backstory: None,
        }
    }
}

/// Remote HTTP agent settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    pub base_url: String,
    /// Environment variable holding the bearer token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token_env: Option<String>,
    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,
    #[serde(default = "default_remote_timeout")]
    pub timeout_seconds: u64,
}

fn default_verify_ssl() -> bool {
    true
}

fn default_remote_timeout() -> u64 {
    120
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth_token_env: None,
            verify_ssl: true,
            timeout_seconds: default_remote_timeout(),
        }
    }
}

/// Retrieval agent settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    pub llm: ProviderConfig,
    /// Results per paper/section search
    #[serde(default = "default_section_k")]
    pub section_k: usize,
    /// Results for the unfiltered fallback search
    #[serde(default = "default_general_k")]
    pub general_k: usize,
}

fn default_section_k() -> usize {
    3
}

fn default_general_k() -> usize {
    5
}

impl RetrievalConfig {
    pub fn new(llm: ProviderConfig) -> Self {
        Self {
            llm,
            section_k: default_section_k(),
            general_k: default_general_k(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_llm_defaults() {
        let llm = LlmConfig::default();
        assert_eq!(llm.temperature, 0.7);
        assert_eq!(llm.max_tokens, 2000);
        assert_eq!(llm.top_p, 1.0);
        assert!(llm.stop_sequences.is_empty());
        assert_eq!(llm.model_override(), None);
    }

    #[test]
    fn test_llm_merge_keeps_unset_defaults() {
        let merged = LlmConfig::default()
            .merged(&json!({"temperature": 0.2, "model_name": "gpt-4o-mini"}))
            .unwrap();
        assert_eq!(merged.temperature, 0.2);
        assert_eq!(merged.max_tokens, 2000);
        assert_eq!(merged.model_override().as_deref(), Some("gpt-4o-mini"));

        assert!(LlmConfig::default().merged(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_deep_merge_nested() {
        let mut base = json!({"a": {"x": 1, "y": 2}, "b": 1});
        deep_merge(&mut base, &json!({"a": {"y": 3}, "c": true}));
        assert_eq!(base, json!({"a": {"x": 1, "y": 3}, "b": 1, "c": true}));
    }

    #[test]
    fn test_validation() {
        let backend = BackendConfig::llm(ProviderKind::Mock);
        assert!(AgentConfig::new("", "desc", backend.clone()).is_err());
        assert!(matches!(
            AgentConfig::new("a", "  ", backend.clone()),
            Err(AgentError::Configuration(_))
        ));

        let config = AgentConfig::new("a", "desc", backend).unwrap();
        assert_eq!(config.agent_type(), "MockAgent");
        assert_eq!(config.system_prompt, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn test_backend_deserialize() {
        let config: AgentConfig = serde_json::from_value(json!({
            "name": "coder",
            "description": "Writes code",
            "llm": {"temperature": 0.1},
            "backend": {"type": "llm", "provider": "azure", "model": "my-deployment"}
        }))
        .unwrap();
        assert_eq!(config.llm.temperature, 0.1);
        assert_eq!(config.llm.max_tokens, 2000);
        assert_eq!(config.agent_type(), "AzureOpenAIAgent");

        let remote: BackendConfig =
            serde_json::from_value(json!({"type": "remote", "base_url": "http://localhost:8000"}))
                .unwrap();
        match remote {
            BackendConfig::Remote(remote) => assert!(remote.verify_ssl),
            other => panic!("unexpected backend: {:?}", other),
        }
    }
}
