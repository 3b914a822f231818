//! Error types for the agent system

use thiserror::Error;

/// Errors that can occur during agent, tool and memory operations
#[derive(Debug, Error)]
pub enum AgentError {
    /// Agent, tool or other named entry not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A tool exists but does not expose the requested method
    #[error("Tool '{tool}' has no method '{method}'")]
    MethodNotFound { tool: String, method: String },

    /// Thread not found in a repository
    #[error("Thread not found: {0}")]
    ThreadNotFound(String),

    /// Thread already exists in a repository
    #[error("Thread already exists: {0}")]
    ThreadExists(String),

    /// Configuration error (raised at construction time)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// LLM provider error
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Tool execution error
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Memory/persistence error
    #[error("Memory error: {0}")]
    Memory(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors specific to LLM provider operations
#[derive(Debug, Error)]
pub enum LlmError {
    /// API error
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Rate limited
    #[error("Rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Authentication error
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// Streaming error
    #[error("Streaming error: {0}")]
    Streaming(String),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Timeout
    #[error("Request timed out")]
    Timeout,
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else if err.is_connect() {
            LlmError::Network(format!("Connection error: {}", err))
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::Memory(format!("IO error: {}", err))
    }
}

/// Result type alias for agent operations
pub type AgentResult<T> = Result<T, AgentError>;

/// Result type alias for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// Format a backend failure the way agents surface it in a response body.
///
/// Orchestrators inline this string into the conversation instead of failing,
/// so callers detect errors by matching the `[<label> error: ...]` shape.
pub fn backend_error(label: &str, detail: impl std::fmt::Display) -> String {
    format!("[{} error: {}]", label, detail)
}
