//! Tool call types for agent interactions

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool call requested by an LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier echoed back in the tool-result turn (empty for providers without ids)
    pub id: String,
    /// Name of the tool being called
    pub name: String,
    /// Arguments passed to the tool (as a JSON object)
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Generate a unique ID for a tool call
    pub fn generate_id() -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("call_{}", &id[..24])
    }

    /// Parse a JSON argument string, degrading to empty arguments when malformed
    pub fn parse_arguments(raw: &str) -> Value {
        match serde_json::from_str::<Value>(raw) {
            Ok(value @ Value::Object(_)) => value,
            _ => Value::Object(Default::default()),
        }
    }
}

/// Outcome of dispatching one tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    Result(Value),
    Error(String),
}

/// Per-call result produced by [`crate::agents::tools::ToolRegistry::handle_tool_call`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    #[serde(flatten)]
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn success(tool_call_id: impl Into<String>, name: impl Into<String>, result: Value) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            outcome: ToolOutcome::Result(result),
        }
    }

    pub fn failure(tool_call_id: impl Into<String>, name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            outcome: ToolOutcome::Error(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Error(_))
    }
}

/// Definition of a tool as advertised to an LLM provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema object describing the parameters
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}
