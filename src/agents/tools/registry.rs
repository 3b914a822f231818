//! Tool catalog and dispatch

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::extract::{extract_tool_calls, ProviderFormat};
use super::tool::Tool;
use crate::agents::domain::{ToolCall, ToolDefinition, ToolResult};
use crate::agents::error::{AgentError, AgentResult};

/// Catalog of tools keyed by name; registering a duplicate name replaces the old entry
#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_tool(&mut self, tool: Tool) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), Arc::new(tool)).is_some() {
            debug!(tool = %name, "Replaced existing tool registration");
        }
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<Tool>> {
        self.tools.get(name).cloned()
    }

    /// Registered tool names, sorted
    pub fn list_tools(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get_tools(&self) -> Vec<Arc<Tool>> {
        let mut tools: Vec<Arc<Tool>> = self.tools.values().cloned().collect();
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool definitions advertised to providers
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.get_tools().iter().map(|t| t.to_definition()).collect()
    }

    /// Invoke a tool's primary function by name
    pub async fn invoke(&self, name: &str, arguments: &Value) -> AgentResult<Value> {
        let tool = self
            .get_tool(name)
            .ok_or_else(|| AgentError::NotFound(format!("Tool '{}' not found in the registry", name)))?;

        let args = match arguments {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };

        tool.call(args).await.map_err(AgentError::ToolExecution)
    }

    /// Execute one normalized tool call, isolating its failure
    pub async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        match self.invoke(&call.name, &call.arguments).await {
            Ok(result) => ToolResult::success(&call.id, &call.name, result),
            Err(AgentError::NotFound(message)) => ToolResult::failure(&call.id, &call.name, message),
            Err(AgentError::ToolExecution(message)) => {
                warn!(tool = %call.name, error = %message, "Tool execution failed");
                ToolResult::failure(&call.id, &call.name, message)
            }
            Err(other) => ToolResult::failure(&call.id, &call.name, other.to_string()),
        }
    }

    /// Extract tool calls from a raw provider response and run each one.
    ///
    /// Returns `None` when the response requests no tools. Every requested
    /// call yields exactly one entry, with `result` or `error`.
    pub async fn handle_tool_call(&self, raw: &Value, format: ProviderFormat) -> Option<Vec<ToolResult>> {
        let calls = extract_tool_calls(raw, format);
        if calls.is_empty() {
            return None;
        }

        let mut results = Vec::with_capacity(calls.len());
        for call in &calls {
            results.push(self.dispatch(call).await);
        }
        Some(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::domain::ToolOutcome;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_tool(name: &str, counter: Arc<AtomicUsize>) -> Tool {
        Tool::builder(name)
            .description("Counts invocations")
            .sync_function(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!("done"))
            })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_no_tool_calls_returns_none() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register_tool(counting_tool("count", counter.clone()));

        let raw = json!({ "choices": [{ "message": { "content": "no tools here" } }] });
        assert!(registry.handle_tool_call(&raw, ProviderFormat::OpenAi).await.is_none());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_partial_failure_is_isolated() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register_tool(counting_tool("count", counter.clone()));

        let raw = json!({ "choices": [{ "message": { "tool_calls": [
            { "id": "c1", "function": { "name": "count", "arguments": "{}" } },
            { "id": "c2", "function": { "name": "missing", "arguments": "{}" } }
        ]}}]});

        let results = registry
            .handle_tool_call(&raw, ProviderFormat::OpenAi)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].outcome, ToolOutcome::Result(json!("done")));
        assert_eq!(
            results[1].outcome,
            ToolOutcome::Error("Tool 'missing' not found in the registry".to_string())
        );
        assert_eq!(results[1].tool_call_id, "c2");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tool_error_is_captured() {
        let mut registry = ToolRegistry::new();
        registry.register_tool(
            Tool::builder("fail")
                .sync_function(|_| Err("boom".to_string()))
                .build()
                .unwrap(),
        );

        let raw = json!({ "toolUse": { "toolUseId": "t1", "name": "fail", "parameters": {} } });
        let results = registry.handle_tool_call(&raw, ProviderFormat::Bedrock).await.unwrap();
        assert_eq!(results[0].outcome, ToolOutcome::Error("boom".to_string()));
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = ToolRegistry::new();
        registry.register_tool(
            Tool::builder("t").description("first").sync_function(|_| Ok(Value::Null)).build().unwrap(),
        );
        registry.register_tool(
            Tool::builder("t").description("second").sync_function(|_| Ok(Value::Null)).build().unwrap(),
        );

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_tool("t").unwrap().description(), "second");
        assert!(registry.get_tool("absent").is_none());
        assert_eq!(registry.definitions()[0].description, "second");
    }
}
