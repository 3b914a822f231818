//! Chat-completion agent with iterative tool calling

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::{render_system_prompt, Agent, SystemPrompt};
use crate::agents::config::AgentConfig;
use crate::agents::domain::{ChatMessage, MessageContext, TextStream, TextStreamSender, ToolCall, ToolOutcome};
use crate::agents::error::{backend_error, LlmResult};
use crate::agents::llm::{CompletionRequest, LlmProvider, ToolCallAccumulator, ToolChoice};
use crate::agents::memory::MemoryService;
use crate::agents::tools::ToolRegistry;

/// Upper bound on completion rounds while the model keeps requesting tools
pub const MAX_TOOL_ITERATIONS: usize = 5;

/// Agent backed by any [`LlmProvider`].
///
/// With a non-empty tool registry and a tool-capable provider, replies run
/// through the tool loop: the model may request calls, results are fed back,
/// and the loop ends when a turn carries no calls or the bound is hit.
#[derive(Clone)]
pub struct ChatAgent {
    config: Arc<AgentConfig>,
    provider: Arc<dyn LlmProvider>,
    tools: Option<Arc<ToolRegistry>>,
    memory: Option<MemoryService>,
    system_prompt: Arc<SystemPrompt>,
}

impl ChatAgent {
    pub fn new(
        config: AgentConfig,
        provider: Arc<dyn LlmProvider>,
        tools: Option<Arc<ToolRegistry>>,
        memory: Option<MemoryService>,
    ) -> Self {
        let system_prompt = Arc::new(SystemPrompt::new(config.system_prompt.clone()));
        Self {
            config: Arc::new(config),
            provider,
            tools,
            memory,
            system_prompt,
        }
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    fn label(&self) -> &'static str {
        self.config.backend.label()
    }

    /// The registry, when tools can actually be offered to the provider
    fn active_tools(&self) -> Option<&Arc<ToolRegistry>> {
        self.tools
            .as_ref()
            .filter(|registry| !registry.is_empty() && self.provider.supports_tools())
    }

    fn request(&self, messages: Vec<ChatMessage>) -> CompletionRequest {
        CompletionRequest::new(messages).with_llm_config(&self.config.llm)
    }

    /// System prompt, optional history window, then the user turn
    async fn build_messages(&self, message: &str, ctx: &MessageContext) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(render_system_prompt(
            &self.system_prompt.get(),
            &ctx.extra,
        ))];

        if let (Some(memory), Some(thread_id), Some(window)) =
            (&self.memory, ctx.thread_id.as_deref(), self.config.history_window)
        {
            match memory.get_last_n_messages(thread_id, window + 1).await {
                Ok(mut history) => {
                    // The orchestrator may already have stored this turn
                    if history
                        .last()
                        .map_or(false, |m| m.sender == "user" && m.content.to_string() == message)
                    {
                        history.pop();
                    }
                    let skip = history.len().saturating_sub(window);
                    for stored in history.into_iter().skip(skip) {
                        let text = stored.content.to_string();
                        messages.push(if stored.sender == "user" {
                            ChatMessage::user(text)
                        } else {
                            ChatMessage::assistant(text)
                        });
                    }
                }
                Err(e) => warn!(agent = %self.config.name, error = %e, "Failed to load history"),
            }
        }

        messages.push(ChatMessage::user(message));
        messages
    }

    /// Run one requested tool call and render its outcome for the model
    async fn run_tool(registry: &ToolRegistry, call: &ToolCall) -> String {
        if registry.get_tool(&call.name).is_none() {
            warn!(tool = %call.name, "Model requested an unknown tool");
            return format!("[Tool '{}' not found]", call.name);
        }
        debug!(tool = %call.name, arguments = %call.arguments, "Dispatching tool call");
        match registry.dispatch(call).await.outcome {
            ToolOutcome::Result(Value::String(text)) => text,
            ToolOutcome::Result(value) => value.to_string(),
            ToolOutcome::Error(e) => format!("[Error executing tool '{}': {}]", call.name, e),
        }
    }

    async fn append_tool_turns(
        registry: &ToolRegistry,
        messages: &mut Vec<ChatMessage>,
        content: String,
        calls: Vec<ToolCall>,
    ) {
        let mut results = Vec::with_capacity(calls.len());
        for call in &calls {
            let output = Self::run_tool(registry, call).await;
            results.push(ChatMessage::tool_result(&call.id, &call.name, &Value::String(output)));
        }
        messages.push(ChatMessage::assistant_with_tools(content, calls));
        messages.extend(results);
    }

    async fn complete(&self, mut messages: Vec<ChatMessage>) -> LlmResult<String> {
        let Some(registry) = self.active_tools() else {
            let response = self.provider.complete(self.request(messages)).await?;
            return Ok(response.message.content);
        };

        let definitions = registry.definitions();
        let mut last_content = String::new();

        for iteration in 1..=MAX_TOOL_ITERATIONS {
            let mut request = self.request(messages.clone());
            request.tools = Some(definitions.clone());
            request.tool_choice = Some(ToolChoice::Auto);

            let response = self.provider.complete(request).await?;
            let content = response.message.content;
            let calls = response.message.tool_calls.unwrap_or_default();
            if calls.is_empty() {
                return Ok(content);
            }

            debug!(agent = %self.config.name, iteration, calls = calls.len(), "Model requested tools");
            last_content = content.clone();
            Self::append_tool_turns(registry, &mut messages, content, calls).await;
        }

        warn!(
            agent = %self.config.name,
            "Tool loop reached {} iterations, returning last assistant content",
            MAX_TOOL_ITERATIONS
        );
        Ok(last_content)
    }

    /// Forward text fragments of one streamed completion; false once the consumer is gone
    async fn forward(
        &self,
        request: CompletionRequest,
        sender: &TextStreamSender,
        accumulator: &mut ToolCallAccumulator,
        content: &mut String,
    ) -> LlmResult<bool> {
        let mut stream = self.provider.complete_stream(request);
        while let Some(result) = stream.next_chunk().await {
            let chunk = result?;
            for delta in &chunk.tool_calls {
                accumulator.apply_delta(delta);
            }
            if !chunk.content.is_empty() {
                content.push_str(&chunk.content);
                if !sender.send(chunk.content).await {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    async fn stream_reply(&self, mut messages: Vec<ChatMessage>, sender: &TextStreamSender) -> LlmResult<()> {
        let registry = self.active_tools();

        let mut request = self.request(messages.clone());
        request.stream = true;
        if let Some(registry) = registry {
            request.tools = Some(registry.definitions());
            request.tool_choice = Some(ToolChoice::Auto);
        }

        let mut accumulator = ToolCallAccumulator::new();
        let mut content = String::new();
        if !self.forward(request, sender, &mut accumulator, &mut content).await? {
            return Ok(());
        }

        let Some(registry) = registry else {
            return Ok(());
        };
        let calls = accumulator.build();
        if calls.is_empty() {
            return Ok(());
        }

        // One dispatch pass, then a single follow-up without tools
        debug!(agent = %self.config.name, calls = calls.len(), "Dispatching streamed tool calls");
        Self::append_tool_turns(registry, &mut messages, content, calls).await;

        let mut follow_up = self.request(messages);
        follow_up.stream = true;
        let mut ignored = ToolCallAccumulator::new();
        self.forward(follow_up, sender, &mut ignored, &mut String::new())
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl Agent for ChatAgent {
    fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn system_prompt(&self) -> String {
        self.system_prompt.get()
    }

    fn set_system_prompt(&self, prompt: String) {
        self.system_prompt.set(prompt);
    }

    fn tool_registry(&self) -> Option<&Arc<ToolRegistry>> {
        self.tools.as_ref()
    }

    fn memory(&self) -> Option<&MemoryService> {
        self.memory.as_ref()
    }

    async fn handle_message(&self, message: &str, ctx: &MessageContext) -> String {
        if self.config.streaming {
            return self.handle_message_stream(message, ctx).await.collect_text().await;
        }

        let messages = self.build_messages(message, ctx).await;
        match self.complete(messages).await {
            Ok(content) => content,
            Err(e) => {
                warn!(agent = %self.config.name, error = %e, "Completion failed");
                backend_error(self.label(), e)
            }
        }
    }

    async fn handle_message_stream(&self, message: &str, ctx: &MessageContext) -> TextStream {
        let messages = self.build_messages(message, ctx).await;
        let (sender, stream) = TextStream::channel(64);
        let agent = self.clone();

        tokio::spawn(async move {
            if let Err(e) = agent.stream_reply(messages, &sender).await {
                warn!(agent = %agent.config.name, error = %e, "Streamed completion failed");
                let _ = sender.send(backend_error(agent.label(), e)).await;
            }
        });

        stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::config::{BackendConfig, ProviderKind};
    use crate::agents::domain::Role;
    use crate::agents::llm::{MockProvider, MockResponse};
    use crate::agents::memory::InMemoryRepository;
    use crate::agents::tools::Tool;
    use futures::StreamExt;
    use serde_json::json;

    fn config() -> AgentConfig {
        AgentConfig::new("helper", "General helper", BackendConfig::llm(ProviderKind::OpenAi))
            .unwrap()
            .with_system_prompt("Be brief.")
    }

    fn weather_tools() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register_tool(
            Tool::builder("weather")
                .description("Current weather for a city")
                .sync_function(|args| {
                    let city = args.get("city").and_then(Value::as_str).unwrap_or("nowhere");
                    Ok(json!(format!("Sunny in {}", city)))
                })
                .build()
                .unwrap(),
        );
        registry.register_tool(
            Tool::builder("broken")
                .description("Always fails")
                .sync_function(|_| Err("disk on fire".to_string()))
                .build()
                .unwrap(),
        );
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_plain_completion() {
        let provider = MockProvider::new().with_response("Hello there");
        let agent = ChatAgent::new(config(), Arc::new(provider.clone()), None, None);

        let reply = agent.handle_message("hi", &MessageContext::new()).await;
        assert_eq!(reply, "Hello there");

        let request = &provider.requests()[0];
        assert_eq!(request.system_prompt(), Some("Be brief."));
        assert_eq!(request.last_user_message(), Some("hi"));
        assert_eq!(request.temperature, Some(0.7));
        assert!(request.tools.is_none());
    }

    #[tokio::test]
    async fn test_tool_loop_feeds_results_back() {
        let provider = MockProvider::new()
            .with_tool_call("weather", json!({"city": "Oslo"}))
            .with_response("It is sunny in Oslo.");
        let agent = ChatAgent::new(config(), Arc::new(provider.clone()), Some(weather_tools()), None);

        let reply = agent.handle_message("weather?", &MessageContext::new()).await;
        assert_eq!(reply, "It is sunny in Oslo.");

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].tools.as_ref().unwrap().len(), 2);

        let second = &requests[1].messages;
        let assistant = &second[second.len() - 2];
        assert!(assistant.has_tool_calls());
        let tool_turn = second.last().unwrap();
        assert_eq!(tool_turn.role, Role::Tool);
        assert_eq!(tool_turn.content, "Sunny in Oslo");
        assert_eq!(tool_turn.tool_call_id.as_deref(), Some(assistant.tool_calls.as_ref().unwrap()[0].id.as_str()));
    }

    #[tokio::test]
    async fn test_tool_failures_are_reported_to_the_model() {
        let provider = MockProvider::new()
            .with_tool_call("missing", json!({}))
            .with_tool_call("broken", json!({}))
            .with_response("done");
        let agent = ChatAgent::new(config(), Arc::new(provider.clone()), Some(weather_tools()), None);

        assert_eq!(agent.handle_message("go", &MessageContext::new()).await, "done");

        let requests = provider.requests();
        assert_eq!(requests[1].messages.last().unwrap().content, "[Tool 'missing' not found]");
        assert_eq!(
            requests[2].messages.last().unwrap().content,
            "[Error executing tool 'broken': disk on fire]"
        );
    }

    #[tokio::test]
    async fn test_tool_loop_is_bounded() {
        let provider = MockProvider::new().with_handler(|_| {
            Some(MockResponse::ToolCalls {
                content: "still working".to_string(),
                calls: vec![ToolCall::new(ToolCall::generate_id(), "weather", json!({}))],
            })
        });
        let agent = ChatAgent::new(config(), Arc::new(provider.clone()), Some(weather_tools()), None);

        let reply = agent.handle_message("loop", &MessageContext::new()).await;
        assert_eq!(reply, "still working");
        assert_eq!(provider.request_count(), MAX_TOOL_ITERATIONS);
    }

    #[tokio::test]
    async fn test_provider_without_tools_skips_loop() {
        let provider = MockProvider::new().without_tools().with_response("plain");
        let agent = ChatAgent::new(config(), Arc::new(provider.clone()), Some(weather_tools()), None);

        assert_eq!(agent.handle_message("hi", &MessageContext::new()).await, "plain");
        assert!(provider.requests()[0].tools.is_none());
    }

    #[tokio::test]
    async fn test_backend_error_is_tagged() {
        let provider = MockProvider::new().with_error("quota exceeded");
        let agent = ChatAgent::new(config(), Arc::new(provider), None, None);

        let reply = agent.handle_message("hi", &MessageContext::new()).await;
        assert_eq!(reply, "[OpenAIAgent error: API error: 500 - quota exceeded]");
    }

    #[tokio::test]
    async fn test_stream_forwards_fragments() {
        let provider = MockProvider::new().with_response("one two three");
        let agent = ChatAgent::new(config(), Arc::new(provider), None, None);

        let chunks: Vec<String> = agent
            .handle_message_stream("hi", &MessageContext::new())
            .await
            .collect()
            .await;
        assert_eq!(chunks, vec!["one ", "two ", "three"]);
    }

    #[tokio::test]
    async fn test_stream_dispatches_once_then_follows_up() {
        let provider = MockProvider::new()
            .with_tool_call("weather", json!({"city": "Rome"}))
            .with_response("Rome is sunny");
        let agent = ChatAgent::new(config(), Arc::new(provider.clone()), Some(weather_tools()), None);

        let text = agent
            .handle_message_stream("weather?", &MessageContext::new())
            .await
            .collect_text()
            .await;
        assert_eq!(text, "Rome is sunny");

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].tools.is_none());
        assert_eq!(requests[1].messages.last().unwrap().content, "Sunny in Rome");
    }

    #[tokio::test]
    async fn test_stream_error_yields_one_chunk() {
        let provider = MockProvider::new().with_error("offline");
        let agent = ChatAgent::new(config(), Arc::new(provider), None, None);

        let chunks: Vec<String> = agent
            .handle_message_stream("hi", &MessageContext::new())
            .await
            .collect()
            .await;
        assert_eq!(chunks, vec!["[OpenAIAgent error: API error: 500 - offline]"]);
    }

    #[tokio::test]
    async fn test_streaming_config_collects_stream() {
        let provider = MockProvider::new().with_response("streamed reply");
        let agent = ChatAgent::new(config().with_streaming(), Arc::new(provider), None, None);

        assert_eq!(agent.handle_message("hi", &MessageContext::new()).await, "streamed reply");
    }

    #[tokio::test]
    async fn test_history_window_and_templated_prompt() {
        let memory = MemoryService::new(Arc::new(InMemoryRepository::new()));
        memory.store_message("t1", "user", "first", None).await.unwrap();
        memory.store_message("t1", "helper", "[helper] reply", None).await.unwrap();
        memory.store_message("t1", "user", "second", None).await.unwrap();

        let provider = MockProvider::new().with_response("ok");
        let config = config()
            .with_system_prompt("Talk to {{user_name}}.")
            .with_history_window(2);
        let agent = ChatAgent::new(config, Arc::new(provider.clone()), None, Some(memory));

        let ctx = MessageContext::for_thread("t1").with_extra("user_name", json!("Ada"));
        agent.handle_message("second", &ctx).await;

        let messages = &provider.requests()[0].messages;
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
        assert_eq!(messages[0].content, "Talk to Ada.");
        assert_eq!(messages[1].content, "first");
        assert_eq!(messages[3].content, "second");
    }

    #[test]
    fn test_set_system_prompt() {
        let agent = ChatAgent::new(config(), Arc::new(MockProvider::new()), None, None);
        agent.set_system_prompt("New prompt".to_string());
        assert_eq!(agent.system_prompt(), "New prompt");
        assert_eq!(agent.config().system_prompt, "Be brief.");
    }
}
