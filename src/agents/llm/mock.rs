//! Mock LLM provider for deterministic testing.
//!
//! Returns pre-configured responses without making any HTTP calls.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider, LlmStream, StreamChunk,
    ToolCallDelta,
};
use crate::agents::domain::{ChatMessage, ToolCall};
use crate::agents::error::{LlmError, LlmResult};

/// A scripted reply
#[derive(Debug, Clone)]
pub enum MockResponse {
    Text(String),
    ToolCalls {
        content: String,
        calls: Vec<ToolCall>,
    },
    Error(String),
}

impl MockResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn tool_call(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self::ToolCalls {
            content: String::new(),
            calls: vec![ToolCall::new(ToolCall::generate_id(), name, arguments)],
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }
}

type Handler = Arc<dyn Fn(&CompletionRequest) -> Option<MockResponse> + Send + Sync>;

/// What to answer once the queue and handler have nothing to say
#[derive(Debug, Clone, Copy)]
enum Fallback {
    Fixed,
    Echo,
}

/// A mock LLM provider that returns pre-configured responses.
///
/// Replies come from the queue first, then from the handler, then from the
/// fallback (a fixed notice, or an echo of the last user message).
#[derive(Clone)]
pub struct MockProvider {
    model: String,
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    handler: Option<Handler>,
    fallback: Fallback,
    tools: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            model: "mock".to_string(),
            responses: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            handler: None,
            fallback: Fallback::Fixed,
            tools: true,
        }
    }

    /// Provider that repeats the last user message when nothing is queued
    pub fn echo() -> Self {
        Self {
            fallback: Fallback::Echo,
            ..Self::new()
        }
    }

    /// Queue a text response
    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.push(MockResponse::text(text))
    }

    /// Queue a single tool call response
    pub fn with_tool_call(self, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        self.push(MockResponse::tool_call(name, arguments))
    }

    /// Queue an error response
    pub fn with_error(self, message: impl Into<String>) -> Self {
        self.push(MockResponse::error(message))
    }

    pub fn with_mock_response(self, response: MockResponse) -> Self {
        self.push(response)
    }

    /// Answer unqueued requests with `handler`; `None` defers to the fallback
    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Option<MockResponse> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Advertise no tool support
    pub fn without_tools(mut self) -> Self {
        self.tools = false;
        self
    }

    fn push(self, response: MockResponse) -> Self {
        lock(&self.responses).push_back(response);
        self
    }

    /// Every request received so far, in order
    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    fn next_response(&self, request: &CompletionRequest) -> MockResponse {
        lock(&self.requests).push(request.clone());

        if let Some(queued) = lock(&self.responses).pop_front() {
            return queued;
        }
        if let Some(response) = self.handler.as_ref().and_then(|h| h(request)) {
            return response;
        }
        match self.fallback {
            Fallback::Fixed => MockResponse::text("(mock: no more queued responses)"),
            Fallback::Echo => MockResponse::text(request.last_user_message().unwrap_or_default()),
        }
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn supports_tools(&self) -> bool {
        self.tools
    }

    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse> {
        match self.next_response(&request) {
            MockResponse::Text(text) => Ok(CompletionResponse {
                message: ChatMessage::assistant(text),
                finish_reason: FinishReason::Stop,
                usage: None,
            }),
            MockResponse::ToolCalls { content, calls } => Ok(CompletionResponse {
                message: ChatMessage::assistant_with_tools(content, calls),
                finish_reason: FinishReason::ToolCalls,
                usage: None,
            }),
            MockResponse::Error(message) => Err(LlmError::Api {
                status: 500,
                message,
            }),
        }
    }

    fn complete_stream(&self, request: CompletionRequest) -> LlmStream {
        let response = self.next_response(&request);
        let (sender, stream) = LlmStream::channel(64);

        tokio::spawn(async move {
            match response {
                MockResponse::Text(text) => {
                    for word in text.split_inclusive(' ') {
                        if sender.send_text(word).await.is_err() {
                            return;
                        }
                    }
                    let _ = sender.send_finish(FinishReason::Stop, None).await;
                }
                MockResponse::ToolCalls { content, calls } => {
                    if !content.is_empty() && sender.send_text(content).await.is_err() {
                        return;
                    }
                    // Arguments arrive in two fragments per call
                    for (index, call) in calls.into_iter().enumerate() {
                        let args = call.arguments.to_string();
                        let split = args.len() / 2;
                        let (head, tail) = args.split_at(
                            (0..=split).rev().find(|i| args.is_char_boundary(*i)).unwrap_or(0),
                        );
                        let first = ToolCallDelta::new(index)
                            .with_id(call.id)
                            .with_name(call.name)
                            .with_arguments(head);
                        let second = ToolCallDelta::new(index).with_arguments(tail);
                        for delta in [first, second] {
                            if sender.send(StreamChunk::tool_call(delta)).await.is_err() {
                                return;
                            }
                        }
                    }
                    let _ = sender.send_finish(FinishReason::ToolCalls, None).await;
                }
                MockResponse::Error(message) => {
                    let _ = sender
                        .send_error(LlmError::Api {
                            status: 500,
                            message,
                        })
                        .await;
                }
            }
        });

        stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_queue_then_fallback() {
        let provider = MockProvider::new().with_response("first").with_error("boom");
        let request = CompletionRequest::new(vec![ChatMessage::user("hi")]);

        let first = provider.complete(request.clone()).await.unwrap();
        assert_eq!(first.message.content, "first");
        assert!(provider.complete(request.clone()).await.is_err());

        let fallback = provider.complete(request).await.unwrap();
        assert_eq!(fallback.message.content, "(mock: no more queued responses)");
        assert_eq!(provider.request_count(), 3);
    }

    #[tokio::test]
    async fn test_echo_and_handler() {
        let echo = MockProvider::echo();
        let reply = echo
            .complete(CompletionRequest::new(vec![ChatMessage::user("ping")]))
            .await
            .unwrap();
        assert_eq!(reply.message.content, "ping");

        let routed = MockProvider::new().with_handler(|req| {
            req.system_prompt()
                .filter(|p| p.contains("router"))
                .map(|_| MockResponse::text("routed"))
        });
        let reply = routed
            .complete(CompletionRequest::new(vec![
                ChatMessage::system("you are a router"),
                ChatMessage::user("x"),
            ]))
            .await
            .unwrap();
        assert_eq!(reply.message.content, "routed");
    }

    #[tokio::test]
    async fn test_stream_text_and_tool_calls() {
        let provider = MockProvider::new()
            .with_response("Hello brave new world")
            .with_tool_call("echo", json!({"text": "hé"}));

        let text = provider
            .complete_stream(CompletionRequest::default())
            .collect()
            .await
            .unwrap();
        assert_eq!(text.message.content, "Hello brave new world");

        let tools = provider
            .complete_stream(CompletionRequest::default())
            .collect()
            .await
            .unwrap();
        assert_eq!(tools.finish_reason, FinishReason::ToolCalls);
        let calls = tools.message.tool_calls.unwrap();
        assert_eq!(calls[0].name, "echo");
        assert_eq!(calls[0].arguments, json!({"text": "hé"}));
    }
}
