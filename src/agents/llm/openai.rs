//! OpenAI LLM Provider with streaming support

use std::fmt::Display;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    resolve_api_key, CompletionRequest, CompletionResponse, FinishReason, LineBuffer, LlmProvider, LlmStream,
    LlmStreamSender, StreamChunk, TokenUsage, ToolCallDelta, ToolChoice,
};
use crate::agents::config::ProviderConfig;
use crate::agents::domain::{ChatMessage, ToolCall, ToolDefinition};
use crate::agents::error::{LlmError, LlmResult};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI chat-completions provider
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiProvider {
    /// Create a new OpenAI provider from configuration
    pub fn new(config: &ProviderConfig) -> LlmResult<Self> {
        let api_key = resolve_api_key(config, "OPENAI_API_KEY")?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.model_or_default(),
        })
    }

    /// Build the request body for the chat-completions API
    pub(crate) fn build_request_body(request: &CompletionRequest, default_model: &str) -> Value {
        let mut body = json!({
            "model": request.model.as_deref().unwrap_or(default_model),
            "messages": convert_messages(&request.messages),
        });

        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(top_p) = request.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(penalty) = request.frequency_penalty {
            body["frequency_penalty"] = json!(penalty);
        }
        if let Some(penalty) = request.presence_penalty {
            body["presence_penalty"] = json!(penalty);
        }
        if let Some(stop) = &request.stop {
            body["stop"] = json!(stop);
        }

        if let Some(tools) = request.tools.as_ref().filter(|t| !t.is_empty()) {
            body["tools"] = json!(tools.iter().map(tool_definition).collect::<Vec<_>>());
            body["tool_choice"] = match request.tool_choice.as_ref().unwrap_or(&ToolChoice::Auto) {
                ToolChoice::Auto => json!("auto"),
                ToolChoice::None => json!("none"),
                ToolChoice::Required => json!("required"),
                ToolChoice::Tool { name } => json!({
                    "type": "function",
                    "function": { "name": name }
                }),
            };
        }

        if request.stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({ "include_usage": true });
        }

        body
    }

    pub(crate) fn parse_response(response: OpenAiResponse) -> LlmResult<CompletionResponse> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Parse("No choices in response".to_string()))?;

        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                ToolCall::new(
                    tc.id,
                    tc.function.name,
                    ToolCall::parse_arguments(&tc.function.arguments),
                )
            })
            .collect();

        Ok(CompletionResponse {
            message: ChatMessage::assistant_with_tools(
                choice.message.content.unwrap_or_default(),
                tool_calls,
            ),
            finish_reason: finish_reason(choice.finish_reason.as_deref()),
            usage: response.usage.map(Into::into),
        })
    }

    /// Decode one SSE `data:` payload; `None` for `[DONE]` or unparseable events
    pub(crate) fn parse_stream_event(data: &str) -> Option<StreamChunk> {
        if data == "[DONE]" {
            return None;
        }

        let parsed: OpenAiStreamResponse = serde_json::from_str(data).ok()?;
        let mut chunk = StreamChunk {
            usage: parsed.usage.map(Into::into),
            ..Default::default()
        };

        if let Some(choice) = parsed.choices.into_iter().next() {
            chunk.content = choice.delta.content.unwrap_or_default();
            for tc in choice.delta.tool_calls.unwrap_or_default() {
                let mut delta = ToolCallDelta::new(tc.index);
                delta.id = tc.id;
                if let Some(function) = tc.function {
                    delta.name = function.name;
                    delta.arguments = function.arguments;
                }
                chunk.tool_calls.push(delta);
            }
            if choice.finish_reason.is_some() {
                chunk.finish_reason = Some(finish_reason(choice.finish_reason.as_deref()));
            }
        }

        Some(chunk)
    }

    /// POST `body` and forward SSE events until `[DONE]` or the consumer hangs up
    pub(crate) async fn stream_sse(request: reqwest::RequestBuilder, sender: LlmStreamSender) -> LlmResult<()> {
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        Self::forward_sse(response.bytes_stream(), sender).await
    }

    async fn forward_sse<S, B, E>(mut body: S, sender: LlmStreamSender) -> LlmResult<()>
    where
        S: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: Display,
    {
        let mut lines = LineBuffer::new();

        while let Some(chunk_result) = body.next().await {
            let bytes = chunk_result.map_err(|e| LlmError::Streaming(e.to_string()))?;
            lines.push(bytes.as_ref());

            while let Some(line) = lines.next_line() {
                let Some(data) = line.trim().strip_prefix("data:").map(str::trim) else {
                    continue;
                };
                if data == "[DONE]" {
                    return Ok(());
                }
                if let Some(chunk) = Self::parse_stream_event(data) {
                    if sender.send(chunk).await.is_err() {
                        // Receiver dropped
                        return Ok(());
                    }
                }
            }
        }

        Ok(())
    }

    fn post(&self, body: &Value) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse> {
        let body = Self::build_request_body(&request, &self.model);
        let response = self.post(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(format!("Failed to parse response: {}", e)))?;

        Self::parse_response(parsed)
    }

    fn complete_stream(&self, mut request: CompletionRequest) -> LlmStream {
        let (sender, stream) = LlmStream::channel(64);
        request.stream = true;
        let http = self.post(&Self::build_request_body(&request, &self.model));

        tokio::spawn(async move {
            if let Err(e) = Self::stream_sse(http, sender.clone()).await {
                let _ = sender.send_error(e).await;
            }
        });

        stream
    }
}

/// Convert chat messages to the OpenAI wire format
pub(crate) fn convert_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let mut msg = json!({
                "role": m.role.as_str(),
                "content": m.content,
            });

            if let Some(tool_calls) = &m.tool_calls {
                msg["tool_calls"] = json!(tool_calls
                    .iter()
                    .map(|tc| json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {
                            "name": tc.name,
                            "arguments": tc.arguments.to_string()
                        }
                    }))
                    .collect::<Vec<_>>());
            }
            if let Some(tool_call_id) = &m.tool_call_id {
                msg["tool_call_id"] = json!(tool_call_id);
            }
            if let Some(name) = &m.name {
                msg["name"] = json!(name);
            }

            msg
        })
        .collect()
}

fn tool_definition(tool: &ToolDefinition) -> Value {
    // OpenAI requires at least {"type": "object"} for function parameters
    let parameters = match tool.parameters.as_object() {
        Some(params) if !params.is_empty() => {
            let mut params = params.clone();
            params.entry("type").or_insert_with(|| json!("object"));
            Value::Object(params)
        }
        _ => json!({ "type": "object", "properties": {}, "required": [] }),
    };

    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": parameters
        }
    })
}

fn finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("length") => FinishReason::Length,
        Some("tool_calls") => FinishReason::ToolCalls,
        Some("content_filter") => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

// OpenAI API response types

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCall {
    id: String,
    function: OpenAiFunction,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<OpenAiUsage> for TokenUsage {
    fn from(u: OpenAiUsage) -> Self {
        Self {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamResponse {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiStreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamToolCall {
    index: usize,
    id: Option<String>,
    function: Option<OpenAiStreamFunction>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}
