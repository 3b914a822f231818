//! Amazon Bedrock LLM Provider with streaming support
//!
//! Talks to the Bedrock runtime over HTTPS with a bearer API key. The request
//! body depends on the model family:
//! - Claude 3+ (`anthropic.claude-3*`): messages API
//! - Legacy Claude (`anthropic.claude-v2`, `claude-instant`): `prompt` text
//! - Titan (`amazon.titan*`): `inputText`
//!
//! Streamed responses arrive as AWS event-stream frames whose payload is
//! `{"bytes": "<base64 model chunk>"}`.

use async_trait::async_trait;
use base64::Engine;
use bytes::{Buf, BytesMut};
use futures::StreamExt;
use serde_json::{json, Value};

use super::{
    resolve_api_key, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, LlmStream,
    LlmStreamSender, StreamChunk, TokenUsage, ToolCallDelta,
};
use crate::agents::config::ProviderConfig;
use crate::agents::domain::{ChatMessage, Role};
use crate::agents::error::{LlmError, LlmResult};
use crate::agents::tools::{extract_tool_calls, ProviderFormat};

const DEFAULT_REGION: &str = "us-east-1";
const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

/// Request/response dialect spoken by a Bedrock model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    ClaudeMessages,
    ClaudeText,
    Titan,
}

impl ModelFamily {
    pub fn for_model(model_id: &str) -> Self {
        if model_id.contains("titan") {
            Self::Titan
        } else if model_id.contains("claude-v2") || model_id.contains("claude-instant") {
            Self::ClaudeText
        } else {
            Self::ClaudeMessages
        }
    }
}

/// Amazon Bedrock LLM Provider
pub struct BedrockProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl BedrockProvider {
    pub fn new(config: &ProviderConfig) -> LlmResult<Self> {
        let api_key = resolve_api_key(config, "AWS_BEARER_TOKEN_BEDROCK")?;
        let region = config.region.as_deref().unwrap_or(DEFAULT_REGION);
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| format!("https://bedrock-runtime.{}.amazonaws.com", region));

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.model_or_default(),
        })
    }

    pub(crate) fn build_request_body(request: &CompletionRequest, model_id: &str) -> Value {
        match ModelFamily::for_model(model_id) {
            ModelFamily::ClaudeMessages => claude_messages_body(request),
            ModelFamily::ClaudeText => claude_text_body(request),
            ModelFamily::Titan => titan_body(request),
        }
    }

    pub(crate) fn parse_response(raw: &Value, model_id: &str) -> LlmResult<CompletionResponse> {
        match ModelFamily::for_model(model_id) {
            ModelFamily::ClaudeMessages => {
                let blocks = raw
                    .get("content")
                    .and_then(Value::as_array)
                    .ok_or_else(|| LlmError::Parse("Missing content in response".to_string()))?;
                let text: String = blocks
                    .iter()
                    .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|b| b.get("text").and_then(Value::as_str))
                    .collect();
                let tool_calls = extract_tool_calls(raw, ProviderFormat::Bedrock);

                let finish_reason = match raw.get("stop_reason").and_then(Value::as_str) {
                    _ if !tool_calls.is_empty() => FinishReason::ToolCalls,
                    Some("max_tokens") => FinishReason::Length,
                    _ => FinishReason::Stop,
                };
                let usage = raw.get("usage").map(|u| {
                    let input = u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0) as u32;
                    let output = u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0) as u32;
                    TokenUsage {
                        prompt_tokens: input,
                        completion_tokens: output,
                        total_tokens: input + output,
                    }
                });

                Ok(CompletionResponse {
                    message: ChatMessage::assistant_with_tools(text, tool_calls),
                    finish_reason,
                    usage,
                })
            }
            ModelFamily::ClaudeText => {
                let text = raw
                    .get("completion")
                    .and_then(Value::as_str)
                    .ok_or_else(|| LlmError::Parse("Missing completion in response".to_string()))?;
                Ok(CompletionResponse {
                    message: ChatMessage::assistant(text.trim()),
                    finish_reason: FinishReason::Stop,
                    usage: None,
                })
            }
            ModelFamily::Titan => {
                let text = raw
                    .pointer("/results/0/outputText")
                    .or_else(|| raw.get("outputText"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| LlmError::Parse("Missing outputText in response".to_string()))?;
                Ok(CompletionResponse {
                    message: ChatMessage::assistant(text.trim()),
                    finish_reason: FinishReason::Stop,
                    usage: None,
                })
            }
        }
    }

    fn post(&self, model_id: &str, action: &str, body: &Value) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/model/{}/{}", self.base_url, model_id, action))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(body)
    }

    async fn stream_completion(
        request: reqwest::RequestBuilder,
        family: ModelFamily,
        sender: LlmStreamSender,
    ) -> LlmResult<()> {
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let mut stream = response.bytes_stream();
        let mut decoder = EventStreamDecoder::default();
        let mut state = ChunkState::default();

        while let Some(chunk_result) = stream.next().await {
            let bytes = chunk_result.map_err(|e| LlmError::Streaming(e.to_string()))?;
            decoder.push(&bytes);

            while let Some(frame) = decoder.next_frame()? {
                if frame.message_type.as_deref() == Some("exception") {
                    return Err(LlmError::Streaming(String::from_utf8_lossy(&frame.payload).into_owned()));
                }
                let Some(event) = decode_payload(&frame.payload) else {
                    continue;
                };
                if let Some(chunk) = state.chunk_from_event(family, &event) {
                    if sender.send(chunk).await.is_err() {
                        // Receiver dropped
                        return Ok(());
                    }
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl LlmProvider for BedrockProvider {
    fn name(&self) -> &str {
        "bedrock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn supports_tools(&self) -> bool {
        ModelFamily::for_model(&self.model) == ModelFamily::ClaudeMessages
    }

    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse> {
        let model_id = request.model.clone().unwrap_or_else(|| self.model.clone());
        let body = Self::build_request_body(&request, &model_id);
        let response = self.post(&model_id, "invoke", &body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(format!("Failed to parse response: {}", e)))?;

        Self::parse_response(&raw, &model_id)
    }

    fn complete_stream(&self, request: CompletionRequest) -> LlmStream {
        let (sender, stream) = LlmStream::channel(64);
        let model_id = request.model.clone().unwrap_or_else(|| self.model.clone());
        let family = ModelFamily::for_model(&model_id);
        let http = self.post(
            &model_id,
            "invoke-with-response-stream",
            &Self::build_request_body(&request, &model_id),
        );

        tokio::spawn(async move {
            if let Err(e) = Self::stream_completion(http, family, sender.clone()).await {
                let _ = sender.send_error(e).await;
            }
        });

        stream
    }
}

fn claude_messages_body(request: &CompletionRequest) -> Value {
    let mut system = Vec::new();
    let mut messages: Vec<Value> = Vec::new();

    for m in &request.messages {
        match m.role {
            Role::System => system.push(m.content.clone()),
            Role::User => messages.push(json!({
                "role": "user",
                "content": [{ "type": "text", "text": m.content }]
            })),
            Role::Assistant => {
                let mut content = Vec::new();
                if !m.content.is_empty() {
                    content.push(json!({ "type": "text", "text": m.content }));
                }
                for tc in m.tool_calls.iter().flatten() {
                    content.push(json!({
                        "type": "tool_use",
                        "id": tc.id,
                        "name": tc.name,
                        "input": tc.arguments
                    }));
                }
                messages.push(json!({ "role": "assistant", "content": content }));
            }
            Role::Tool => {
                let block = json!({
                    "type": "tool_result",
                    "tool_use_id": m.tool_call_id.clone().unwrap_or_default(),
                    "content": m.content
                });
                // Consecutive tool results share one user turn
                match messages.last_mut() {
                    Some(last)
                        if last["role"] == "user"
                            && last["content"][0]["type"] == "tool_result" =>
                    {
                        if let Some(blocks) = last["content"].as_array_mut() {
                            blocks.push(block);
                        }
                    }
                    _ => messages.push(json!({ "role": "user", "content": [block] })),
                }
            }
        }
    }

    let mut body = json!({
        "anthropic_version": ANTHROPIC_VERSION,
        "max_tokens": request.max_tokens.unwrap_or(2000),
        "messages": messages,
    });
    if !system.is_empty() {
        body["system"] = json!(system.join("\n\n"));
    }
    if let Some(temp) = request.temperature {
        body["temperature"] = json!(temp);
    }
    if let Some(top_p) = request.top_p {
        body["top_p"] = json!(top_p);
    }
    if let Some(stop) = &request.stop {
        body["stop_sequences"] = json!(stop);
    }
    if let Some(tools) = request.tools.as_ref().filter(|t| !t.is_empty()) {
        body["tools"] = json!(tools
            .iter()
            .map(|t| json!({
                "name": t.name,
                "description": t.description,
                "input_schema": t.parameters
            }))
            .collect::<Vec<_>>());
    }

    body
}

/// Flatten the conversation into the `Human:`/`Assistant:` transcript format
fn transcript(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for m in messages {
        match m.role {
            Role::System => prompt.push_str(&m.content),
            Role::User | Role::Tool => {
                prompt.push_str("\n\nHuman: ");
                prompt.push_str(&m.content);
            }
            Role::Assistant => {
                prompt.push_str("\n\nAssistant: ");
                prompt.push_str(&m.content);
            }
        }
    }
    prompt.push_str("\n\nAssistant:");
    prompt
}

fn claude_text_body(request: &CompletionRequest) -> Value {
    let mut body = json!({
        "prompt": transcript(&request.messages),
        "max_tokens_to_sample": request.max_tokens.unwrap_or(2000),
    });
    if let Some(temp) = request.temperature {
        body["temperature"] = json!(temp);
    }
    if let Some(top_p) = request.top_p {
        body["top_p"] = json!(top_p);
    }
    if let Some(stop) = &request.stop {
        body["stop_sequences"] = json!(stop);
    }
    body
}

fn titan_body(request: &CompletionRequest) -> Value {
    let mut config = json!({ "maxTokenCount": request.max_tokens.unwrap_or(2000) });
    if let Some(temp) = request.temperature {
        config["temperature"] = json!(temp);
    }
    if let Some(top_p) = request.top_p {
        config["topP"] = json!(top_p);
    }
    if let Some(stop) = &request.stop {
        config["stopSequences"] = json!(stop);
    }
    json!({
        "inputText": transcript(&request.messages),
        "textGenerationConfig": config,
    })
}

/// Unwrap `{"bytes": base64}` into the model's JSON chunk
fn decode_payload(payload: &[u8]) -> Option<Value> {
    let envelope: Value = serde_json::from_slice(payload).ok()?;
    let encoded = envelope.get("bytes")?.as_str()?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    serde_json::from_slice(&decoded).ok()
}

/// Tool-call bookkeeping across Claude streaming events
#[derive(Debug, Default)]
struct ChunkState {
    tool_index: Option<usize>,
    next_tool_index: usize,
}

impl ChunkState {
    fn chunk_from_event(&mut self, family: ModelFamily, event: &Value) -> Option<StreamChunk> {
        match family {
            ModelFamily::ClaudeText => event
                .get("completion")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(StreamChunk::text),
            ModelFamily::Titan => event
                .get("outputText")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(StreamChunk::text),
            ModelFamily::ClaudeMessages => self.claude_event(event),
        }
    }

    fn claude_event(&mut self, event: &Value) -> Option<StreamChunk> {
        match event.get("type").and_then(Value::as_str)? {
            "content_block_start" => {
                let block = event.get("content_block")?;
                if block.get("type").and_then(Value::as_str) != Some("tool_use") {
                    self.tool_index = None;
                    return None;
                }
                let index = self.next_tool_index;
                self.next_tool_index += 1;
                self.tool_index = Some(index);

                let mut delta = ToolCallDelta::new(index);
                delta.id = block.get("id").and_then(Value::as_str).map(str::to_string);
                delta.name = block.get("name").and_then(Value::as_str).map(str::to_string);
                Some(StreamChunk::tool_call(delta))
            }
            "content_block_delta" => {
                let delta = event.get("delta")?;
                match delta.get("type").and_then(Value::as_str)? {
                    "text_delta" => delta.get("text").and_then(Value::as_str).map(StreamChunk::text),
                    "input_json_delta" => {
                        let index = self.tool_index?;
                        let partial = delta.get("partial_json").and_then(Value::as_str)?;
                        Some(StreamChunk::tool_call(
                            ToolCallDelta::new(index).with_arguments(partial),
                        ))
                    }
                    _ => None,
                }
            }
            "message_delta" => {
                let reason = event.pointer("/delta/stop_reason").and_then(Value::as_str)?;
                Some(StreamChunk::finish(
                    match reason {
                        "tool_use" => FinishReason::ToolCalls,
                        "max_tokens" => FinishReason::Length,
                        _ => FinishReason::Stop,
                    },
                    None,
                ))
            }
            _ => None,
        }
    }
}

/// One decoded event-stream message
#[derive(Debug)]
struct Frame {
    message_type: Option<String>,
    payload: Vec<u8>,
}

/// Incremental decoder for `application/vnd.amazon.eventstream`.
///
/// Frame layout: total length (u32), headers length (u32), prelude CRC,
/// headers, payload, message CRC. CRCs are not verified; TLS already
/// covers transport integrity.
#[derive(Debug, Default)]
struct EventStreamDecoder {
    buffer: BytesMut,
}

const PRELUDE_LEN: usize = 12;
const CRC_LEN: usize = 4;

impl EventStreamDecoder {
    fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    fn next_frame(&mut self) -> LlmResult<Option<Frame>> {
        if self.buffer.len() < PRELUDE_LEN {
            return Ok(None);
        }

        let mut prelude = &self.buffer[..PRELUDE_LEN];
        let total_len = prelude.get_u32() as usize;
        let headers_len = prelude.get_u32() as usize;

        if total_len < PRELUDE_LEN + headers_len + CRC_LEN {
            return Err(LlmError::Streaming(format!("Invalid event-stream frame length {}", total_len)));
        }
        if self.buffer.len() < total_len {
            return Ok(None);
        }

        let mut frame = self.buffer.split_to(total_len);
        frame.advance(PRELUDE_LEN);
        let headers = frame.split_to(headers_len);
        let payload_len = frame.len() - CRC_LEN;
        let payload = frame.split_to(payload_len).to_vec();

        Ok(Some(Frame {
            message_type: parse_headers(&headers)?
                .into_iter()
                .find(|(name, _)| name == ":message-type")
                .map(|(_, value)| value),
            payload,
        }))
    }
}

/// Read string-valued headers, skipping other value types
fn parse_headers(mut raw: &[u8]) -> LlmResult<Vec<(String, String)>> {
    let truncated = || LlmError::Streaming("Truncated event-stream headers".to_string());
    let mut headers = Vec::new();

    while raw.has_remaining() {
        let name_len = raw.get_u8() as usize;
        if raw.remaining() < name_len + 1 {
            return Err(truncated());
        }
        let name = String::from_utf8_lossy(&raw[..name_len]).into_owned();
        raw.advance(name_len);

        let value_len = match raw.get_u8() {
            0 | 1 => 0,
            2 => 1,
            3 => 2,
            4 => 4,
            5 | 8 => 8,
            9 => 16,
            6 | 7 => {
                if raw.remaining() < 2 {
                    return Err(truncated());
                }
                raw.get_u16() as usize
            }
            other => {
                return Err(LlmError::Streaming(format!("Unknown event-stream header type {}", other)))
            }
        };
        if raw.remaining() < value_len {
            return Err(truncated());
        }
        headers.push((name, String::from_utf8_lossy(&raw[..value_len]).into_owned()));
        raw.advance(value_len);
    }

    Ok(headers)
}
