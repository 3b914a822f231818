//! Google Gemini LLM Provider with streaming support

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
use crate::agents::domain::{ChatMessage, Role, ToolCall};
use crate::agents::error::{LlmError, LlmResult};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini LLM Provider
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiProvider {
    pub fn new(config: &ProviderConfig) -> LlmResult<Self> {
        let api_key = resolve_api_key(config, "GEMINI_API_KEY")?;
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

    fn build_request_body(request: &CompletionRequest) -> Value {
        let (system, contents) = convert_messages(&request.messages);
        let mut body = json!({ "contents": contents });

        if let Some(system) = system {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }

        let mut generation_config = serde_json::Map::new();
        if let Some(temp) = request.temperature {
            generation_config.insert("temperature".into(), json!(temp));
        }
        if let Some(max_tokens) = request.max_tokens {
            generation_config.insert("maxOutputTokens".into(), json!(max_tokens));
        }
        if let Some(top_p) = request.top_p {
            generation_config.insert("topP".into(), json!(top_p));
        }
        if let Some(stop) = &request.stop {
            generation_config.insert("stopSequences".into(), json!(stop));
        }
        if !generation_config.is_empty() {
            body["generationConfig"] = Value::Object(generation_config);
        }

        if let Some(tools) = request.tools.as_ref().filter(|t| !t.is_empty()) {
            body["tools"] = json!([{
                "function_declarations": tools.iter().map(|t| json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters
                })).collect::<Vec<_>>()
            }]);

            if let Some(choice) = &request.tool_choice {
                let config = match choice {
                    ToolChoice::Auto => json!({ "mode": "AUTO" }),
                    ToolChoice::None => json!({ "mode": "NONE" }),
                    ToolChoice::Required => json!({ "mode": "ANY" }),
                    ToolChoice::Tool { name } => json!({
                        "mode": "ANY",
                        "allowed_function_names": [name]
                    }),
                };
                body["tool_config"] = json!({ "function_calling_config": config });
            }
        }

        body
    }

    /// Collect text, function calls, finish reason and usage from one response
    fn parse_candidate(response: GeminiResponse, first_index: usize) -> StreamChunk {
        let mut chunk = StreamChunk {
            usage: response.usage_metadata.map(Into::into),
            ..Default::default()
        };

        let Some(candidate) = response.candidates.and_then(|c| c.into_iter().next()) else {
            return chunk;
        };

        let parts = candidate.content.and_then(|c| c.parts).unwrap_or_default();
        for part in parts {
            if let Some(text) = part.text {
                chunk.content.push_str(&text);
            }
            if let Some(fc) = part.function_call {
                let index = first_index + chunk.tool_calls.len();
                chunk.tool_calls.push(
                    ToolCallDelta::new(index)
                        .with_id(format!("call_{}", index))
                        .with_name(fc.name)
                        .with_arguments(fc.args.unwrap_or_else(|| json!({})).to_string()),
                );
            }
        }

        chunk.finish_reason = candidate.finish_reason.as_deref().map(|reason| match reason {
            "MAX_TOKENS" => FinishReason::Length,
            "SAFETY" | "RECITATION" => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        });

        chunk
    }

    fn parse_response(response: GeminiResponse) -> LlmResult<CompletionResponse> {
        if response.candidates.as_ref().map_or(true, Vec::is_empty) {
            return Err(LlmError::Parse("No candidates in response".to_string()));
        }

        let chunk = Self::parse_candidate(response, 0);
        let tool_calls: Vec<ToolCall> = chunk
            .tool_calls
            .into_iter()
            .map(|d| {
                ToolCall::new(
                    d.id.unwrap_or_default(),
                    d.name.unwrap_or_default(),
                    ToolCall::parse_arguments(d.arguments.as_deref().unwrap_or("{}")),
                )
            })
            .collect();

        let finish_reason = if tool_calls.is_empty() {
            chunk.finish_reason.unwrap_or(FinishReason::Stop)
        } else {
            FinishReason::ToolCalls
        };

        Ok(CompletionResponse {
            message: ChatMessage::assistant_with_tools(chunk.content, tool_calls),
            finish_reason,
            usage: chunk.usage,
        })
    }

    fn post(&self, url: String, body: &Value) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(body)
    }

    async fn stream_completion(request: reqwest::RequestBuilder, sender: LlmStreamSender) -> LlmResult<()> {
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        Self::forward_events(response.bytes_stream(), sender).await
    }

    async fn forward_events<S, B, E>(mut body: S, sender: LlmStreamSender) -> LlmResult<()>
    where
        S: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: Display,
    {
        let mut lines = LineBuffer::new();
        let mut tool_call_index = 0usize;

        while let Some(chunk_result) = body.next().await {
            let bytes = chunk_result.map_err(|e| LlmError::Streaming(e.to_string()))?;
            lines.push(bytes.as_ref());

            while let Some(line) = lines.next_line() {
                let Some(data) = line.trim().strip_prefix("data:").map(str::trim) else {
                    continue;
                };
                let Ok(parsed) = serde_json::from_str::<GeminiResponse>(data) else {
                    continue;
                };

                let chunk = Self::parse_candidate(parsed, tool_call_index);
                tool_call_index += chunk.tool_calls.len();

                if chunk.has_content()
                    || !chunk.tool_calls.is_empty()
                    || chunk.is_final()
                    || chunk.usage.is_some()
                {
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
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse> {
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let response = self.post(url, &Self::build_request_body(&request)).send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let parsed: GeminiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(format!("Failed to parse response: {}", e)))?;

        Self::parse_response(parsed)
    }

    fn complete_stream(&self, request: CompletionRequest) -> LlmStream {
        let (sender, stream) = LlmStream::channel(64);
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        let url = format!("{}/models/{}:streamGenerateContent?alt=sse", self.base_url, model);
        let http = self.post(url, &Self::build_request_body(&request));

        tokio::spawn(async move {
            if let Err(e) = Self::stream_completion(http, sender.clone()).await {
                let _ = sender.send_error(e).await;
            }
        });

        stream
    }
}

/// Split out the system instruction and convert the rest to Gemini contents
fn convert_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<Value>) {
    let mut system: Option<String> = None;
    let mut contents = Vec::new();

    for m in messages {
        match m.role {
            Role::System => {
                system = Some(match system.take() {
                    Some(existing) => format!("{}\n\n{}", existing, m.content),
                    None => m.content.clone(),
                });
            }
            Role::User => contents.push(json!({
                "role": "user",
                "parts": [{ "text": m.content }]
            })),
            Role::Assistant => {
                let mut parts = Vec::new();
                if !m.content.is_empty() {
                    parts.push(json!({ "text": m.content }));
                }
                for tc in m.tool_calls.iter().flatten() {
                    parts.push(json!({
                        "functionCall": { "name": tc.name, "args": tc.arguments }
                    }));
                }
                if !parts.is_empty() {
                    contents.push(json!({ "role": "model", "parts": parts }));
                }
            }
            Role::Tool => {
                let name = m.name.clone().unwrap_or_else(|| "tool".to_string());
                let response = serde_json::from_str::<Value>(&m.content)
                    .ok()
                    .filter(Value::is_object)
                    .unwrap_or_else(|| json!({ "result": m.content }));
                contents.push(json!({
                    "role": "user",
                    "parts": [{ "functionResponse": { "name": name, "response": response } }]
                }));
            }
        }
    }

    (system, contents)
}

// Gemini API response types; streamed events share the same shape

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    text: Option<String>,
    function_call: Option<GeminiFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    args: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
    total_token_count: Option<u32>,
}

impl From<GeminiUsageMetadata> for TokenUsage {
    fn from(u: GeminiUsageMetadata) -> Self {
        Self {
            prompt_tokens: u.prompt_token_count.unwrap_or(0),
            completion_tokens: u.candidates_token_count.unwrap_or(0),
            total_tokens: u.total_token_count.unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_decodes_character_split_across_chunks() {
        let body = futures::stream::iter(vec![
            Ok::<_, std::io::Error>(b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"caf\xC3".to_vec()),
            Ok(b"\xA9\"}]}}]}\r\n\r\n".to_vec()),
        ]);
        let (sender, stream) = LlmStream::channel(8);
        GeminiProvider::forward_events(body, sender).await.unwrap();

        let response = stream.collect().await.unwrap();
        assert_eq!(response.message.content, "café");
    }

    #[test]
    fn test_system_prompt_becomes_instruction() {
        let request = CompletionRequest::new(vec![
            ChatMessage::system("Be brief."),
            ChatMessage::user("hi"),
        ]);
        let body = GeminiProvider::build_request_body(&request);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
        assert_eq!(body["contents"][0]["role"], "user");
    }

    #[test]
    fn test_parse_function_call_response() {
        let raw = json!({
            "candidates": [{
                "content": {"parts": [{"functionCall": {"name": "search", "args": {"q": "rust"}}}]},
                "finishReason": "STOP"
            }]
        });
        let response = GeminiProvider::parse_response(serde_json::from_value(raw).unwrap()).unwrap();
        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
        let calls = response.message.tool_calls.unwrap();
        assert_eq!(calls[0].id, "call_0");
        assert_eq!(calls[0].arguments, json!({"q": "rust"}));

        let empty = serde_json::from_value(json!({"candidates": []})).unwrap();
        assert!(GeminiProvider::parse_response(empty).is_err());
    }
}
