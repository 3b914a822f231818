//! Ollama LLM Provider with streaming support (for local models)

use std::fmt::Display;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};

use super::{
    CompletionRequest, CompletionResponse, FinishReason, LineBuffer, LlmProvider, LlmStream, LlmStreamSender,
    StreamChunk, TokenUsage, ToolCallDelta,
};
use crate::agents::config::ProviderConfig;
use crate::agents::domain::{ChatMessage, ToolCall};
use crate::agents::error::{LlmError, LlmResult};
use crate::agents::tools::{extract_tool_calls, ProviderFormat};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Ollama LLM Provider (for local models)
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(config: &ProviderConfig) -> LlmResult<Self> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.model_or_default(),
        })
    }

    fn build_request_body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let mut options = serde_json::Map::new();
        if let Some(temp) = request.temperature {
            options.insert("temperature".into(), json!(temp));
        }
        if let Some(max_tokens) = request.max_tokens {
            options.insert("num_predict".into(), json!(max_tokens));
        }
        if let Some(top_p) = request.top_p {
            options.insert("top_p".into(), json!(top_p));
        }
        if let Some(stop) = &request.stop {
            options.insert("stop".into(), json!(stop));
        }

        let mut body = json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "messages": convert_messages(&request.messages),
            "stream": stream,
            "options": options,
        });

        if let Some(tools) = request.tools.as_ref().filter(|t| !t.is_empty()) {
            body["tools"] = json!(tools
                .iter()
                .map(|t| json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters
                    }
                }))
                .collect::<Vec<_>>());
        }

        body
    }

    /// Tool calls in an Ollama message carry no id; one is generated per call
    fn tool_calls(line: &Value) -> Vec<ToolCall> {
        extract_tool_calls(line, ProviderFormat::Ollama)
            .into_iter()
            .map(|mut call| {
                if call.id.is_empty() {
                    call.id = ToolCall::generate_id();
                }
                call
            })
            .collect()
    }

    fn usage(line: &Value) -> Option<TokenUsage> {
        let prompt = line.get("prompt_eval_count").and_then(Value::as_u64)? as u32;
        let completion = line.get("eval_count").and_then(Value::as_u64).unwrap_or(0) as u32;
        Some(TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        })
    }

    fn parse_response(raw: &Value) -> CompletionResponse {
        let content = raw
            .pointer("/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let tool_calls = Self::tool_calls(raw);

        let finish_reason = if !tool_calls.is_empty() {
            FinishReason::ToolCalls
        } else if raw.get("done_reason").and_then(Value::as_str) == Some("length") {
            FinishReason::Length
        } else {
            FinishReason::Stop
        };

        CompletionResponse {
            message: ChatMessage::assistant_with_tools(content, tool_calls),
            finish_reason,
            usage: Self::usage(raw),
        }
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

            // NDJSON: one object per line
            while let Some(line) = lines.next_line() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let Ok(event) = serde_json::from_str::<Value>(line) else {
                    continue;
                };
                if let Some(error) = event.get("error").and_then(Value::as_str) {
                    return Err(LlmError::Streaming(error.to_string()));
                }

                let mut chunk = StreamChunk::text(
                    event
                        .pointer("/message/content")
                        .and_then(Value::as_str)
                        .unwrap_or_default(),
                );
                for call in Self::tool_calls(&event) {
                    chunk.tool_calls.push(
                        ToolCallDelta::new(tool_call_index)
                            .with_id(call.id)
                            .with_name(call.name)
                            .with_arguments(call.arguments.to_string()),
                    );
                    tool_call_index += 1;
                }
                if event.get("done").and_then(Value::as_bool) == Some(true) {
                    chunk.finish_reason = Some(if tool_call_index > 0 {
                        FinishReason::ToolCalls
                    } else {
                        FinishReason::Stop
                    });
                    chunk.usage = Self::usage(&event);
                }

                if (chunk.has_content() || !chunk.tool_calls.is_empty() || chunk.is_final())
                    && sender.send(chunk).await.is_err()
                {
                    return Ok(());
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse> {
        let body = self.build_request_body(&request, false);

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await?;

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

        Ok(Self::parse_response(&raw))
    }

    fn complete_stream(&self, request: CompletionRequest) -> LlmStream {
        let (sender, stream) = LlmStream::channel(64);
        let http = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&self.build_request_body(&request, true));

        tokio::spawn(async move {
            if let Err(e) = Self::stream_completion(http, sender.clone()).await {
                let _ = sender.send_error(e).await;
            }
        });

        stream
    }
}

fn convert_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let mut msg = json!({
                "role": m.role.as_str(),
                "content": m.content
            });
            if let Some(tool_calls) = &m.tool_calls {
                msg["tool_calls"] = json!(tool_calls
                    .iter()
                    .map(|tc| json!({
                        "function": { "name": tc.name, "arguments": tc.arguments }
                    }))
                    .collect::<Vec<_>>());
            }
            msg
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_decodes_character_split_across_chunks() {
        let body = futures::stream::iter(vec![
            Ok::<_, std::io::Error>(b"{\"message\":{\"content\":\"caf\xC3".to_vec()),
            Ok(b"\xA9\"},\"done\":false}\n{\"message\":{\"content\":\"\"},\"done\":true}\n".to_vec()),
        ]);
        let (sender, stream) = LlmStream::channel(8);
        OllamaProvider::forward_events(body, sender).await.unwrap();

        let response = stream.collect().await.unwrap();
        assert_eq!(response.message.content, "café");
        assert_eq!(response.finish_reason, FinishReason::Stop);
    }

    #[test]
    fn test_parse_tool_call_response() {
        let raw = json!({
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [{"function": {"name": "weather", "arguments": {"city": "Oslo"}}}]
            },
            "done": true,
            "prompt_eval_count": 10,
            "eval_count": 4
        });
        let response = OllamaProvider::parse_response(&raw);
        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
        let calls = response.message.tool_calls.unwrap();
        assert_eq!(calls[0].name, "weather");
        assert!(!calls[0].id.is_empty());
        assert_eq!(response.usage.unwrap().total_tokens, 14);
    }

    #[test]
    fn test_request_body_options() {
        let provider = OllamaProvider::new(&ProviderConfig::new(crate::agents::config::ProviderKind::Ollama)).unwrap();
        let mut request = CompletionRequest::new(vec![ChatMessage::user("hi")]);
        request.temperature = Some(0.5);
        request.max_tokens = Some(100);

        let body = provider.build_request_body(&request, true);
        assert_eq!(body["model"], "llama3.1:latest");
        assert_eq!(body["options"]["num_predict"], 100);
        assert_eq!(body["stream"], true);
        assert!(body.get("tools").is_none());
    }
}
