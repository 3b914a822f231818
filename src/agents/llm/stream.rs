//! Streaming types for LLM responses

use bytes::BytesMut;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use super::{CompletionResponse, FinishReason, TokenUsage};
use crate::agents::domain::{ChatMessage, ToolCall};
use crate::agents::error::LlmError;

/// A chunk of streamed LLM response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Text delta
    #[serde(default)]
    pub content: String,
    /// Partial tool calls, keyed by index
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl StreamChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn tool_call(delta: ToolCallDelta) -> Self {
        Self {
            tool_calls: vec![delta],
            ..Default::default()
        }
    }

    pub fn finish(reason: FinishReason, usage: Option<TokenUsage>) -> Self {
        Self {
            finish_reason: Some(reason),
            usage,
            ..Default::default()
        }
    }

    pub fn has_content(&self) -> bool {
        !self.content.is_empty()
    }

    pub fn is_final(&self) -> bool {
        self.finish_reason.is_some()
    }
}

/// Delta update for a tool call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Index of the tool call being updated
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Argument JSON fragment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

impl ToolCallDelta {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_arguments(mut self, args: impl Into<String>) -> Self {
        self.arguments = Some(args.into());
        self
    }
}

/// Accumulator for building tool calls from streaming deltas.
///
/// Fragments are concatenated per index. Calls without a name are dropped;
/// calls without an id get a generated one. Arguments that do not parse to
/// a JSON object become `{}`.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    partials: BTreeMap<usize, PartialToolCall>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_delta(&mut self, delta: &ToolCallDelta) {
        let partial = self.partials.entry(delta.index).or_default();
        if let Some(id) = &delta.id {
            partial.id.push_str(id);
        }
        if let Some(name) = &delta.name {
            partial.name.push_str(name);
        }
        if let Some(args) = &delta.arguments {
            partial.arguments.push_str(args);
        }
    }

    /// Finished calls in index order
    pub fn build(self) -> Vec<ToolCall> {
        self.partials
            .into_values()
            .filter(|p| !p.name.is_empty())
            .map(|p| {
                let id = if p.id.is_empty() { ToolCall::generate_id() } else { p.id };
                ToolCall::new(id, p.name, ToolCall::parse_arguments(&p.arguments))
            })
            .collect()
    }
}

/// Reassembles newline-delimited text from raw network chunks.
///
/// Bytes are held until a full line is buffered, so a multi-byte character
/// split across two chunks decodes intact. Trailing `\r` is removed.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: BytesMut,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Pop the next complete line, if one is buffered
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buffer.iter().position(|b| *b == b'\n')?;
        let line = self.buffer.split_to(pos + 1);
        Some(decode_line(&line[..pos]))
    }

    /// Whatever follows the last newline
    pub fn finish(self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(decode_line(&self.buffer))
        }
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Streaming response from an LLM provider.
///
/// Dropping the stream closes the channel; producers stop on their next send.
pub struct LlmStream {
    receiver: mpsc::Receiver<Result<StreamChunk, LlmError>>,
}

impl LlmStream {
    pub fn new(receiver: mpsc::Receiver<Result<StreamChunk, LlmError>>) -> Self {
        Self { receiver }
    }

    /// Create a channel pair for building an LLM stream
    pub fn channel(buffer: usize) -> (LlmStreamSender, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (LlmStreamSender { sender: tx }, Self { receiver: rx })
    }

    /// A stream that yields a single error
    pub fn failed(error: LlmError) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.try_send(Err(error));
        Self { receiver: rx }
    }

    /// Receive the next chunk
    pub async fn next_chunk(&mut self) -> Option<Result<StreamChunk, LlmError>> {
        self.receiver.recv().await
    }

    /// Drain the stream into a complete response
    pub async fn collect(mut self) -> Result<CompletionResponse, LlmError> {
        let mut content = String::new();
        let mut accumulator = ToolCallAccumulator::new();
        let mut finish_reason = None;
        let mut usage = None;

        while let Some(result) = self.receiver.recv().await {
            let chunk = result?;
            content.push_str(&chunk.content);
            for delta in &chunk.tool_calls {
                accumulator.apply_delta(delta);
            }
            if chunk.finish_reason.is_some() {
                finish_reason = chunk.finish_reason;
            }
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
        }

        let tool_calls = accumulator.build();
        let finish_reason = match finish_reason {
            Some(reason) => reason,
            None if !tool_calls.is_empty() => FinishReason::ToolCalls,
            None => FinishReason::Stop,
        };

        Ok(CompletionResponse {
            message: ChatMessage::assistant_with_tools(content, tool_calls),
            finish_reason,
            usage,
        })
    }
}

impl Stream for LlmStream {
    type Item = Result<StreamChunk, LlmError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_recv(cx)
    }
}

type SendResult = Result<(), mpsc::error::SendError<Result<StreamChunk, LlmError>>>;

/// Sender half for building an LLM stream
#[derive(Clone)]
pub struct LlmStreamSender {
    sender: mpsc::Sender<Result<StreamChunk, LlmError>>,
}

impl LlmStreamSender {
    pub async fn send(&self, chunk: StreamChunk) -> SendResult {
        self.sender.send(Ok(chunk)).await
    }

    pub async fn send_error(&self, error: LlmError) -> SendResult {
        self.sender.send(Err(error)).await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> SendResult {
        self.send(StreamChunk::text(text)).await
    }

    pub async fn send_finish(&self, reason: FinishReason, usage: Option<TokenUsage>) -> SendResult {
        self.send(StreamChunk::finish(reason, usage)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accumulator_joins_fragments() {
        let mut acc = ToolCallAccumulator::new();
        acc.apply_delta(&ToolCallDelta::new(0).with_id("call_1").with_name("echo"));
        acc.apply_delta(&ToolCallDelta::new(0).with_arguments("{\"text\":"));
        acc.apply_delta(&ToolCallDelta::new(0).with_arguments("\"hi\"}"));
        acc.apply_delta(&ToolCallDelta::new(1).with_name("clock").with_arguments("not json"));

        let calls = acc.build();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].arguments, json!({"text": "hi"}));
        assert_eq!(calls[1].name, "clock");
        assert!(calls[1].id.starts_with("call_"));
        assert_eq!(calls[1].arguments, json!({}));
    }

    #[test]
    fn test_accumulator_tolerates_sparse_indices() {
        let mut acc = ToolCallAccumulator::new();
        acc.apply_delta(&ToolCallDelta::new(usize::MAX).with_name("late"));
        acc.apply_delta(&ToolCallDelta::new(3).with_name("early").with_arguments("{}"));

        let calls = acc.build();
        let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["early", "late"]);
    }

    #[test]
    fn test_line_buffer_keeps_split_characters() {
        let mut lines = LineBuffer::new();
        lines.push(b"data: caf\xC3");
        assert_eq!(lines.next_line(), None);

        lines.push(b"\xA9\r\ndata: ol");
        assert_eq!(lines.next_line().as_deref(), Some("data: café"));
        assert_eq!(lines.next_line(), None);
        assert_eq!(lines.finish().as_deref(), Some("data: ol"));
    }

    #[tokio::test]
    async fn test_collect_builds_response() {
        let (tx, stream) = LlmStream::channel(8);
        tokio::spawn(async move {
            let _ = tx.send_text("Hello, ").await;
            let _ = tx.send_text("world").await;
            let _ = tx.send_finish(FinishReason::Stop, None).await;
        });

        let response = stream.collect().await.unwrap();
        assert_eq!(response.message.content, "Hello, world");
        assert!(!response.message.has_tool_calls());
        assert_eq!(response.finish_reason, FinishReason::Stop);
    }

    #[tokio::test]
    async fn test_failed_stream_propagates_error() {
        let result = LlmStream::failed(LlmError::Network("down".into())).collect().await;
        assert!(matches!(result, Err(LlmError::Network(_))));
    }
}
