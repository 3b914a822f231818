//! Agent served by a remote HTTP endpoint

use std::env;
use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{Agent, SystemPrompt};
use crate::agents::config::{AgentConfig, RemoteConfig};
use crate::agents::domain::{MessageContext, TextStream, TextStreamSender};
use crate::agents::error::{backend_error, AgentError, AgentResult, LlmError, LlmResult};
use crate::agents::llm::LineBuffer;

const LABEL: &str = "RemoteAgent";

/// One parsed line of the `/chat/stream` event stream
#[derive(Debug, PartialEq)]
enum SseLine<'a> {
    Data(&'a str),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> SseLine<'_> {
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.strip_prefix(' ').unwrap_or(data);
    match data {
        "" => SseLine::Skip,
        "done" | "[DONE]" => SseLine::Done,
        content => SseLine::Data(content),
    }
}

/// Forwards messages to `POST {base_url}/chat` and `/chat/stream`.
///
/// The remote side owns prompts and history; the local system prompt is
/// kept only so the agent can be described and listed like any other.
pub struct RemoteAgent {
    config: AgentConfig,
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
    system_prompt: SystemPrompt,
}

impl RemoteAgent {
    pub fn new(config: AgentConfig, remote: &RemoteConfig) -> AgentResult<Self> {
        let base_url = remote.base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(AgentError::Configuration(
                "RemoteAgent base URL is required".to_string(),
            ));
        }

        let auth_token = match &remote.auth_token_env {
            Some(var) => Some(env::var(var).map_err(|_| {
                AgentError::Configuration(format!("Environment variable {} not set", var))
            })?),
            None => None,
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(remote.timeout_seconds))
            .danger_accept_invalid_certs(!remote.verify_ssl)
            .build()
            .map_err(|e| AgentError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        let system_prompt = SystemPrompt::new(config.system_prompt.clone());
        Ok(Self {
            config,
            client,
            base_url,
            auth_token,
            system_prompt,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post(&self, path: &str, body: &Value) -> reqwest::RequestBuilder {
        let request = self.client.post(format!("{}{}", self.base_url, path)).json(body);
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn payload(message: &str, ctx: &MessageContext) -> Value {
        let mut body = json!({
            "message": message,
            "thread_id": ctx.thread_id,
        });
        if let Value::Object(map) = &mut body {
            for (key, value) in &ctx.extra {
                map.insert(key.clone(), value.clone());
            }
        }
        body
    }

    async fn check_status(response: reqwest::Response) -> LlmResult<reqwest::Response> {
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(LlmError::Authentication("Authentication failed".to_string()));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }
        Ok(response)
    }

    fn describe(error: &LlmError) -> String {
        match error {
            LlmError::Authentication(_) => "Authentication failed".to_string(),
            other => other.to_string(),
        }
    }

    /// Probe `GET {base_url}/health`
    pub async fn health_check(&self) -> AgentResult<()> {
        let mut request = self.client.get(format!("{}/health", self.base_url));
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(LlmError::from)?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn chat(&self, message: &str, ctx: &MessageContext) -> LlmResult<String> {
        let response = self.post("/chat", &Self::payload(message, ctx)).send().await?;
        let body: Value = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| LlmError::Parse(format!("Failed to parse response: {}", e)))?;

        match body.get("response") {
            Some(Value::String(text)) => Ok(text.clone()),
            Some(other) => Ok(other.to_string()),
            None => Err(LlmError::Parse("missing 'response' field".to_string())),
        }
    }

    async fn stream_chat(request: reqwest::RequestBuilder, sender: &TextStreamSender) -> LlmResult<()> {
        let response = Self::check_status(request.send().await?).await?;
        Self::forward_events(response.bytes_stream(), sender).await
    }

    async fn forward_events<S, B, E>(mut body: S, sender: &TextStreamSender) -> LlmResult<()>
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
                match parse_sse_line(&line) {
                    SseLine::Data(content) => {
                        if !sender.send(content).await {
                            return Ok(());
                        }
                    }
                    SseLine::Done => return Ok(()),
                    SseLine::Skip => {}
                }
            }
        }

        if let Some(line) = lines.finish() {
            if let SseLine::Data(content) = parse_sse_line(&line) {
                sender.send(content).await;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Agent for RemoteAgent {
    fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn system_prompt(&self) -> String {
        self.system_prompt.get()
    }

    fn set_system_prompt(&self, prompt: String) {
        self.system_prompt.set(prompt);
    }

    async fn handle_message(&self, message: &str, ctx: &MessageContext) -> String {
        match self.chat(message, ctx).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(agent = %self.config.name, url = %self.base_url, error = %e, "Remote call failed");
                backend_error(LABEL, Self::describe(&e))
            }
        }
    }

    async fn handle_message_stream(&self, message: &str, ctx: &MessageContext) -> TextStream {
        let (sender, stream) = TextStream::channel(64);
        let request = self
            .post("/chat/stream", &Self::payload(message, ctx))
            .header("Accept", "text/event-stream");
        let name = self.config.name.clone();

        tokio::spawn(async move {
            if let Err(e) = Self::stream_chat(request, &sender).await {
                warn!(agent = %name, error = %e, "Remote stream failed");
                let _ = sender.send(backend_error(LABEL, Self::describe(&e))).await;
            } else {
                debug!(agent = %name, "Remote stream finished");
            }
        });

        stream
    }
}
