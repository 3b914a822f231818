//! Persona agent: a role with a goal and backstory working one task per message

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::{render_system_prompt, Agent, SystemPrompt};
use crate::agents::config::{AgentConfig, CrewConfig};
use crate::agents::domain::{ChatMessage, MessageContext, TextStream};
use crate::agents::error::{backend_error, LlmResult};
use crate::agents::llm::{CompletionRequest, LlmProvider};

/// Agent that frames every message as a task for a fixed persona.
///
/// Each message is one self-contained task; there is no streaming, the
/// stream variant yields the whole reply as a single chunk.
pub struct CrewAgent {
    config: AgentConfig,
    crew: CrewConfig,
    provider: Arc<dyn LlmProvider>,
    system_prompt: SystemPrompt,
}

impl CrewAgent {
    pub fn new(config: AgentConfig, crew: CrewConfig, provider: Arc<dyn LlmProvider>) -> Self {
        let system_prompt = SystemPrompt::new(config.system_prompt.clone());
        Self {
            config,
            crew,
            provider,
            system_prompt,
        }
    }

    pub fn role(&self) -> &str {
        &self.crew.role
    }

    /// Goal, falling back to the current system prompt
    pub fn goal(&self) -> String {
        self.crew
            .goal
            .clone()
            .unwrap_or_else(|| self.system_prompt.get())
    }

    /// Backstory, falling back to the agent description
    pub fn backstory(&self) -> &str {
        self.crew
            .backstory
            .as_deref()
            .unwrap_or(&self.config.description)
    }

    fn persona(&self, ctx: &MessageContext) -> String {
        let goal = render_system_prompt(&self.goal(), &ctx.extra);
        format!(
            "You are {}. {}\nYour personal goal is: {}",
            self.role(),
            self.backstory(),
            goal
        )
    }

    async fn run_task(&self, message: &str, ctx: &MessageContext) -> LlmResult<String> {
        let messages = vec![
            ChatMessage::system(self.persona(ctx)),
            ChatMessage::user(format!(
                "Current Task: {}\n\nBegin! This is VERY important to you, use the tools available and give your best Final Answer, your job depends on it!",
                message
            )),
        ];
        let request = CompletionRequest::new(messages).with_llm_config(&self.config.llm);
        Ok(self.provider.complete(request).await?.message.content)
    }
}

#[async_trait]
impl Agent for CrewAgent {
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
        match self.run_task(message, ctx).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(agent = %self.config.name, error = %e, "Crew task failed");
                backend_error("CrewAIAgent", e)
            }
        }
    }

    async fn handle_message_stream(&self, message: &str, ctx: &MessageContext) -> TextStream {
        TextStream::once(self.handle_message(message, ctx).await)
    }
}
