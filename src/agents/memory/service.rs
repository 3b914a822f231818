//! Conversation memory service shared by agents and orchestrators

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::debug;

use super::{Message, Repository, Thread};
use crate::agents::error::{AgentError, AgentResult};
use crate::agents::tools::{ParamSpec, ParamType, Tool, ToolArgs, ToolRegistry};

/// Default window for `get_last_n_messages`
pub const DEFAULT_LAST_N: usize = 5;

/// Explicit memory object owned by the application and passed by reference.
///
/// Threads are created lazily on first store regardless of the backend's
/// own append policy.
#[derive(Clone)]
pub struct MemoryService {
    repository: Arc<dyn Repository>,
}

impl MemoryService {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    async fn ensure_thread(&self, thread_id: &str) -> AgentResult<()> {
        if self.repository.get_thread(thread_id).await?.is_none() {
            match self.repository.create_thread(&Thread::new(thread_id)).await {
                Ok(()) | Err(AgentError::ThreadExists(_)) => {}
                Err(e) => return Err(e),
            }
            debug!(thread_id, "Created thread");
        }
        Ok(())
    }

    /// Store a message, creating the thread when needed
    pub async fn store_message(
        &self,
        thread_id: &str,
        sender: &str,
        content: impl Into<super::Content>,
        metadata: Option<Map<String, Value>>,
    ) -> AgentResult<Message> {
        self.ensure_thread(thread_id).await?;
        let message = Message::new(thread_id, sender, content).with_metadata(metadata.unwrap_or_default());
        self.repository.append_message(thread_id, message.clone()).await?;
        Ok(message)
    }

    /// Last `n` messages of a thread, empty when the thread does not exist
    pub async fn get_last_n_messages(&self, thread_id: &str, n: usize) -> AgentResult<Vec<Message>> {
        Ok(self
            .repository
            .get_thread(thread_id)
            .await?
            .map(|thread| thread.get_last_n_messages(n).to_vec())
            .unwrap_or_default())
    }

    /// Naive transcript summary; empty string when the thread does not exist
    pub async fn get_thread_summary(&self, thread_id: &str) -> AgentResult<String> {
        let Some(thread) = self.repository.get_thread(thread_id).await? else {
            return Ok(String::new());
        };

        let lines: Vec<String> = thread
            .messages
            .iter()
            .map(|m| format!("{} said: {}", m.sender, m.content))
            .collect();

        Ok(format!("Summary of thread {}:\n{}", thread_id, lines.join("\n")))
    }

    /// Register `store_message`, `get_last_n` and `get_summary` tools
    pub fn configure_memory_tools(&self, registry: &mut ToolRegistry) -> AgentResult<()> {
        let service = self.clone();
        registry.register_tool(
            Tool::builder("store_message")
                .description("Store a message in a conversation thread, creating the thread if needed.")
                .param("thread_id", ParamSpec::new(ParamType::String, "Conversation thread id.").required())
                .param("sender", ParamSpec::new(ParamType::String, "Who sent the message.").required())
                .param("content", ParamSpec::new(ParamType::String, "The message content.").required())
                .param("metadata", ParamSpec::new(ParamType::Object, "Optional metadata."))
                .function(move |args: ToolArgs| {
                    let service = service.clone();
                    async move {
                        let thread_id = str_arg(&args, "thread_id")?;
                        let sender = str_arg(&args, "sender")?;
                        let content = args.get("content").cloned().unwrap_or(Value::Null);
                        let metadata = args.get("metadata").and_then(Value::as_object).cloned();
                        service
                            .store_message(&thread_id, &sender, content, metadata)
                            .await
                            .map_err(|e| e.to_string())?;
                        Ok(json!(format!("Message stored in thread {}.", thread_id)))
                    }
                })
                .build()?,
        );

        let service = self.clone();
        registry.register_tool(
            Tool::builder("get_last_n")
                .description("Retrieve the last N messages from a conversation thread.")
                .param("thread_id", ParamSpec::new(ParamType::String, "Conversation thread id.").required())
                .param("n", ParamSpec::new(ParamType::Integer, "Number of messages to retrieve (default: 5)."))
                .function(move |args: ToolArgs| {
                    let service = service.clone();
                    async move {
                        let thread_id = str_arg(&args, "thread_id")?;
                        let n = args
                            .get("n")
                            .and_then(Value::as_u64)
                            .map(|n| n as usize)
                            .unwrap_or(DEFAULT_LAST_N);
                        let messages = service
                            .get_last_n_messages(&thread_id, n)
                            .await
                            .map_err(|e| e.to_string())?;
                        serde_json::to_value(messages).map_err(|e| e.to_string())
                    }
                })
                .build()?,
        );

        let service = self.clone();
        registry.register_tool(
            Tool::builder("get_summary")
                .description("Summarize the conversation so far in a thread.")
                .param("thread_id", ParamSpec::new(ParamType::String, "Conversation thread id.").required())
                .function(move |args: ToolArgs| {
                    let service = service.clone();
                    async move {
                        let thread_id = str_arg(&args, "thread_id")?;
                        let summary = service
                            .get_thread_summary(&thread_id)
                            .await
                            .map_err(|e| e.to_string())?;
                        Ok(json!(summary))
                    }
                })
                .build()?,
        );

        Ok(())
    }
}

fn str_arg(args: &ToolArgs, key: &str) -> Result<String, String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| format!("argument '{}' must be a string", key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::memory::{FileSystemRepository, InMemoryRepository};

    fn service() -> MemoryService {
        MemoryService::new(Arc::new(InMemoryRepository::new()))
    }

    #[tokio::test]
    async fn test_store_creates_thread_lazily() {
        let memory = service();
        memory.store_message("t1", "user", "hi", None).await.unwrap();
        memory.store_message("t1", "assistant", "hello", None).await.unwrap();

        let last = memory.get_last_n_messages("t1", DEFAULT_LAST_N).await.unwrap();
        assert_eq!(last.len(), 2);
        assert_eq!(last[1].sender, "assistant");
    }

    #[tokio::test]
    async fn test_summary_format() {
        let memory = service();
        assert_eq!(memory.get_thread_summary("none").await.unwrap(), "");

        memory.store_message("t1", "user", "hi", None).await.unwrap();
        memory.store_message("t1", "bot", "hello", None).await.unwrap();
        assert_eq!(
            memory.get_thread_summary("t1").await.unwrap(),
            "Summary of thread t1:\nuser said: hi\nbot said: hello"
        );
    }

    #[tokio::test]
    async fn test_memory_tools() {
        let dir = tempfile::TempDir::new().unwrap();
        let memory = MemoryService::new(Arc::new(FileSystemRepository::new(dir.path()).unwrap()));
        let mut registry = ToolRegistry::new();
        memory.configure_memory_tools(&mut registry).unwrap();

        assert_eq!(registry.list_tools(), vec!["get_last_n", "get_summary", "store_message"]);

        let stored = registry
            .invoke("store_message", &json!({"thread_id": "t9", "sender": "user", "content": "ping"}))
            .await
            .unwrap();
        assert_eq!(stored, json!("Message stored in thread t9."));

        let last = registry
            .invoke("get_last_n", &json!({"thread_id": "t9", "n": 1}))
            .await
            .unwrap();
        assert_eq!(last[0]["content"], "ping");
        assert_eq!(last[0]["sender"], "user");

        let err = registry.invoke("get_summary", &json!({})).await.unwrap_err();
        assert!(err.to_string().contains("requires arguments: thread_id"));
    }
}
