//! Conversation memory
//!
//! Threads are append-only message logs kept in a [`Repository`]:
//! - In-memory (strict: duplicate create and append-to-missing both fail)
//! - File-per-thread (lenient: append auto-creates, bad lines are skipped)
//!
//! [`MemoryService`] wraps a repository with the conversation helpers agents
//! and orchestrators use, and can expose them as tools.

mod file;
mod in_memory;
mod service;
mod thread;

pub use file::FileSystemRepository;
pub use in_memory::InMemoryRepository;
pub use service::MemoryService;
pub use thread::{Content, Message, Thread};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::agents::error::AgentResult;

/// Storage backend for threads.
///
/// Whether `append_message` on an unknown thread creates it or fails is
/// backend-defined; see each implementation.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn create_thread(&self, thread: &Thread) -> AgentResult<()>;

    async fn get_thread(&self, thread_id: &str) -> AgentResult<Option<Thread>>;

    async fn append_message(&self, thread_id: &str, message: Message) -> AgentResult<()>;

    async fn list_threads(&self) -> AgentResult<Vec<String>>;

    async fn delete_thread(&self, thread_id: &str) -> AgentResult<()>;
}

/// Memory backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemoryBackend {
    /// Kept in process memory only
    #[default]
    InMemory,
    /// One file per thread under `path`
    File,
}

/// Memory configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct MemoryConfig {
    #[serde(default)]
    pub backend: MemoryBackend,
    /// Directory for the file backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Create a repository from configuration
pub fn create_repository(config: &MemoryConfig) -> AgentResult<Arc<dyn Repository>> {
    match config.backend {
        MemoryBackend::InMemory => Ok(Arc::new(InMemoryRepository::new())),
        MemoryBackend::File => {
            let path = config
                .path
                .clone()
                .unwrap_or_else(|| PathBuf::from("data/threads"));
            Ok(Arc::new(FileSystemRepository::new(path)?))
        }
    }
}
