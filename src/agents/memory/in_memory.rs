//! In-memory thread repository

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{Message, Repository, Thread};
use crate::agents::error::{AgentError, AgentResult};

/// RAM-only repository.
///
/// Strict about existence: creating a thread twice fails with
/// [`AgentError::ThreadExists`], appending to an unknown thread fails with
/// [`AgentError::ThreadNotFound`].
#[derive(Debug, Default, Clone)]
pub struct InMemoryRepository {
    threads: Arc<RwLock<HashMap<String, Thread>>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn create_thread(&self, thread: &Thread) -> AgentResult<()> {
        let mut threads = self.threads.write().await;
        if threads.contains_key(&thread.thread_id) {
            return Err(AgentError::ThreadExists(thread.thread_id.clone()));
        }
        threads.insert(thread.thread_id.clone(), thread.clone());
        Ok(())
    }

    async fn get_thread(&self, thread_id: &str) -> AgentResult<Option<Thread>> {
        let threads = self.threads.read().await;
        Ok(threads.get(thread_id).cloned())
    }

    async fn append_message(&self, thread_id: &str, message: Message) -> AgentResult<()> {
        let mut threads = self.threads.write().await;
        match threads.get_mut(thread_id) {
            Some(thread) => {
                thread.add_message(message);
                Ok(())
            }
            None => Err(AgentError::ThreadNotFound(thread_id.to_string())),
        }
    }

    async fn list_threads(&self) -> AgentResult<Vec<String>> {
        let threads = self.threads.read().await;
        Ok(threads.keys().cloned().collect())
    }

    async fn delete_thread(&self, thread_id: &str) -> AgentResult<()> {
        let mut threads = self.threads.write().await;
        threads.remove(thread_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_create_fails() {
        let repo = InMemoryRepository::new();
        repo.create_thread(&Thread::new("t1")).await.unwrap();
        let err = repo.create_thread(&Thread::new("t1")).await.unwrap_err();
        assert!(matches!(err, AgentError::ThreadExists(id) if id == "t1"));
    }

    #[tokio::test]
    async fn test_append_to_missing_thread_fails() {
        let repo = InMemoryRepository::new();
        let err = repo
            .append_message("nope", Message::new("nope", "user", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ThreadNotFound(_)));
    }

    #[tokio::test]
    async fn test_append_preserves_order_and_delete() {
        let repo = InMemoryRepository::new();
        repo.create_thread(&Thread::new("t1")).await.unwrap();
        repo.append_message("t1", Message::new("t1", "user", "first")).await.unwrap();
        repo.append_message("t1", Message::new("t1", "assistant", "second")).await.unwrap();

        let thread = repo.get_thread("t1").await.unwrap().unwrap();
        let senders: Vec<&str> = thread.messages.iter().map(|m| m.sender.as_str()).collect();
        assert_eq!(senders, vec!["user", "assistant"]);
        assert_eq!(repo.list_threads().await.unwrap(), vec!["t1".to_string()]);

        repo.delete_thread("t1").await.unwrap();
        assert!(repo.get_thread("t1").await.unwrap().is_none());
        repo.delete_thread("t1").await.unwrap();
    }
}
