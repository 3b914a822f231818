//! File-per-thread repository
//!
//! Each thread lives in `<base>/<thread_id>.json`. The first line holds the
//! thread header `{"thread_id", "metadata"}`; every following line is one
//! message serialized as JSON. Appends only ever add a line.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use super::{Message, Repository, Thread};
use crate::agents::error::{AgentError, AgentResult};

const EXTENSION: &str = "json";

#[derive(Debug, Serialize, Deserialize)]
struct ThreadHeader {
    thread_id: String,
    #[serde(default)]
    metadata: Map<String, Value>,
}

/// Repository storing one newline-delimited JSON log per thread.
///
/// `create_thread` on an existing file is a no-op and `append_message`
/// creates missing threads. Unreadable files read back as an empty thread;
/// malformed lines are skipped. Thread ids containing path separators or
/// `..` fail with a validation error.
#[derive(Debug, Clone)]
pub struct FileSystemRepository {
    base_path: PathBuf,
}

impl FileSystemRepository {
    pub fn new(base_path: impl Into<PathBuf>) -> AgentResult<Self> {
        let base_path = base_path.into();

        std::fs::create_dir_all(&base_path).map_err(|e| {
            AgentError::Memory(format!("Failed to create directory {}: {}", base_path.display(), e))
        })?;

        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Thread ids become file names, so anything that could leave
    /// `base_path` is rejected
    fn thread_path(&self, thread_id: &str) -> AgentResult<PathBuf> {
        if thread_id.is_empty()
            || thread_id.contains("..")
            || thread_id.contains(&['/', '\\', '\0'][..])
        {
            return Err(AgentError::Validation(format!("Invalid thread id: {:?}", thread_id)));
        }
        Ok(self.base_path.join(format!("{}.{}", thread_id, EXTENSION)))
    }

    fn message_line(message: &Message) -> AgentResult<String> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        Ok(line)
    }

    fn parse_thread(thread_id: &str, raw: &str) -> Thread {
        let mut lines = raw.lines();

        let header = lines
            .next()
            .and_then(|line| serde_json::from_str::<ThreadHeader>(line).ok());
        let metadata = header.map(|h| h.metadata).unwrap_or_default();

        let mut thread = Thread::new(thread_id).with_metadata(metadata);

        for (index, line) in lines.enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StoredMessage>(line) {
                Ok(stored) => thread.add_message(stored.into_message(thread_id)),
                Err(e) => warn!(
                    thread_id,
                    line = index + 2,
                    error = %e,
                    "Skipping malformed message line"
                ),
            }
        }

        thread
    }
}

/// Message line as read back; only `sender` and `content` are mandatory
#[derive(Debug, Deserialize)]
struct StoredMessage {
    #[serde(default)]
    message_id: Option<String>,
    sender: String,
    content: super::Content,
    #[serde(default)]
    timestamp: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

impl StoredMessage {
    fn into_message(self, thread_id: &str) -> Message {
        let mut message = Message::new(thread_id, self.sender, self.content).with_metadata(self.metadata);
        if let Some(id) = self.message_id {
            message.message_id = id;
        }
        if let Some(timestamp) = self.timestamp {
            message.timestamp = timestamp;
        }
        message
    }
}

#[async_trait]
impl Repository for FileSystemRepository {
    async fn create_thread(&self, thread: &Thread) -> AgentResult<()> {
        let path = self.thread_path(&thread.thread_id)?;
        if fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }

        let header = ThreadHeader {
            thread_id: thread.thread_id.clone(),
            metadata: thread.metadata.clone(),
        };
        let mut content = serde_json::to_string(&header)?;
        content.push('\n');
        for message in &thread.messages {
            content.push_str(&Self::message_line(message)?);
        }

        fs::write(&path, content).await.map_err(|e| {
            AgentError::Memory(format!("Failed to write thread file {}: {}", path.display(), e))
        })
    }

    async fn get_thread(&self, thread_id: &str) -> AgentResult<Option<Thread>> {
        let path = self.thread_path(thread_id)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }

        match fs::read_to_string(&path).await {
            Ok(raw) => Ok(Some(Self::parse_thread(thread_id, &raw))),
            Err(e) => {
                warn!(thread_id, error = %e, "Failed to read thread file, returning empty thread");
                Ok(Some(Thread::new(thread_id)))
            }
        }
    }

    async fn append_message(&self, thread_id: &str, message: Message) -> AgentResult<()> {
        let path = self.thread_path(thread_id)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            self.create_thread(&Thread::new(thread_id)).await?;
        }

        let line = Self::message_line(&message)?;
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .map_err(|e| AgentError::Memory(format!("Failed to append message to thread {}: {}", thread_id, e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| AgentError::Memory(format!("Failed to append message to thread {}: {}", thread_id, e)))?;
        file.flush().await?;
        Ok(())
    }

    async fn list_threads(&self) -> AgentResult<Vec<String>> {
        let mut thread_ids = Vec::new();
        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Failed to list thread directory");
                return Ok(thread_ids);
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == EXTENSION) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    thread_ids.push(stem.to_string());
                }
            }
        }

        thread_ids.sort();
        Ok(thread_ids)
    }

    async fn delete_thread(&self, thread_id: &str) -> AgentResult<()> {
        let path = self.thread_path(thread_id)?;
        if let Err(e) = fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(thread_id, error = %e, "Failed to delete thread file");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::memory::Content;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_roundtrip_preserves_order_and_content() {
        let dir = TempDir::new().unwrap();
        let repo = FileSystemRepository::new(dir.path()).unwrap();

        repo.append_message("t1", Message::new("t1", "user", "hello")).await.unwrap();
        repo.append_message("t1", Message::new("t1", "assistant", json!({"tool": "echo"})))
            .await
            .unwrap();
        repo.append_message("t1", Message::new("t1", "planner", "done")).await.unwrap();

        let reopened = FileSystemRepository::new(dir.path()).unwrap();
        let thread = reopened.get_thread("t1").await.unwrap().unwrap();

        assert_eq!(thread.len(), 3);
        assert_eq!(thread.messages[0].sender, "user");
        assert_eq!(thread.messages[0].content.to_string(), "hello");
        assert_eq!(thread.messages[1].content, Content::Structured(json!({"tool": "echo"})));
        assert_eq!(thread.messages[2].sender, "planner");
    }

    #[tokio::test]
    async fn test_malformed_line_keeps_later_messages() {
        let dir = TempDir::new().unwrap();
        let repo = FileSystemRepository::new(dir.path()).unwrap();

        let first = serde_json::to_string(&Message::new("t1", "user", "first")).unwrap();
        let second = serde_json::to_string(&Message::new("t1", "assistant", "second")).unwrap();
        let raw = format!(
            "{{\"thread_id\":\"t1\",\"metadata\":{{}}}}\n{}\n{{not json\n{}\n",
            first, second
        );
        std::fs::write(dir.path().join("t1.json"), raw).unwrap();

        let thread = repo.get_thread("t1").await.unwrap().unwrap();
        let contents: Vec<String> = thread.messages.iter().map(|m| m.content.to_string()).collect();
        assert_eq!(contents, vec!["first".to_string(), "second".to_string()]);
        assert_eq!(thread.messages[1].sender, "assistant");
    }

    #[tokio::test]
    async fn test_thread_ids_cannot_leave_base_directory() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("threads");
        let repo = FileSystemRepository::new(&base).unwrap();

        for bad in ["../escaped", "nested/thread", "back\\slash", "..", ""] {
            let result = repo.append_message(bad, Message::new(bad, "user", "hi")).await;
            assert!(matches!(result, Err(AgentError::Validation(_))), "accepted {:?}", bad);
            assert!(matches!(repo.get_thread(bad).await, Err(AgentError::Validation(_))));
        }
        assert!(!dir.path().join("escaped.json").exists());

        repo.append_message("thread-1.v2", Message::new("thread-1.v2", "user", "hi")).await.unwrap();
        assert!(base.join("thread-1.v2.json").exists());
    }

    #[tokio::test]
    async fn test_create_existing_is_noop() {
        let dir = TempDir::new().unwrap();
        let repo = FileSystemRepository::new(dir.path()).unwrap();

        repo.append_message("t1", Message::new("t1", "user", "keep me")).await.unwrap();
        repo.create_thread(&Thread::new("t1")).await.unwrap();

        let thread = repo.get_thread("t1").await.unwrap().unwrap();
        assert_eq!(thread.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_thread_is_none_and_delete_ignores_missing() {
        let dir = TempDir::new().unwrap();
        let repo = FileSystemRepository::new(dir.path()).unwrap();

        assert!(repo.get_thread("ghost").await.unwrap().is_none());
        repo.delete_thread("ghost").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_threads_strips_extension() {
        let dir = TempDir::new().unwrap();
        let repo = FileSystemRepository::new(dir.path()).unwrap();

        repo.create_thread(&Thread::new("b")).await.unwrap();
        repo.create_thread(&Thread::new("a")).await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        assert_eq!(repo.list_threads().await.unwrap(), vec!["a".to_string(), "b".to_string()]);
    }
}
