//! Conversation threads and their messages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Message payload: plain text or a structured tool payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Structured(Value),
}

impl Content {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(text) => Some(text),
            Content::Structured(Value::String(text)) => Some(text),
            Content::Structured(_) => None,
        }
    }
}

impl fmt::Display for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Text(text) => f.write_str(text),
            Content::Structured(value) => write!(f, "{}", value),
        }
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::Text(text)
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::Text(text.to_string())
    }
}

impl From<Value> for Content {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => Content::Text(text),
            other => Content::Structured(other),
        }
    }
}

/// One stored conversation message; immutable once created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub thread_id: String,
    /// "user", "assistant", "system" or an agent name
    pub sender: String,
    pub content: Content,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Message {
    pub fn new(thread_id: impl Into<String>, sender: impl Into<String>, content: impl Into<Content>) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            sender: sender.into(),
            content: content.into(),
            timestamp: Utc::now(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Append-only, ordered message log for one conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub thread_id: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Thread {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            metadata: Map::new(),
            messages: Vec::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// The last `n` messages in append order
    pub fn get_last_n_messages(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_last_n_messages() {
        let mut thread = Thread::new("t1");
        for i in 0..4 {
            thread.add_message(Message::new("t1", "user", format!("m{}", i)));
        }

        let last = thread.get_last_n_messages(2);
        assert_eq!(last.len(), 2);
        assert_eq!(last[0].content, Content::Text("m2".into()));
        assert_eq!(thread.get_last_n_messages(10).len(), 4);
        assert!(thread.get_last_n_messages(0).is_empty());
    }

    #[test]
    fn test_content_roundtrips_untagged() {
        let text: Content = serde_json::from_value(json!("hello")).unwrap();
        assert_eq!(text, Content::Text("hello".into()));

        let structured: Content = serde_json::from_value(json!({"tool": "echo"})).unwrap();
        assert_eq!(structured, Content::Structured(json!({"tool": "echo"})));
        assert_eq!(structured.to_string(), r#"{"tool":"echo"}"#);
    }
}
