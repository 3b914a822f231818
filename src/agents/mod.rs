//! Multi-agent orchestration
//!
//! Agents wrap a backend (a chat-completion provider, a persona task runner,
//! a remote HTTP agent or a document retriever) behind one contract.
//! Orchestrators pick which agent answers each message.
//!
//! ## Architecture
//!
//! - `domain/` - Wire types (ChatMessage, ToolCall, AgentInfo, TextStream)
//! - `tools/` - Tool definitions, argument validation and dispatch
//! - `llm/` - LLM provider implementations with streaming
//! - `core/` - The Agent trait and its implementations
//! - `registry` - Named agent lookup
//! - `classifiers` - Message-to-agent routing
//! - `orchestration/` - Simple, multi-agent and ReAct control loops
//! - `memory/` - Threads and messages with pluggable repositories
//! - `retrieval/` - Paper chunking, document search and the retrieval agent
//! - `handler` - Builds all of the above from settings

pub mod classifiers;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod handler;
pub mod llm;
pub mod memory;
pub mod orchestration;
pub mod registry;
pub mod retrieval;
pub mod tools;

// Re-export commonly used types
pub use config::*;
pub use domain::*;
pub use error::*;
pub use handler::Switchboard;
