//! # Switchboard - multi-agent LLM orchestration
//!
//! Switchboard routes chat messages to a set of configured agents, each
//! backed by an LLM provider, a persona task runner, a remote HTTP agent or
//! a paper retriever.
//!
//! ## Features
//!
//! - **Tools**: typed parameter specs, provider tool definitions, automatic dispatch
//! - **Agents**: bounded tool-calling loop, streaming, templated system prompts
//! - **Orchestrators**: simple, classifier-routed and ReAct
//! - **Memory**: threads persisted in memory or as one JSON-lines file per thread
//! - **Retrieval**: section-aware chunking and filtered search over a paper corpus
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use switchboard::agents::{MessageContext, Switchboard};
//! use switchboard::config::Settings;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load(Path::new("switchboard.toml"))?;
//!     let switchboard = Switchboard::from_settings(&settings).await?;
//!
//!     let reply = switchboard.send("thread-1", "Hello!", &MessageContext::new()).await;
//!     println!("{}", reply);
//!     Ok(())
//! }
//! ```

pub mod agents;
pub mod cli;
pub mod config;
