//! Domain types for the agent system
//!
//! Core value types shared by providers, agents, tools and orchestrators.

mod agent;
mod message;
mod response;
mod tool_call;

pub use agent::*;
pub use message::*;
pub use response::*;
pub use tool_call::*;
