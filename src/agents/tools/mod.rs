//! Tools: schema-described callables and the registry that dispatches them
//!
//! - `tool` - [`Tool`] construction, schema derivation and validation
//! - `registry` - [`ToolRegistry`] lookup and per-call isolated dispatch
//! - `extract` - normalizing tool-call requests from raw provider responses

mod extract;
mod registry;
mod tool;

pub use extract::{extract_tool_calls, ProviderFormat};
pub use registry::ToolRegistry;
pub use tool::{ParamSpec, ParamType, Tool, ToolArgs, ToolBuilder, ToolFn, CALL_METHOD};
