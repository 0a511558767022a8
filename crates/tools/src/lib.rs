//! Tool registry for Kohi agents.
//!
//! - [`Tool`]: a named callable with a JSON-schema argument description.
//! - [`ToolManager`]: ordered registry with per-tool enable flags and a
//!   lazily discovered set of remote tools.

pub mod manager;
pub mod remote;
pub mod tool;

pub use manager::ToolManager;
pub use remote::{RemoteTool, ToolDiscovery};
pub use tool::{parse_args, Tool, ToolError};
