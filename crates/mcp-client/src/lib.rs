//! `kh-mcp-client` — remote tool discovery over MCP.
//!
//! - JSON-RPC 2.0 types for the MCP handshake and tool calls.
//! - A stdio server that spawns a child process and speaks newline-delimited
//!   JSON-RPC over its stdin/stdout.
//! - An HTTP server reached through plain `GET {tools}` / `POST {call}`
//!   endpoints.
//! - [`McpManager`], which connects to every configured server on first use
//!   and implements [`kh_tools::ToolDiscovery`] on top of them.
//!
//! ```rust,ignore
//! let mcp = Arc::new(McpManager::new(&config.mcp));
//! let tools = ToolManager::new().with_discovery(mcp.clone());
//! tools.ensure_remote_tools().await;
//! ```

pub mod http;
pub mod manager;
pub mod protocol;
pub mod stdio;

pub use kh_domain::config::{McpConfig, McpServerConfig, McpTransportKind};
pub use manager::{McpError, McpManager, ToolServer};
pub use protocol::McpToolDef;
