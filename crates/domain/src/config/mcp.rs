//! Remote tool (MCP) configuration types for the domain layer.
//!
//! These are lightweight config structs used to deserialize the `[mcp]`
//! section of the config file. The client logic lives in the
//! `kh-mcp-client` crate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level MCP configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpConfig {
    /// List of MCP server definitions.
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,
}

/// Configuration for a single MCP server connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Unique identifier for this server (used in logs).
    pub id: String,

    /// Transport type (`"stdio"` or `"http"`).
    #[serde(default)]
    pub transport: McpTransportKind,

    /// The command to spawn (stdio).
    #[serde(default)]
    pub command: String,

    /// Arguments to pass to the command (stdio).
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables set on the spawned process (stdio).
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Base URL (http).
    #[serde(default)]
    pub url: Option<String>,

    /// Path appended to `url` to list tools (http).
    #[serde(default = "d_tools_endpoint")]
    pub tools_endpoint: String,

    /// Path appended to `url` to call a tool (http).
    #[serde(default = "d_call_endpoint")]
    pub call_endpoint: String,

    /// Optional auth header sent with every http request.
    #[serde(default)]
    pub auth_header: Option<String>,

    /// Environment variable holding the auth header value.
    #[serde(default)]
    pub auth_value_env: Option<String>,
}

/// Transport kind for connecting to an MCP server.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum McpTransportKind {
    #[default]
    Stdio,
    Http,
}

fn d_tools_endpoint() -> String {
    "/tools".into()
}

fn d_call_endpoint() -> String {
    "/call".into()
}
