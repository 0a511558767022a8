//! MCP manager — connects to the configured servers and routes tool calls.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::OnceCell;

use kh_domain::config::{McpConfig, McpServerConfig, McpTransportKind};
use kh_domain::tool::ToolDefinition;
use kh_tools::ToolDiscovery;

use crate::http::HttpServer;
use crate::protocol::{McpToolDef, RpcError};
use crate::stdio::StdioServer;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolServer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One connected tool server, whatever its transport.
#[async_trait]
pub trait ToolServer: Send + Sync {
    fn id(&self) -> &str;
    async fn list_tools(&self) -> Result<Vec<McpToolDef>, McpError>;
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, McpError>;
    async fn shutdown(&self);
}

async fn connect(config: &McpServerConfig) -> Result<Arc<dyn ToolServer>, McpError> {
    Ok(match config.transport {
        McpTransportKind::Stdio => Arc::new(StdioServer::connect(config).await?),
        McpTransportKind::Http => Arc::new(HttpServer::new(config)?),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// McpManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// All configured tool servers. Connections are opened on the first
/// [`ToolDiscovery::list`]; servers that fail to connect are skipped.
pub struct McpManager {
    configs: Vec<McpServerConfig>,
    servers: OnceCell<Vec<Arc<dyn ToolServer>>>,
    /// Tool name → server that provides it. First server wins.
    routes: RwLock<HashMap<String, Arc<dyn ToolServer>>>,
}

impl McpManager {
    pub fn new(config: &McpConfig) -> Self {
        Self {
            configs: config.servers.clone(),
            servers: OnceCell::new(),
            routes: RwLock::new(HashMap::new()),
        }
    }

    /// Manager over already connected servers.
    pub fn with_servers(servers: Vec<Arc<dyn ToolServer>>) -> Self {
        Self {
            configs: Vec::new(),
            servers: OnceCell::new_with(Some(servers)),
            routes: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty() && self.servers.get().map_or(true, Vec::is_empty)
    }

    async fn servers(&self) -> &[Arc<dyn ToolServer>] {
        self.servers
            .get_or_init(|| async {
                let mut servers = Vec::with_capacity(self.configs.len());
                for config in &self.configs {
                    tracing::info!(
                        server_id = %config.id,
                        transport = ?config.transport,
                        "connecting MCP server"
                    );
                    match connect(config).await {
                        Ok(server) => servers.push(server),
                        Err(e) => tracing::warn!(
                            server_id = %config.id,
                            error = %e,
                            "failed to connect MCP server, skipping"
                        ),
                    }
                }
                servers
            })
            .await
    }

    /// Close every connected server concurrently.
    pub async fn shutdown(&self) {
        if let Some(servers) = self.servers.get() {
            futures_util::future::join_all(servers.iter().map(|s| s.shutdown())).await;
        }
    }
}

#[async_trait]
impl ToolDiscovery for McpManager {
    async fn list(&self) -> kh_domain::Result<Vec<ToolDefinition>> {
        let mut defs = Vec::new();
        let mut routes = HashMap::new();

        for server in self.servers().await {
            let tools = match server.list_tools().await {
                Ok(tools) => tools,
                Err(e) => {
                    tracing::warn!(server_id = %server.id(), error = %e, "tool listing failed");
                    continue;
                }
            };
            tracing::info!(server_id = %server.id(), tool_count = tools.len(), "MCP tools listed");
            for tool in tools {
                if routes.contains_key(&tool.name) {
                    tracing::debug!(
                        server_id = %server.id(),
                        tool = %tool.name,
                        "duplicate remote tool name, keeping first"
                    );
                    continue;
                }
                routes.insert(tool.name.clone(), Arc::clone(server));
                defs.push(tool.to_definition());
            }
        }

        *self.routes.write() = routes;
        Ok(defs)
    }

    async fn call(&self, name: &str, args: Value) -> kh_domain::Result<String> {
        let server = self
            .routes
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| McpError::UnknownTool(name.to_string()))?;
        Ok(server.call_tool(name, args).await?)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("MCP I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("MCP JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Rpc(#[from] RpcError),

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("MCP HTTP error: {0}")]
    Http(String),

    #[error("MCP config error: {0}")]
    Config(String),

    #[error("MCP request timed out: {0}")]
    Timeout(String),

    #[error("MCP server is down: {0}")]
    ServerDown(String),

    #[error("no MCP server provides tool {0}")]
    UnknownTool(String),

    #[error("{0}")]
    ToolFailed(String),
}

impl From<McpError> for kh_domain::Error {
    fn from(e: McpError) -> Self {
        match e {
            McpError::Timeout(what) => kh_domain::Error::Timeout(what),
            McpError::Http(msg) => kh_domain::Error::Http(msg),
            other => kh_domain::Error::Other(other.to_string()),
        }
    }
}
