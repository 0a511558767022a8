//! Tools provided by a remote discovery service (MCP servers).

use std::sync::Arc;

use serde_json::Value;

use kh_domain::tool::ToolDefinition;

use crate::tool::{Tool, ToolError};

/// A source of remotely hosted tools.
#[async_trait::async_trait]
pub trait ToolDiscovery: Send + Sync {
    async fn list(&self) -> kh_domain::Result<Vec<ToolDefinition>>;
    async fn call(&self, name: &str, args: Value) -> kh_domain::Result<String>;
}

/// Adapter exposing one discovered tool through the [`Tool`] trait.
pub struct RemoteTool {
    definition: ToolDefinition,
    discovery: Arc<dyn ToolDiscovery>,
}

impl RemoteTool {
    pub fn new(definition: ToolDefinition, discovery: Arc<dyn ToolDiscovery>) -> Self {
        Self { definition, discovery }
    }
}

#[async_trait::async_trait]
impl Tool for RemoteTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        self.discovery
            .call(&self.definition.name, args)
            .await
            .map_err(|e| ToolError::Remote(e.to_string()))
    }
}
