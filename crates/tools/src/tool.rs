use serde::de::DeserializeOwned;
use serde_json::Value;

use kh_domain::tool::ToolDefinition;

/// Failure of a single tool invocation. The agent turns it into text for
/// the model; it never aborts a turn.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Failed(String),

    #[error("remote tool error: {0}")]
    Remote(String),
}

#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    async fn execute(&self, args: Value) -> Result<String, ToolError>;
}

/// Deserialize tool arguments into a typed request.
pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}
