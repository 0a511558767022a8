//! JSON-RPC 2.0 messages and MCP payloads.
//!
//! On stdio each message is one line of JSON.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use kh_domain::tool::ToolDefinition;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outbound message. A request carries an `id`; a notification does not.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Outbound<'a> {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> Outbound<'a> {
    pub fn request(id: u64, method: &'a str, params: Option<Value>) -> Self {
        Self { jsonrpc: "2.0", id: Some(id), method, params }
    }

    pub fn notification(method: &'a str) -> Self {
        Self { jsonrpc: "2.0", id: None, method, params: None }
    }
}

/// Inbound message. Server notifications come through with `id: None`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Inbound {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

impl Inbound {
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, thiserror::Error)]
#[error("JSON-RPC error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MCP payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": { "name": "kohi", "version": env!("CARGO_PKG_VERSION") }
    })
}

/// A tool as advertised by a server. Accepts the MCP `inputSchema` field
/// as well as the `parameters` / `schema` spellings some servers use.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct McpToolDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(
        default = "empty_object_schema",
        rename = "inputSchema",
        alias = "parameters",
        alias = "schema"
    )]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

impl McpToolDef {
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolsList {
    #[serde(default)]
    pub tools: Vec<McpToolDef>,
}

/// Result of `tools/call`. Content items are kept as raw JSON so image or
/// resource parts survive flattening.
#[derive(Debug, Clone, Deserialize)]
pub struct CallResult {
    #[serde(default)]
    pub content: Vec<Value>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl CallResult {
    /// Text parts verbatim, anything else as compact JSON, one per line.
    pub fn flatten(&self) -> String {
        self.content
            .iter()
            .map(|item| match (item.get("type").and_then(Value::as_str), item.get("text")) {
                (Some("text"), Some(Value::String(text))) => text.clone(),
                _ => item.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
