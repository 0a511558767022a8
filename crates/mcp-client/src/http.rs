//! Tool servers reached over plain HTTP.
//!
//! `GET {url}{tools_endpoint}` lists tools, either as `{"tools": [...]}` or
//! a bare array, each entry in MCP shape or as an OpenAI function object.
//! `POST {url}{call_endpoint}` with `{"name", "arguments"}` runs one.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{json, Value};

use kh_domain::config::McpServerConfig;

use crate::manager::{McpError, ToolServer};
use crate::protocol::{CallResult, McpToolDef};

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

pub struct HttpServer {
    id: String,
    client: reqwest::Client,
    tools_url: String,
    call_url: String,
}

impl HttpServer {
    pub fn new(config: &McpServerConfig) -> Result<Self, McpError> {
        let base = config
            .url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| McpError::Config(format!("server {} has no url", config.id)))?
            .trim_end_matches('/');

        let mut headers = HeaderMap::new();
        if let (Some(name), Some(env)) = (&config.auth_header, &config.auth_value_env) {
            match std::env::var(env) {
                Ok(value) => {
                    let name = HeaderName::from_bytes(name.as_bytes())
                        .map_err(|e| McpError::Config(format!("auth header name: {e}")))?;
                    let value = HeaderValue::from_str(&value)
                        .map_err(|e| McpError::Config(format!("auth header value: {e}")))?;
                    headers.insert(name, value);
                }
                Err(_) => tracing::warn!(server_id = %config.id, env = %env, "auth env var not set"),
            }
        }

        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .default_headers(headers)
            .build()
            .map_err(|e| McpError::Http(e.to_string()))?;

        Ok(Self {
            id: config.id.clone(),
            client,
            tools_url: format!("{base}{}", config.tools_endpoint),
            call_url: format!("{base}{}", config.call_endpoint),
        })
    }
}

#[async_trait]
impl ToolServer for HttpServer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn list_tools(&self) -> Result<Vec<McpToolDef>, McpError> {
        let resp = self
            .client
            .get(&self.tools_url)
            .send()
            .await
            .map_err(|e| McpError::Http(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(McpError::Http(format!("{} returned {status}", self.tools_url)));
        }
        let body: Value = resp.json().await.map_err(|e| McpError::Http(e.to_string()))?;
        Ok(parse_tool_list(body))
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, McpError> {
        let resp = self
            .client
            .post(&self.call_url)
            .json(&json!({ "name": name, "arguments": arguments }))
            .send()
            .await
            .map_err(|e| McpError::Http(e.to_string()))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| McpError::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(McpError::Http(format!("{status}: {text}")));
        }
        call_response_text(&text)
    }

    async fn shutdown(&self) {}
}

/// Normalise a tool listing into MCP tool definitions. Entries without a
/// name are skipped.
pub fn parse_tool_list(body: Value) -> Vec<McpToolDef> {
    let items = match body {
        Value::Object(mut map) => match map.remove("tools") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        Value::Array(items) => items,
        _ => Vec::new(),
    };

    items
        .into_iter()
        .filter_map(|item| {
            let item = match item.get("type").and_then(Value::as_str) {
                Some("function") => item.get("function").cloned().unwrap_or(item),
                _ => item,
            };
            serde_json::from_value::<McpToolDef>(item).ok()
        })
        .collect()
}

/// Text for the model from a call response body: MCP results are
/// flattened, JSON strings unwrapped, other JSON kept compact and
/// non-JSON bodies passed through.
pub fn call_response_text(body: &str) -> Result<String, McpError> {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return Ok(body.to_string());
    };
    match value {
        Value::String(s) => Ok(s),
        Value::Object(ref map) if map.contains_key("content") => {
            let result: CallResult = serde_json::from_value(value.clone())?;
            if result.is_error {
                return Err(McpError::ToolFailed(result.flatten()));
            }
            Ok(result.flatten())
        }
        Value::Object(ref map) if map.contains_key("error") => {
            Err(McpError::ToolFailed(map["error"].to_string()))
        }
        other => Ok(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_list_accepts_wrapped_bare_and_function_shapes() {
        let wrapped = parse_tool_list(json!({
            "tools": [{"name": "search", "description": "Find", "parameters": {"type": "object"}}]
        }));
        assert_eq!(wrapped.len(), 1);
        assert_eq!(wrapped[0].description, "Find");

        let bare = parse_tool_list(json!([
            {"type": "function", "function": {"name": "weather", "description": "Forecast",
                "parameters": {"type": "object", "required": ["city"]}}},
            {"description": "nameless"},
            {"name": "time"}
        ]));
        let names: Vec<_> = bare.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["weather", "time"]);
        assert_eq!(bare[0].input_schema["required"][0], "city");
    }

    #[test]
    fn call_response_shapes() {
        assert_eq!(call_response_text("plain words").unwrap(), "plain words");
        assert_eq!(call_response_text(r#""quoted""#).unwrap(), "quoted");
        assert_eq!(call_response_text(r#"{"temp":21}"#).unwrap(), r#"{"temp":21}"#);
        assert_eq!(
            call_response_text(r#"{"content":[{"type":"text","text":"sunny"}]}"#).unwrap(),
            "sunny"
        );
        assert!(matches!(
            call_response_text(r#"{"content":[{"type":"text","text":"nope"}],"isError":true}"#),
            Err(McpError::ToolFailed(msg)) if msg == "nope"
        ));
        assert!(matches!(
            call_response_text(r#"{"error":"bad city"}"#),
            Err(McpError::ToolFailed(_))
        ));
    }

    #[test]
    fn missing_url_is_a_config_error() {
        let config: McpServerConfig =
            serde_json::from_value(json!({"id": "web", "transport": "http"})).unwrap();
        assert!(matches!(HttpServer::new(&config), Err(McpError::Config(_))));
    }
}
