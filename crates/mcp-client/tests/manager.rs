use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use kh_domain::config::McpConfig;
use kh_mcp_client::{McpError, McpManager, McpToolDef, ToolServer};
use kh_tools::{ToolDiscovery, ToolManager};

struct FakeServer {
    id: &'static str,
    tools: Vec<&'static str>,
    fail_listing: bool,
}

#[async_trait]
impl ToolServer for FakeServer {
    fn id(&self) -> &str {
        self.id
    }

    async fn list_tools(&self) -> Result<Vec<McpToolDef>, McpError> {
        if self.fail_listing {
            return Err(McpError::Protocol("listing broke".into()));
        }
        Ok(self
            .tools
            .iter()
            .map(|name| McpToolDef {
                name: name.to_string(),
                description: format!("{name} from {}", self.id),
                input_schema: json!({"type": "object"}),
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, McpError> {
        Ok(format!("{}/{name}({arguments})", self.id))
    }

    async fn shutdown(&self) {}
}

fn fake(id: &'static str, tools: Vec<&'static str>, fail_listing: bool) -> Arc<dyn ToolServer> {
    Arc::new(FakeServer { id, tools, fail_listing })
}

#[tokio::test]
async fn duplicate_names_keep_first_server() {
    let manager = McpManager::with_servers(vec![
        fake("a", vec!["search", "fetch"], false),
        fake("b", vec!["search", "weather"], false),
    ]);

    let defs = manager.list().await.unwrap();
    let names: Vec<_> = defs.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["search", "fetch", "weather"]);
    assert_eq!(defs[0].description, "search from a");

    assert_eq!(manager.call("search", json!({})).await.unwrap(), "a/search({})");
    assert_eq!(manager.call("weather", json!({"city": "Oslo"})).await.unwrap(), r#"b/weather({"city":"Oslo"})"#);
}

#[tokio::test]
async fn failing_server_is_skipped() {
    let manager = McpManager::with_servers(vec![
        fake("broken", vec!["x"], true),
        fake("ok", vec!["y"], false),
    ]);
    let defs = manager.list().await.unwrap();
    assert_eq!(defs.len(), 1);
    assert_eq!(defs[0].name, "y");
}

#[tokio::test]
async fn unknown_tool_is_an_error() {
    let manager = McpManager::with_servers(vec![fake("a", vec!["x"], false)]);
    manager.list().await.unwrap();
    let err = manager.call("nope", json!({})).await.unwrap_err();
    assert!(err.to_string().contains("nope"));
}

#[tokio::test]
async fn unreachable_servers_yield_no_tools() {
    let config: McpConfig = serde_json::from_value(json!({
        "servers": [
            {"id": "missing-binary", "command": "/definitely/not/a/real/mcp-server"},
            {"id": "no-url", "transport": "http"}
        ]
    }))
    .unwrap();
    let manager = Arc::new(McpManager::new(&config));
    let tools = ToolManager::new().with_discovery(manager);
    assert_eq!(tools.ensure_remote_tools().await, 0);
    assert!(tools.is_empty());
}

// ── HTTP transport against a canned local server ─────────────────────

/// Serve `responses` in order, one connection each, and return the raw
/// requests seen.
async fn canned_http(responses: Vec<&'static str>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let mut seen = Vec::new();
        for body in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let len = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if buf.len() >= head_end + 4 + len || n == 0 {
                        seen.push(text);
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let reply = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        }
        seen
    });
    (format!("http://{addr}"), handle)
}

#[tokio::test]
async fn http_server_lists_and_calls() {
    let (url, server) = canned_http(vec![
        r#"{"tools":[{"name":"weather","description":"Forecast","parameters":{"type":"object"}}]}"#,
        r#"{"content":[{"type":"text","text":"sunny"}]}"#,
    ])
    .await;

    for var in ["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"] {
        std::env::remove_var(var);
    }
    std::env::set_var("KH_TEST_MCP_TOKEN", "s3cret");
    let config: McpConfig = serde_json::from_value(json!({
        "servers": [{
            "id": "web",
            "transport": "http",
            "url": format!("{url}/"),
            "auth_header": "X-Token",
            "auth_value_env": "KH_TEST_MCP_TOKEN"
        }]
    }))
    .unwrap();

    let manager = McpManager::new(&config);
    let defs = manager.list().await.unwrap();
    assert_eq!(defs.len(), 1);
    assert_eq!(defs[0].name, "weather");

    let out = manager.call("weather", json!({"city": "Oslo"})).await.unwrap();
    assert_eq!(out, "sunny");

    let requests = server.await.unwrap();
    assert!(requests[0].starts_with("GET /tools "));
    assert!(requests[0].to_ascii_lowercase().contains("x-token: s3cret"));
    assert!(requests[1].starts_with("POST /call "));
    assert!(requests[1].contains(r#""name":"weather""#));
}
