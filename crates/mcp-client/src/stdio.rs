//! MCP over a child process's stdin/stdout.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

use kh_domain::config::McpServerConfig;

use crate::manager::{McpError, ToolServer};
use crate::protocol::{self, CallResult, Inbound, McpToolDef, Outbound, ToolsList};

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
/// Non-JSON stdout lines tolerated per response before giving up.
const MAX_NOISE_LINES: usize = 1000;

/// Both pipe ends live under one lock so a request and its response are
/// never interleaved with another caller's.
struct Pipe {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

pub struct StdioServer {
    id: String,
    pipe: Mutex<Pipe>,
    child: Mutex<Child>,
    next_id: AtomicU64,
    alive: AtomicBool,
}

impl StdioServer {
    /// Spawn the server process and run the MCP handshake.
    pub async fn connect(config: &McpServerConfig) -> Result<Self, McpError> {
        if config.command.is_empty() {
            return Err(McpError::Config(format!("server {} has no command", config.id)));
        }
        let mut child = tokio::process::Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(McpError::Protocol("child pipes unavailable".into()));
        };

        let server = Self {
            id: config.id.clone(),
            pipe: Mutex::new(Pipe {
                stdin,
                stdout: BufReader::new(stdout),
            }),
            child: Mutex::new(child),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
        };

        server
            .request("initialize", Some(protocol::initialize_params()))
            .await?;
        server.notify("notifications/initialized").await?;
        tracing::debug!(server_id = %server.id, "MCP stdio handshake complete");
        Ok(server)
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(McpError::ServerDown(self.id.clone()));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = serde_json::to_string(&Outbound::request(id, method, params))?;

        let mut pipe = self.pipe.lock().await;
        write_line(&mut pipe.stdin, &line).await?;
        tracing::debug!(server_id = %self.id, id, method, "sent MCP request");

        let reply = tokio::time::timeout(RESPONSE_TIMEOUT, self.read_reply(&mut *pipe, id))
            .await
            .map_err(|_| McpError::Timeout(format!("{} {method}", self.id)))??;
        Ok(reply.into_result()?)
    }

    async fn notify(&self, method: &str) -> Result<(), McpError> {
        let line = serde_json::to_string(&Outbound::notification(method))?;
        let mut pipe = self.pipe.lock().await;
        write_line(&mut pipe.stdin, &line).await
    }

    /// Read until the response for `id`, skipping server notifications,
    /// replies to other ids and log noise.
    async fn read_reply(&self, pipe: &mut Pipe, id: u64) -> Result<Inbound, McpError> {
        let mut noise = 0usize;
        loop {
            let mut line = String::new();
            if pipe.stdout.read_line(&mut line).await? == 0 {
                self.alive.store(false, Ordering::SeqCst);
                return Err(McpError::ServerDown(self.id.clone()));
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Inbound>(trimmed) {
                Ok(msg) if msg.id == Some(id) => return Ok(msg),
                Ok(_) => tracing::debug!(server_id = %self.id, "skipping unrelated MCP message"),
                Err(_) => {
                    noise += 1;
                    if noise >= MAX_NOISE_LINES {
                        self.alive.store(false, Ordering::SeqCst);
                        return Err(McpError::Protocol(format!(
                            "{} writes too much non-JSON output",
                            self.id
                        )));
                    }
                }
            }
        }
    }
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> Result<(), McpError> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await?;
    Ok(())
}

#[async_trait]
impl ToolServer for StdioServer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn list_tools(&self) -> Result<Vec<McpToolDef>, McpError> {
        let result = self.request("tools/list", None).await?;
        let list: ToolsList = serde_json::from_value(result)?;
        Ok(list.tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, McpError> {
        let result = self
            .request("tools/call", Some(json!({ "name": name, "arguments": arguments })))
            .await?;
        let result: CallResult = serde_json::from_value(result)?;
        let text = result.flatten();
        if result.is_error {
            return Err(McpError::ToolFailed(text));
        }
        Ok(text)
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        {
            let mut pipe = self.pipe.lock().await;
            if let Err(e) = pipe.stdin.shutdown().await {
                tracing::debug!(server_id = %self.id, error = %e, "closing MCP stdin");
            }
        }
        let mut child = self.child.lock().await;
        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(server_id = %self.id, ?status, "MCP server exited"),
            Ok(Err(e)) => tracing::warn!(server_id = %self.id, error = %e, "waiting for MCP server"),
            Err(_) => {
                tracing::warn!(server_id = %self.id, "MCP server ignored shutdown, killing");
                if let Err(e) = child.kill().await {
                    tracing::warn!(server_id = %self.id, error = %e, "failed to kill MCP server");
                }
            }
        }
    }
}
