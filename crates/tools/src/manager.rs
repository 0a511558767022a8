//! Ordered tool registry.
//!
//! Registration order is preserved so the schema list handed to the model
//! is stable between turns. The registry sits behind a `parking_lot`
//! lock; the lock is never held across a tool's `execute`.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::OnceCell;

use kh_domain::tool::ToolDefinition;
use kh_domain::trace::TraceEvent;

use crate::remote::{RemoteTool, ToolDiscovery};
use crate::tool::{Tool, ToolError};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Entry {
    name: String,
    tool: Arc<dyn Tool>,
    enabled: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ToolManager {
    entries: RwLock<Vec<Entry>>,
    discovery: Option<Arc<dyn ToolDiscovery>>,
    /// Number of remote tools registered; set once, even on failure.
    discovered: OnceCell<usize>,
}

impl Default for ToolManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolManager {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            discovery: None,
            discovered: OnceCell::new(),
        }
    }

    /// Attach a remote tool source, consulted by [`Self::ensure_remote_tools`].
    pub fn with_discovery(mut self, discovery: Arc<dyn ToolDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Register `tool` under `name` (its own definition name when `None`).
    /// Re-registering a name replaces the previous tool in place.
    pub fn register(&self, tool: Arc<dyn Tool>, name: Option<&str>, default_enabled: bool) {
        let name = name
            .map(str::to_owned)
            .unwrap_or_else(|| tool.definition().name);
        let mut entries = self.entries.write();
        if let Some(existing) = entries.iter_mut().find(|e| e.name == name) {
            tracing::warn!(tool = %name, "replacing registered tool");
            existing.tool = tool;
            existing.enabled = default_enabled;
            return;
        }
        entries.push(Entry {
            name,
            tool,
            enabled: default_enabled,
        });
    }

    pub fn enable(&self, name: &str) -> bool {
        self.set_enabled(name, true)
    }

    pub fn disable(&self, name: &str) -> bool {
        self.set_enabled(name, false)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => {
                tracing::warn!(tool = %name, enabled, "toggling unknown tool");
                false
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().iter().any(|e| e.name == name)
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.entries
            .read()
            .iter()
            .any(|e| e.name == name && e.enabled)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.read().iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Definitions of the enabled tools, in registration order. Each
    /// definition carries the name the tool was registered under.
    pub fn schema_list(&self) -> Vec<ToolDefinition> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.enabled)
            .map(|e| {
                let mut def = e.tool.definition();
                def.name = e.name.clone();
                def
            })
            .collect()
    }

    /// One `- name: description` line per enabled tool.
    pub fn summary(&self) -> String {
        self.schema_list()
            .iter()
            .map(|d| format!("- {}: {}", d.name, d.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Run a tool. Unknown or disabled names answer with a plain
    /// `"<name> unavailable"` result; the tool's own errors are returned
    /// to the caller untouched.
    pub async fn execute(&self, name: &str, args: Value) -> Result<String, ToolError> {
        let tool = {
            let entries = self.entries.read();
            entries
                .iter()
                .find(|e| e.name == name && e.enabled)
                .map(|e| Arc::clone(&e.tool))
        };
        match tool {
            Some(tool) => tool.execute(args).await,
            None => Ok(format!("{name} unavailable")),
        }
    }

    // ── Remote discovery ──────────────────────────────────────────────

    /// Register the remote tools once per manager lifetime. Discovery
    /// failures count as "no remote tools" and are not retried. Names
    /// already registered locally win. Returns the number registered.
    pub async fn ensure_remote_tools(&self) -> usize {
        let Some(discovery) = self.discovery.clone() else {
            return 0;
        };
        *self
            .discovered
            .get_or_init(|| async move {
                let defs = match discovery.list().await {
                    Ok(defs) => defs,
                    Err(e) => {
                        tracing::warn!(error = %e, "remote tool discovery failed");
                        return 0;
                    }
                };
                let mut count = 0;
                for def in defs {
                    if self.contains(&def.name) {
                        tracing::debug!(tool = %def.name, "remote tool shadowed by local tool");
                        continue;
                    }
                    let name = def.name.clone();
                    self.register(
                        Arc::new(RemoteTool::new(def, Arc::clone(&discovery))),
                        Some(name.as_str()),
                        true,
                    );
                    count += 1;
                }
                TraceEvent::RemoteToolsDiscovered { count }.emit();
                count
            })
            .await
    }
}
