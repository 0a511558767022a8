//! Moderation tools every agent registers.
//!
//! `block_user` and `ban_user` only queue a [`PendingOp`]; the block list
//! changes when the host settles the queue after the turn.

use std::sync::Arc;

use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

use kh_domain::config::AgentConfig;
use kh_domain::tool::ToolDefinition;
use kh_tools::{parse_args, Tool, ToolError, ToolManager};

use crate::blocklist::{duration_from_secs, BlockList};
use crate::fetch::FetchTool;
use crate::ops::{DeferredOperationQueue, PendingOp};

pub const BLOCK_USER: &str = "block_user";
pub const LIST_BLOCKED_USERS: &str = "list_blocked_users";
pub const BAN_USER: &str = "ban_user";

/// Register the built-in tools on `tools`. `ban_user` and `fetch` start
/// disabled unless their config switches are set.
pub fn register_builtin_tools(
    tools: &ToolManager,
    blocks: Arc<BlockList>,
    queue: Arc<DeferredOperationQueue>,
    config: &AgentConfig,
) {
    tools.register(
        Arc::new(BlockUserTool {
            queue: Arc::clone(&queue),
            default_secs: config.block_default_secs,
        }),
        None,
        true,
    );
    tools.register(Arc::new(ListBlockedTool { blocks }), None, true);
    tools.register(
        Arc::new(BanUserTool {
            queue,
            default_secs: config.block_default_secs,
        }),
        None,
        config.enable_ban_tool,
    );
    match FetchTool::new() {
        Ok(fetch) => tools.register(Arc::new(fetch), None, config.enable_fetch_tool),
        Err(e) => tracing::warn!(error = %e, "fetch tool unavailable"),
    }
}

// ── Arguments ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TargetArgs {
    #[serde(deserialize_with = "string_or_number")]
    user_id: String,
    #[serde(default)]
    duration: Option<f64>,
}

/// Models send ids both as `"42"` and `42`.
fn string_or_number<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    match Value::deserialize(de)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a user id, got {other}"
        ))),
    }
}

fn target_schema(what: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "user_id": {"type": "string", "description": format!("Id of the user to {what}")},
            "duration": {
                "type": "number",
                "description": format!("How long to {what} them, in seconds. 0 lifts it.")
            }
        },
        "required": ["user_id", "duration"]
    })
}

fn describe(secs: f64) -> String {
    if secs == 0.0 {
        "lifted".into()
    } else {
        format!("{secs:.0} s")
    }
}

// ── block_user ───────────────────────────────────────────────────────

pub struct BlockUserTool {
    queue: Arc<DeferredOperationQueue>,
    default_secs: f64,
}

#[async_trait::async_trait]
impl Tool for BlockUserTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: BLOCK_USER.into(),
            description: "Stop seeing a user's messages for a while. They can still post; \
                          you just won't read them."
                .into(),
            parameters: target_schema("block"),
        }
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: TargetArgs = parse_args(args)?;
        let duration = duration_from_secs(args.duration, self.default_secs);
        self.queue.push(PendingOp::Block {
            user_id: args.user_id.clone(),
            duration,
        });
        Ok(format!(
            "block on user {}: {} (applied after this reply)",
            args.user_id,
            describe(duration.as_secs_f64())
        ))
    }
}

// ── list_blocked_users ───────────────────────────────────────────────

pub struct ListBlockedTool {
    blocks: Arc<BlockList>,
}

#[async_trait::async_trait]
impl Tool for ListBlockedTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: LIST_BLOCKED_USERS.into(),
            description: "List the users you are currently ignoring.".into(),
            parameters: json!({"type": "object", "properties": {}, "required": []}),
        }
    }

    async fn execute(&self, _args: Value) -> Result<String, ToolError> {
        let blocked = self.blocks.list();
        if blocked.is_empty() {
            return Ok("no users are blocked".into());
        }
        let lines: Vec<String> = blocked
            .iter()
            .map(|(user, left)| format!("{user} ({:.1} s left)", left.as_secs_f64()))
            .collect();
        Ok(format!("blocked users:\n{}", lines.join("\n")))
    }
}

// ── ban_user ─────────────────────────────────────────────────────────

pub struct BanUserTool {
    queue: Arc<DeferredOperationQueue>,
    default_secs: f64,
}

#[async_trait::async_trait]
impl Tool for BanUserTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: BAN_USER.into(),
            description: "Mute a user in the group for a while. Use only against spam or abuse."
                .into(),
            parameters: target_schema("mute"),
        }
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: TargetArgs = parse_args(args)?;
        let duration = duration_from_secs(args.duration, self.default_secs);
        self.queue.push(PendingOp::Ban {
            user_id: args.user_id.clone(),
            duration,
        });
        Ok(format!(
            "mute on user {}: {} (applied after this reply)",
            args.user_id,
            describe(duration.as_secs_f64())
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn setup(enable_ban: bool) -> (ToolManager, Arc<BlockList>, Arc<DeferredOperationQueue>) {
        let tools = ToolManager::new();
        let blocks = Arc::new(BlockList::new());
        let queue = Arc::new(DeferredOperationQueue::new());
        let config = AgentConfig {
            enable_ban_tool: enable_ban,
            ..Default::default()
        };
        register_builtin_tools(&tools, Arc::clone(&blocks), Arc::clone(&queue), &config);
        (tools, blocks, queue)
    }

    #[tokio::test]
    async fn block_user_only_queues() {
        let (tools, blocks, queue) = setup(false);
        let out = tools
            .execute(BLOCK_USER, json!({"user_id": 42, "duration": 60}))
            .await
            .unwrap();
        assert_eq!(out, "block on user 42: 60 s (applied after this reply)");
        assert!(blocks.is_empty());
        assert_eq!(
            queue.drain(),
            vec![PendingOp::Block {
                user_id: "42".into(),
                duration: Duration::from_secs(60)
            }]
        );
    }

    #[tokio::test]
    async fn missing_duration_uses_default() {
        let (tools, _, queue) = setup(false);
        tools
            .execute(BLOCK_USER, json!({"user_id": "7"}))
            .await
            .unwrap();
        assert_eq!(queue.drain()[0].duration(), Duration::from_secs(150));
    }

    #[tokio::test]
    async fn bad_arguments_are_tool_errors() {
        let (tools, _, queue) = setup(false);
        let err = tools
            .execute(BLOCK_USER, json!({"user_id": ["x"]}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn list_reads_live_block_list() {
        let (tools, blocks, _) = setup(false);
        assert_eq!(tools.execute(LIST_BLOCKED_USERS, json!({})).await.unwrap(), "no users are blocked");
        blocks.block("99", Duration::from_secs(3600));
        let out = tools.execute(LIST_BLOCKED_USERS, json!({})).await.unwrap();
        assert!(out.starts_with("blocked users:\n99 ("));
    }

    #[tokio::test]
    async fn fetch_is_registered_but_off_by_default() {
        let (tools, _, _) = setup(false);
        assert!(tools.contains(crate::fetch::FETCH));
        assert!(!tools.is_enabled(crate::fetch::FETCH));
        assert!(tools.schema_list().iter().all(|d| d.name != crate::fetch::FETCH));
    }

    #[tokio::test]
    async fn ban_is_disabled_unless_configured() {
        let (tools, _, queue) = setup(false);
        assert!(!tools.is_enabled(BAN_USER));
        let out = tools
            .execute(BAN_USER, json!({"user_id": "1", "duration": 10}))
            .await
            .unwrap();
        assert_eq!(out, "ban_user unavailable");
        assert!(queue.is_empty());

        let (tools, _, queue) = setup(true);
        tools
            .execute(BAN_USER, json!({"user_id": "1", "duration": 0}))
            .await
            .unwrap();
        assert_eq!(
            queue.drain(),
            vec![PendingOp::Ban {
                user_id: "1".into(),
                duration: Duration::ZERO
            }]
        );
    }
}
