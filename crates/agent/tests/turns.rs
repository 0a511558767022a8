//! Turn loop behaviour against a scripted completion service.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};

use kh_agent::{Admission, AgentDeps, AgentError, ConversationAgent, InboundMessage, PendingOp, TurnEvent};
use kh_codec::Segment;
use kh_domain::config::{AgentConfig, Config};
use kh_domain::tool::{Role, ToolCall, ToolDefinition};
use kh_domain::usage::Usage;
use kh_domain::Error;
use kh_providers::{ChatRequest, ChatResponse, CompletionService, PlainSummarizer};
use kh_tools::{Tool, ToolError};

// ── Stub service ─────────────────────────────────────────────────────

type Reply = Box<dyn Fn(usize) -> kh_domain::Result<ChatResponse> + Send + Sync>;

struct Scripted {
    queue: Mutex<VecDeque<kh_domain::Result<ChatResponse>>>,
    /// Used once the queue is empty; receives the call index.
    fallback: Option<Reply>,
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
}

impl Scripted {
    fn new(replies: Vec<kh_domain::Result<ChatResponse>>) -> Self {
        Self {
            queue: Mutex::new(replies.into()),
            fallback: None,
            gate: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn with_fallback(mut self, f: Reply) -> Self {
        self.fallback = Some(f);
        self
    }

    fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionService for Scripted {
    async fn chat(&self, req: &ChatRequest) -> kh_domain::Result<ChatResponse> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(req.clone());
        if let Some(next) = self.queue.lock().pop_front() {
            return next;
        }
        match &self.fallback {
            Some(f) => f(n),
            None => Ok(text("[NULL]")),
        }
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "stub-model"
    }
}

fn text(content: &str) -> ChatResponse {
    ChatResponse {
        content: content.into(),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 2,
            total_tokens: 12,
        }),
        model: "stub-model".into(),
        ..Default::default()
    }
}

fn calling(calls: &[(&str, &str, Value)]) -> ChatResponse {
    ChatResponse {
        tool_calls: calls
            .iter()
            .map(|(id, name, args)| ToolCall {
                call_id: (*id).into(),
                tool_name: (*name).into(),
                arguments: args.clone(),
            })
            .collect(),
        finish_reason: Some("tool_calls".into()),
        ..text("")
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn agent_with(service: Arc<Scripted>, agent: AgentConfig) -> Arc<ConversationAgent> {
    let config = Config {
        agent,
        ..Default::default()
    };
    ConversationAgent::new("group-1", Arc::new(config), AgentDeps::new(service))
}

fn agent(service: Arc<Scripted>) -> Arc<ConversationAgent> {
    agent_with(service, AgentConfig::default())
}

fn msg(id: &str, name: &str, uid: &str, body: &str) -> InboundMessage {
    InboundMessage::new(id, name, uid, vec![Segment::text(body)])
}

async fn collect(mut rx: mpsc::Receiver<TurnEvent>) -> Vec<TurnEvent> {
    let mut events = Vec::new();
    while let Some(ev) = rx.recv().await {
        events.push(ev);
    }
    events
}

fn replies(events: &[TurnEvent]) -> Vec<String> {
    events
        .iter()
        .filter(|e| matches!(e, TurnEvent::Reply { .. }))
        .filter_map(TurnEvent::plain_text)
        .collect()
}

fn tool_results(events: &[TurnEvent]) -> Vec<(String, bool)> {
    events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::ToolResult {
                content, is_error, ..
            } => Some((content.clone(), *is_error)),
            _ => None,
        })
        .collect()
}

// ── Plain replies ────────────────────────────────────────────────────

#[tokio::test]
async fn answers_a_question() {
    let service = Arc::new(Scripted::new(vec![Ok(text("4"))]));
    let agent = agent(Arc::clone(&service));

    let admitted = agent.add_message(msg("m1", "Alice", "1", "2+2?")).await;
    assert!(matches!(admitted, Admission::Recorded(_)));
    assert_eq!(agent.record_count(), 1);

    let events = collect(agent.say().await.unwrap()).await;
    assert_eq!(replies(&events), vec!["4"]);
    assert!(events.contains(&TurnEvent::Reply { xml: "<p>4</p>".into() }));
    assert_eq!(agent.record_count(), 2);
    assert!(!agent.has_pending_ops());
    assert!(agent.is_cooling_down());

    let expected = 1.0 - (10.0 * 10.0 + 2.0 * 30.0) / 1_000_000.0;
    assert!((agent.credit() - expected).abs() < 1e-12);

    let requests = service.requests.lock();
    assert_eq!(requests.len(), 1);
    // block_user and list_blocked_users; ban_user and fetch are off by default.
    assert_eq!(requests[0].tools.len(), 2);
    assert!(requests[0].messages[0]
        .content
        .text()
        .unwrap_or_default()
        .contains("- block_user:"));
}

#[tokio::test]
async fn silence_marker_records_nothing() {
    let service = Arc::new(Scripted::new(vec![Ok(text("[NULL]"))]));
    let agent = agent(service);
    agent.add_message(msg("m1", "Alice", "1", "hmm")).await;

    let events = collect(agent.say().await.unwrap()).await;
    assert!(replies(&events).is_empty());
    assert!(matches!(events.as_slice(), [TurnEvent::Usage { .. }]));
    assert_eq!(agent.record_count(), 1);
}

#[tokio::test]
async fn missing_usage_charges_the_fallback() {
    let service = Arc::new(Scripted::new(vec![Ok(ChatResponse {
        usage: None,
        ..text("ok")
    })]));
    let agent = agent(service);
    collect(agent.say().await.unwrap()).await;
    assert!((agent.credit() - 0.99).abs() < 1e-12);
}

// ── Tools ────────────────────────────────────────────────────────────

#[tokio::test]
async fn tool_rounds_are_bounded() {
    let service = Arc::new(Scripted::new(vec![]).with_fallback(Box::new(|n: usize| {
        let id = format!("call_{n}");
        Ok(calling(&[(id.as_str(), "list_blocked_users", json!({}))]))
    })));
    let agent = agent(Arc::clone(&service));
    agent.add_message(msg("m1", "Alice", "1", "loop forever")).await;

    let events = collect(agent.say().await.unwrap()).await;

    assert_eq!(service.calls(), 6);
    let results = tool_results(&events);
    assert_eq!(results.len(), 5);
    assert!(results
        .iter()
        .all(|(content, failed)| content == "no users are blocked" && !failed));

    let notices: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, TurnEvent::Notice { .. }))
        .collect();
    assert_eq!(notices.len(), 1);

    let requests = service.requests.lock();
    assert!(requests[..5].iter().all(|r| !r.tools.is_empty()));
    assert!(requests[5].tools.is_empty());

    let records = agent.records();
    assert!(records
        .iter()
        .any(|seg| seg.speaker_name == "ListBlockedUsersTool" && seg.speaker_id == "10001"));
    assert_eq!(records.last().map(|s| s.speaker_id.as_str()), Some("10002"));
}

struct Exploding;

#[async_trait]
impl Tool for Exploding {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "explode".into(),
            description: "Always panics.".into(),
            parameters: json!({"type": "object", "properties": {}}),
        }
    }

    async fn execute(&self, _args: Value) -> Result<String, ToolError> {
        panic!("boom");
    }
}

#[tokio::test]
async fn failing_tools_do_not_end_the_turn() {
    let service = Arc::new(Scripted::new(vec![
        Ok(calling(&[
            ("c1", "explode", json!({})),
            ("c2", "block_user", json!({"user_id": ["nope"]})),
            ("c3", "list_blocked_users", json!({})),
        ])),
        Ok(text("still here")),
    ]));
    let agent = agent(Arc::clone(&service));
    agent.tools().register(Arc::new(Exploding), None, true);
    agent.add_message(msg("m1", "Alice", "1", "try it")).await;

    let events = collect(agent.say().await.unwrap()).await;

    let mut results = tool_results(&events);
    results.sort();
    assert_eq!(results.len(), 3);
    assert_eq!(results.iter().filter(|(_, failed)| *failed).count(), 2);
    assert!(results
        .iter()
        .filter(|(_, failed)| *failed)
        .all(|(content, _)| content.starts_with("tool call failed: ")));
    assert_eq!(replies(&events), vec!["still here"]);
    assert_eq!(service.calls(), 2);
}

#[tokio::test]
async fn tool_calls_are_announced_before_results() {
    let service = Arc::new(Scripted::new(vec![
        Ok(calling(&[("c1", "list_blocked_users", json!({}))])),
        Ok(text("done")),
    ]));
    let agent = agent(service);
    let events = collect(agent.say().await.unwrap()).await;

    let call_at = events
        .iter()
        .position(|e| matches!(e, TurnEvent::ToolCall { call_id, .. } if call_id == "c1"));
    let result_at = events
        .iter()
        .position(|e| matches!(e, TurnEvent::ToolResult { call_id, .. } if call_id == "c1"));
    assert!(call_at.unwrap() < result_at.unwrap());
}

/// Blocks until released; reports when it has started.
struct Slow {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl Tool for Slow {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "slow".into(),
            description: "Takes its time.".into(),
            parameters: json!({"type": "object", "properties": {}}),
        }
    }

    async fn execute(&self, _args: Value) -> Result<String, ToolError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok("finally".into())
    }
}

#[tokio::test]
async fn messages_during_a_tool_call_keep_the_call_paired() {
    let service = Arc::new(Scripted::new(vec![
        Ok(calling(&[("c1", "slow", json!({}))])),
        Ok(text("sorry, that took a while")),
    ]));
    let agent = agent(Arc::clone(&service));
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    agent.tools().register(
        Arc::new(Slow {
            started: Arc::clone(&started),
            release: Arc::clone(&release),
        }),
        None,
        true,
    );
    agent.add_message(msg("m1", "Alice", "1", "do the slow thing")).await;

    let rx = agent.say().await.unwrap();
    started.notified().await;
    let admitted = agent.add_message(msg("m2", "Bob", "2", "anyone there?")).await;
    assert!(matches!(admitted, Admission::Recorded(_)));
    release.notify_one();

    let events = collect(rx).await;
    assert_eq!(replies(&events), vec!["sorry, that took a while"]);
    assert!(!events.iter().any(|e| matches!(e, TurnEvent::Failed { .. })));

    let requests = service.requests.lock();
    assert_eq!(requests.len(), 2);
    let roles: Vec<Role> = requests[1].messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::User]
    );
    assert!(requests[1].messages[4]
        .content
        .text()
        .unwrap_or_default()
        .contains("anyone there?"));
}

// ── Failures and locking ─────────────────────────────────────────────

#[tokio::test]
async fn failed_call_resets_history() {
    let err = Error::Timeout("deadline".into());
    let expected = PlainSummarizer::describe(&err);
    let service = Arc::new(Scripted::new(vec![Err(err)]));
    let agent = agent(service);
    agent.add_message(msg("m1", "Alice", "1", "hello")).await;

    let events = collect(agent.say().await.unwrap()).await;
    assert_eq!(events, vec![TurnEvent::Failed { message: expected }]);
    assert_eq!(agent.record_count(), 0);
    assert!(!agent.is_cooling_down());
}

#[tokio::test]
async fn second_turn_is_refused_while_busy() {
    let gate = Arc::new(Notify::new());
    let service = Arc::new(Scripted::new(vec![Ok(text("first"))]).gated(Arc::clone(&gate)));
    let agent = agent(service);

    let rx = agent.try_say().unwrap();
    assert!(agent.is_busy());
    assert!(matches!(agent.try_say(), Err(AgentError::Busy)));

    gate.notify_one();
    let events = collect(rx).await;
    assert_eq!(replies(&events), vec!["first"]);

    gate.notify_one();
    let again = agent.try_say().expect("lock released after the turn");
    collect(again).await;
}

#[tokio::test]
async fn exhausted_credit_stops_everything() {
    let service = Arc::new(Scripted::new(vec![Ok(ChatResponse {
        usage: Some(Usage {
            prompt_tokens: 1_000_000,
            completion_tokens: 0,
            total_tokens: 1_000_000,
        }),
        ..text("expensive")
    })]));
    let agent = agent(service);
    collect(agent.say().await.unwrap()).await;

    assert!(agent.credit() < 0.0);
    assert!(matches!(agent.say().await, Err(AgentError::OutOfCredit)));
    assert!(matches!(agent.try_say(), Err(AgentError::OutOfCredit)));
    assert_eq!(
        agent.add_message(msg("m2", "Alice", "1", "hi")).await,
        Admission::OutOfCredit
    );
}

// ── Deferred operations ──────────────────────────────────────────────

#[tokio::test]
async fn moderation_is_applied_after_the_turn() {
    let service = Arc::new(Scripted::new(vec![
        Ok(calling(&[
            ("c1", "block_user", json!({"user_id": "7", "duration": 60})),
            ("c2", "ban_user", json!({"user_id": 8, "duration": 600})),
        ])),
        Ok(calling(&[(
            "c3",
            "block_user",
            json!({"user_id": "7", "duration": 3600}),
        )])),
        Ok(text("bye")),
    ]));
    let agent = agent_with(
        service,
        AgentConfig {
            enable_ban_tool: true,
            ..Default::default()
        },
    );
    agent.add_message(msg("m1", "Mallory", "7", "spam")).await;

    let events = collect(agent.say().await.unwrap()).await;
    assert_eq!(replies(&events), vec!["bye"]);
    assert!(agent.has_pending_ops());
    assert!(agent.block_list().is_empty());

    let bans = agent.settle_pending_ops();
    assert_eq!(
        bans,
        vec![PendingOp::Ban {
            user_id: "8".into(),
            duration: Duration::from_secs(600)
        }]
    );
    assert!(!agent.has_pending_ops());

    let blocked = agent.block_list().list();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].0, "7");
    assert!(blocked[0].1 > Duration::from_secs(3000));

    assert_eq!(
        agent.add_message(msg("m2", "Mallory", "7", "more spam")).await,
        Admission::Blocked
    );
}

// ── Records ──────────────────────────────────────────────────────────

#[tokio::test]
async fn reserved_speaker_ids_are_rejected() {
    let agent = agent(Arc::new(Scripted::new(vec![])));
    for uid in ["10001", "10002"] {
        assert_eq!(
            agent.add_message(msg("m1", "Impostor", uid, "trust me")).await,
            Admission::Reserved
        );
    }
    assert_eq!(agent.record_count(), 0);
}

#[tokio::test]
async fn replies_link_to_recorded_messages() {
    let agent = agent(Arc::new(Scripted::new(vec![])));
    let Admission::Recorded(first) = agent.add_message(msg("m1", "Alice", "1", "question")).await
    else {
        panic!("not recorded");
    };
    let reply = InboundMessage::new(
        "m2",
        "Bob",
        "2",
        vec![Segment::reply("m1"), Segment::text("answer")],
    );
    let Admission::Recorded(second) = agent.add_message(reply).await else {
        panic!("not recorded");
    };

    let records = agent.records();
    assert_eq!(records.get(second).and_then(|s| s.reply_to), Some(first));

    assert!(agent.recall("m1"));
    assert!(!agent.recall("m1"));
    assert!(!agent.recall_from("m2", "1"));
}

#[tokio::test]
async fn remake_clears_history_and_blocks() {
    let agent = agent(Arc::new(Scripted::new(vec![])));
    agent.add_message(msg("m1", "Alice", "1", "hi")).await;
    agent.block_list().block("3", Duration::from_secs(60));

    agent.remake("test");
    assert_eq!(agent.record_count(), 0);
    assert!(!agent.block_list().is_blocked("3"));
    assert!((agent.credit() - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn records_survive_a_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.json");

    let agent = agent(Arc::new(Scripted::new(vec![])));
    agent.add_message(msg("m1", "Alice", "1", "keep me")).await;
    agent.save_records(&path).unwrap();

    let fresh = agent_with(Arc::new(Scripted::new(vec![])), AgentConfig::default());
    fresh.load_records(&path).unwrap();
    assert_eq!(fresh.record_count(), 1);
    assert!(fresh.recall("m1"));
}
