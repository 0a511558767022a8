//! Per-group conversation agent and its turn loop.
//!
//! One turn: project the record list into chat turns, call the model,
//! record and yield its content, run its tool calls concurrently, record
//! the results, and call again until the model answers without tools or
//! the tool budget runs out. A failed model call resets the history.
//!
//! Entry points: [`ConversationAgent::say`] / [`ConversationAgent::try_say`]
//! spawn the loop and return a channel of [`TurnEvent`]s.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, OwnedMutexGuard};
use tracing::Instrument;

use kh_codec::{DecodeOptions, EncodeContext, FaceTable, ImageStore, PassthroughImageStore, Segment};
use kh_domain::config::{Config, ModelPricing};
use kh_domain::speaker::{is_reserved, NOTICE_SPEAKER_ID, TOOL_SPEAKER_ID};
use kh_domain::tool::{Message, ToolCall};
use kh_domain::trace::TraceEvent;
use kh_providers::{ChatRequest, ChatResponse, CompletionService, ErrorSummarizer, PlainSummarizer};
use kh_records::{RecordList, RecordSeg, SegId, CONTENT_FRAGMENT, TOOL_CALLS_FRAGMENT};
use kh_tools::{ToolDiscovery, ToolManager};

use crate::blocklist::BlockList;
use crate::builtin::register_builtin_tools;
use crate::error::AgentError;
use crate::ops::{DeferredOperationQueue, PendingOp};
use crate::prompt::{build_system_prompt, default_persona, SILENCE_MARKER};

/// Recorded and yielded when the tool budget of a turn is spent.
pub const RECURSION_NOTICE: &str = "recursion too deep, tools disabled";

const EVENT_BUFFER: usize = 64;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TurnEvent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Events emitted during a single turn, in the order they happen.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Model content as canonical XML, already recorded. Decode it into
    /// platform messages with `kh_codec::decode`.
    Reply { xml: String },

    /// The model is invoking a tool.
    ToolCall {
        call_id: String,
        tool_name: String,
        arguments: Value,
    },

    /// Tool execution result, already recorded.
    ToolResult {
        call_id: String,
        tool_name: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },

    /// A recorded system notice.
    Notice { text: String },

    /// The model call failed; history was reset.
    Failed { message: String },

    /// Token usage of one model call and the credit it cost.
    Usage {
        prompt_tokens: u32,
        completion_tokens: u32,
        total_tokens: u32,
        charged: f64,
    },
}

impl TurnEvent {
    /// Text meant for the chat, if this event carries any. Replies are
    /// decoded; one line per paragraph.
    pub fn plain_text(&self) -> Option<String> {
        match self {
            TurnEvent::Reply { xml } => {
                let lines: Vec<String> = kh_codec::decode(xml)
                    .ok()?
                    .map(|segments| kh_codec::plain_text(&segments))
                    .collect();
                Some(lines.join("\n"))
            }
            TurnEvent::Notice { text } => Some(text.clone()),
            TurnEvent::Failed { message } => Some(message.clone()),
            _ => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One platform message to be recorded.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub msg_id: String,
    pub speaker_name: String,
    pub speaker_id: String,
    pub segments: Vec<Segment>,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(
        msg_id: impl Into<String>,
        speaker_name: impl Into<String>,
        speaker_id: impl Into<String>,
        segments: Vec<Segment>,
    ) -> Self {
        Self {
            msg_id: msg_id.into(),
            speaker_name: speaker_name.into(),
            speaker_id: speaker_id.into(),
            segments,
            timestamp: Utc::now(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Outcome of [`ConversationAgent::add_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Stored; the id of the entry now holding it.
    Recorded(SegId),
    /// The speaker is on the block list.
    Blocked,
    /// Credit is exhausted; nothing is recorded.
    OutOfCredit,
    /// The speaker id belongs to the tool or notice identity.
    Reserved,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Collaborators
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// External services an agent talks to. Cheap to clone; shared by every
/// agent of a registry.
#[derive(Clone)]
pub struct AgentDeps {
    pub service: Arc<dyn CompletionService>,
    pub summarizer: Arc<dyn ErrorSummarizer>,
    pub images: Arc<dyn ImageStore>,
    pub discovery: Option<Arc<dyn ToolDiscovery>>,
}

impl AgentDeps {
    /// Plain error summaries, no image re-hosting, no remote tools.
    pub fn new(service: Arc<dyn CompletionService>) -> Self {
        Self {
            service,
            summarizer: Arc::new(PlainSummarizer),
            images: Arc::new(PassthroughImageStore),
            discovery: None,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn ErrorSummarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    pub fn with_images(mut self, images: Arc<dyn ImageStore>) -> Self {
        self.images = images;
        self
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn ToolDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ConversationAgent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ConversationAgent {
    group_id: String,
    config: Arc<Config>,
    persona: String,
    deps: AgentDeps,
    tools: ToolManager,
    records: Mutex<RecordList>,
    blocks: Arc<BlockList>,
    pending: Arc<DeferredOperationQueue>,
    /// Only ever decreases.
    credit: Mutex<f64>,
    cooldown_until: Mutex<Option<Instant>>,
    turn_lock: Arc<tokio::sync::Mutex<()>>,
}

impl ConversationAgent {
    pub fn new(group_id: impl Into<String>, config: Arc<Config>, deps: AgentDeps) -> Arc<Self> {
        let agent_cfg = &config.agent;

        let mut tools = ToolManager::new();
        if let Some(discovery) = &deps.discovery {
            tools = tools.with_discovery(Arc::clone(discovery));
        }
        let blocks = Arc::new(BlockList::new());
        let pending = Arc::new(DeferredOperationQueue::new());
        register_builtin_tools(&tools, Arc::clone(&blocks), Arc::clone(&pending), agent_cfg);

        let persona = agent_cfg
            .system_prompt
            .clone()
            .unwrap_or_else(|| default_persona(&agent_cfg.bot_name));

        Arc::new(Self {
            group_id: group_id.into(),
            persona,
            tools,
            records: Mutex::new(RecordList::new(agent_cfg.max_logs)),
            blocks,
            pending,
            credit: Mutex::new(agent_cfg.initial_credit),
            cooldown_until: Mutex::new(None),
            turn_lock: Arc::new(tokio::sync::Mutex::new(())),
            deps,
            config,
        })
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// The agent's tool registry; hosts may register extra tools on it.
    pub fn tools(&self) -> &ToolManager {
        &self.tools
    }

    pub fn block_list(&self) -> &BlockList {
        &self.blocks
    }

    pub fn credit(&self) -> f64 {
        *self.credit.lock()
    }

    /// Whether the quiet period after the last completed turn is running.
    pub fn is_cooling_down(&self) -> bool {
        matches!(*self.cooldown_until.lock(), Some(until) if Instant::now() < until)
    }

    /// Whether a turn currently holds the turn lock.
    pub fn is_busy(&self) -> bool {
        self.turn_lock.try_lock().is_err()
    }

    // ── Records ───────────────────────────────────────────────────────

    /// Encode and record an inbound message. Messages from blocked users or
    /// reserved ids are dropped, as is everything once credit is exhausted.
    pub async fn add_message(&self, msg: InboundMessage) -> Admission {
        if is_reserved(&msg.speaker_id) {
            tracing::warn!(speaker_id = %msg.speaker_id, "rejecting message from a reserved speaker id");
            return Admission::Reserved;
        }
        if self.blocks.is_blocked_at(&msg.speaker_id, msg.timestamp) {
            tracing::debug!(speaker_id = %msg.speaker_id, "ignoring blocked speaker");
            return Admission::Blocked;
        }
        if self.credit() < 0.0 {
            return Admission::OutOfCredit;
        }

        let reply_to = msg.segments.iter().find_map(|s| match s {
            Segment::Reply { id } => Some(id.clone()),
            _ => None,
        });
        let encoded = kh_codec::encode(
            &msg.segments,
            Some(msg.msg_id.as_str()),
            &EncodeContext::new(&*self.deps.images),
        )
        .await;

        let mut seg = RecordSeg::new(msg.speaker_name, msg.speaker_id, msg.msg_id, encoded.xml)
            .at(msg.timestamp)
            .with_images(encoded.images);

        let mut records = self.records.lock();
        if let Some(target) = reply_to.and_then(|id| records.find_by_fragment(&id)) {
            seg = seg.replying_to(target);
        }
        Admission::Recorded(records.add(seg))
    }

    /// Tombstone a recorded message by its platform id.
    pub fn recall(&self, msg_id: &str) -> bool {
        self.records.lock().recall(msg_id, None)
    }

    /// Like [`Self::recall`], but only when `speaker_id` wrote it.
    pub fn recall_from(&self, msg_id: &str, speaker_id: &str) -> bool {
        self.records.lock().recall(msg_id, Some(speaker_id))
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().len()
    }

    /// Copy of the current history.
    pub fn records(&self) -> RecordList {
        self.records.lock().clone()
    }

    pub fn save_records(&self, path: &Path) -> kh_domain::Result<()> {
        self.records().save(path)
    }

    pub fn load_records(&self, path: &Path) -> kh_domain::Result<()> {
        let loaded = RecordList::load(path)?;
        *self.records.lock() = loaded;
        Ok(())
    }

    /// Forget the history and the block list. Credit is kept.
    pub fn remake(&self, reason: &str) {
        self.records.lock().clear();
        self.blocks.clear();
        TraceEvent::HistoryReset {
            group_id: self.group_id.clone(),
            reason: reason.to_owned(),
        }
        .emit();
    }

    // ── Deferred operations ───────────────────────────────────────────

    pub fn has_pending_ops(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Everything tools requested since the last drain, coalesced.
    pub fn drain_pending_ops(&self) -> Vec<PendingOp> {
        self.pending.drain()
    }

    /// Drain the queue, apply blocks to this agent's block list and return
    /// the bans for the host to enforce.
    pub fn settle_pending_ops(&self) -> Vec<PendingOp> {
        let mut bans = Vec::new();
        for op in self.pending.drain() {
            match op {
                PendingOp::Block { user_id, duration } => {
                    self.blocks.block(&user_id, duration);
                }
                ban @ PendingOp::Ban { .. } => bans.push(ban),
            }
        }
        bans
    }

    // ── Turns ─────────────────────────────────────────────────────────

    /// Start a turn, waiting for a running one to finish first.
    pub async fn say(self: &Arc<Self>) -> Result<mpsc::Receiver<TurnEvent>, AgentError> {
        self.check_credit()?;
        let guard = Arc::clone(&self.turn_lock).lock_owned().await;
        Ok(self.start_turn(guard))
    }

    /// Start a turn unless one is already running.
    pub fn try_say(self: &Arc<Self>) -> Result<mpsc::Receiver<TurnEvent>, AgentError> {
        self.check_credit()?;
        let guard = Arc::clone(&self.turn_lock)
            .try_lock_owned()
            .map_err(|_| AgentError::Busy)?;
        Ok(self.start_turn(guard))
    }

    fn check_credit(&self) -> Result<(), AgentError> {
        if self.credit() < 0.0 {
            return Err(AgentError::OutOfCredit);
        }
        Ok(())
    }

    fn start_turn(self: &Arc<Self>, guard: OwnedMutexGuard<()>) -> mpsc::Receiver<TurnEvent> {
        let (tx, rx) = mpsc::channel::<TurnEvent>(EVENT_BUFFER);
        let agent = Arc::clone(self);
        let turn_span = tracing::info_span!("turn", group_id = %self.group_id);
        tokio::spawn(
            async move {
                let _guard = guard;
                agent.run_turn(&tx).await;
            }
            .instrument(turn_span),
        );
        rx
    }

    async fn run_turn(self: &Arc<Self>, tx: &mpsc::Sender<TurnEvent>) {
        TraceEvent::TurnStarted {
            group_id: self.group_id.clone(),
            records: self.record_count(),
            credit: self.credit(),
        }
        .emit();

        let remote = self.tools.ensure_remote_tools().await;
        tracing::debug!(remote_tools = remote, "tools ready");

        match self.tool_loop(tx).await {
            Ok(()) => {
                let cooldown =
                    Duration::try_from_secs_f64(self.config.agent.cooldown_secs).unwrap_or_default();
                *self.cooldown_until.lock() = Some(Instant::now() + cooldown);
                tracing::debug!("turn complete");
            }
            Err(e) => {
                tracing::error!(error = %e, "model call failed, resetting history");
                self.remake("model call failed");
                let message = self.deps.summarizer.summarize(&e).await;
                let _ = tx.send(TurnEvent::Failed { message }).await;
            }
        }
    }

    async fn tool_loop(self: &Arc<Self>, tx: &mpsc::Sender<TurnEvent>) -> kh_domain::Result<()> {
        let mut budget = self.config.agent.max_tool_depth;
        let mut depth: u32 = 0;

        loop {
            let tools_enabled = budget > 0;
            let resp = self.call_model(depth, tools_enabled).await?;

            let charged = self.charge(&resp);
            let usage = resp.usage.unwrap_or_default();
            let _ = tx
                .send(TurnEvent::Usage {
                    prompt_tokens: usage.prompt_tokens,
                    completion_tokens: usage.completion_tokens,
                    total_tokens: usage.total_tokens,
                    charged,
                })
                .await;

            let xml = self.clean_content(&resp.content);
            let calls = if tools_enabled {
                resp.tool_calls
            } else {
                if !resp.tool_calls.is_empty() {
                    tracing::warn!(
                        count = resp.tool_calls.len(),
                        "ignoring tool calls made with tools disabled"
                    );
                }
                Vec::new()
            };

            self.record_agent_turn(&xml, &calls);
            if !xml.is_empty() {
                let _ = tx.send(TurnEvent::Reply { xml }).await;
            }
            if calls.is_empty() {
                return Ok(());
            }

            self.run_tools(calls, tx).await;

            budget -= 1;
            depth += 1;
            if budget == 0 {
                tracing::warn!(depth, "tool budget exhausted");
                self.record_notice(RECURSION_NOTICE);
                let _ = tx
                    .send(TurnEvent::Notice {
                        text: RECURSION_NOTICE.into(),
                    })
                    .await;
            }
        }
    }

    fn model_name(&self) -> String {
        self.config
            .agent
            .model
            .clone()
            .unwrap_or_else(|| self.deps.service.default_model().to_owned())
    }

    async fn call_model(&self, depth: u32, tools_enabled: bool) -> kh_domain::Result<ChatResponse> {
        let cfg = &self.config.agent;
        let (tools, summary) = if tools_enabled {
            (self.tools.schema_list(), self.tools.summary())
        } else {
            (Vec::new(), String::new())
        };

        let mut messages = vec![Message::system(build_system_prompt(&self.persona, &summary))];
        messages.extend(self.records.lock().project(&cfg.bot_id, cfg.image_mode));

        let req = ChatRequest {
            messages,
            tools,
            temperature: Some(cfg.temperature),
            max_tokens: Some(cfg.max_tokens),
            model: cfg.model.clone(),
        };
        let model = self.model_name();
        let provider = self.deps.service.provider_id().to_owned();

        let llm_span = tracing::info_span!(
            "llm.call",
            provider = %provider,
            model = %model,
            depth,
            input_tokens = tracing::field::Empty,
            output_tokens = tracing::field::Empty,
        );
        let started = Instant::now();
        let resp = self
            .deps
            .service
            .chat(&req)
            .instrument(llm_span.clone())
            .await?;

        if let Some(u) = &resp.usage {
            llm_span.record("input_tokens", u.prompt_tokens);
            llm_span.record("output_tokens", u.completion_tokens);
        }
        TraceEvent::LlmRequest {
            provider,
            model,
            depth,
            tools_offered: req.tools.len(),
            duration_ms: started.elapsed().as_millis() as u64,
            prompt_tokens: resp.usage.map(|u| u.prompt_tokens),
            completion_tokens: resp.usage.map(|u| u.completion_tokens),
        }
        .emit();
        Ok(resp)
    }

    /// Deduct the cost of `resp` from credit and return it.
    fn charge(&self, resp: &ChatResponse) -> f64 {
        let cost = match &resp.usage {
            Some(u) => self
                .config
                .pricing_for(&resp.model)
                .or_else(|| self.config.pricing_for(&self.model_name()))
                .unwrap_or(ModelPricing::FALLBACK)
                .estimate_cost(u.prompt_tokens, u.completion_tokens),
            None => {
                tracing::warn!("response carried no usage, charging the fallback amount");
                self.config.agent.fallback_charge
            }
        };
        let cost = if cost.is_finite() { cost.max(0.0) } else { 0.0 };
        let mut credit = self.credit.lock();
        *credit -= cost;
        tracing::debug!(cost, credit = *credit, "credit charged");
        cost
    }

    /// Model content as canonical XML; empty when there is nothing to say.
    fn clean_content(&self, content: &str) -> String {
        let stripped = content.replace(SILENCE_MARKER, "");
        if stripped.trim().is_empty() {
            return String::new();
        }
        kh_codec::sanitize_with(
            &stripped,
            DecodeOptions {
                faces: FaceTable::global(),
                face_mismatch_as_image: self.config.codec.face_mismatch_as_image,
            },
        )
    }

    fn record_agent_turn(&self, xml: &str, calls: &[ToolCall]) {
        let calls_json = if calls.is_empty() {
            None
        } else {
            match serde_json::to_string(calls) {
                Ok(json) => Some(json),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to serialize tool calls for the record");
                    None
                }
            }
        };

        let name = self.config.agent.bot_name.clone();
        let id = self.config.agent.bot_id.clone();
        let seg = match (xml.is_empty(), calls_json) {
            (true, None) => return,
            (false, None) => RecordSeg::new(name, id, CONTENT_FRAGMENT, xml),
            (false, Some(json)) => {
                RecordSeg::new(name, id, CONTENT_FRAGMENT, xml).with_fragment(TOOL_CALLS_FRAGMENT, json)
            }
            (true, Some(json)) => RecordSeg::new(name, id, TOOL_CALLS_FRAGMENT, json),
        };
        self.records.lock().add(seg);
    }

    fn record_notice(&self, text: &str) {
        self.records
            .lock()
            .add(RecordSeg::new("Notice", NOTICE_SPEAKER_ID, "notice", text));
    }

    /// Run every call concurrently, each on its own task so a panicking
    /// tool only fails its own call. Results are recorded as they finish.
    async fn run_tools(self: &Arc<Self>, calls: Vec<ToolCall>, tx: &mpsc::Sender<TurnEvent>) {
        for call in &calls {
            let _ = tx
                .send(TurnEvent::ToolCall {
                    call_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    arguments: call.arguments.clone(),
                })
                .await;
        }

        let mut running: FuturesUnordered<_> = calls
            .into_iter()
            .map(|call| {
                let agent = Arc::clone(self);
                let name = call.tool_name.clone();
                let args = call.arguments.clone();
                let tool_span = tracing::info_span!(
                    "tool.call",
                    tool = %call.tool_name,
                    call_id = %call.call_id,
                );
                let started = Instant::now();
                let handle = tokio::spawn(
                    async move { agent.tools.execute(&name, args).await }.instrument(tool_span),
                );
                async move { (call, handle.await, started.elapsed()) }
            })
            .collect();

        while let Some((call, joined, elapsed)) = running.next().await {
            let (content, is_error) = match joined {
                Ok(Ok(text)) => (text, false),
                Ok(Err(e)) => (format!("tool call failed: {e}"), true),
                Err(e) => (format!("tool call failed: {e}"), true),
            };
            if is_error {
                tracing::warn!(
                    tool = %call.tool_name,
                    call_id = %call.call_id,
                    error = %content,
                    "tool call failed"
                );
            }
            TraceEvent::ToolExecuted {
                tool: call.tool_name.clone(),
                call_id: call.call_id.clone(),
                duration_ms: elapsed.as_millis() as u64,
                failed: is_error,
            }
            .emit();

            self.records.lock().add(RecordSeg::new(
                tool_speaker_name(&call.tool_name),
                TOOL_SPEAKER_ID,
                call.call_id.clone(),
                content.clone(),
            ));
            let _ = tx
                .send(TurnEvent::ToolResult {
                    call_id: call.call_id,
                    tool_name: call.tool_name,
                    content,
                    is_error,
                })
                .await;
        }
    }
}

/// `block_user` → `BlockUserTool`.
fn tool_speaker_name(tool_name: &str) -> String {
    let mut out = String::with_capacity(tool_name.len() + 4);
    for word in tool_name.split(|c: char| c == '_' || c == '-' || c == '.') {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out.push_str("Tool");
    out
}
