use serde::Serialize;

/// Structured trace events emitted across all Kohi crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    TurnStarted {
        group_id: String,
        records: usize,
        credit: f64,
    },
    LlmRequest {
        provider: String,
        model: String,
        depth: u32,
        tools_offered: usize,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    ToolExecuted {
        tool: String,
        call_id: String,
        duration_ms: u64,
        failed: bool,
    },
    RecordAppended {
        speaker_id: String,
        merged: bool,
        len: usize,
    },
    RecordRecalled {
        fragment_id: String,
    },
    HistoryReset {
        group_id: String,
        reason: String,
    },
    RemoteToolsDiscovered {
        count: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "kh_event");
    }
}
