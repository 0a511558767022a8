use kh_domain::error::Result;
use kh_domain::tool::{Message, ToolCall, ToolDefinition};
use kh_domain::usage::Usage;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Requests and responses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One chat completion call: the projected history plus sampling knobs.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// System turn first, then the projected history.
    pub messages: Vec<Message>,
    /// Tool definitions the model may invoke. Empty disables tool calling.
    pub tools: Vec<ToolDefinition>,
    /// `None` leaves sampling to the endpoint.
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Falls back to the service's default model.
    pub model: Option<String>,
}

/// A provider-agnostic chat completion response (first choice only).
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    /// Textual content of the response; empty when the model only called tools.
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    /// Absent when the endpoint does not report usage.
    pub usage: Option<Usage>,
    /// Model name as reported by the endpoint.
    pub model: String,
    /// `stop`, `tool_calls`, `length`, ...
    pub finish_reason: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core service trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Anything that turns a list of chat turns into a model response.
///
/// Implementations own their timeouts; the agent never cancels a call.
#[async_trait::async_trait]
pub trait CompletionService: Send + Sync {
    /// One non-streaming completion.
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse>;

    /// A unique identifier for this service, used in logs and trace events.
    fn provider_id(&self) -> &str;

    /// Model used when a request carries no override.
    fn default_model(&self) -> &str;
}
