use serde::{Deserialize, Serialize};

/// Persona and turn-loop settings for one conversation agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Display name of the persona.
    #[serde(default = "d_bot_name")]
    pub bot_name: String,
    /// Platform id the agent speaks as; assistant turns are keyed by it.
    #[serde(default = "d_bot_id")]
    pub bot_id: String,
    /// Persona prompt. `None` uses the built-in persona.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Model override. `None` defers to the provider's default model.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    /// Token ceiling for each completion.
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,
    /// Maximum number of records kept per group.
    #[serde(default = "d_max_logs")]
    pub max_logs: usize,
    /// Tool-call rounds allowed before tools are disabled for the turn.
    #[serde(default = "d_max_tool_depth")]
    pub max_tool_depth: u32,
    /// Quiet period after a completed turn (seconds).
    #[serde(default = "d_cooldown_secs")]
    pub cooldown_secs: f64,
    /// Block duration used when a request carries no usable duration.
    #[serde(default = "d_block_default_secs")]
    pub block_default_secs: f64,
    /// Starting credit for a fresh agent.
    #[serde(default = "d_initial_credit")]
    pub initial_credit: f64,
    /// Charge applied when a response carries no usage counters.
    #[serde(default = "d_fallback_charge")]
    pub fallback_charge: f64,
    /// Send image references to the model alongside text.
    #[serde(default)]
    pub image_mode: bool,
    /// Expose `ban_user` to the model.
    #[serde(default)]
    pub enable_ban_tool: bool,
    /// Expose `fetch`, which reads web pages.
    #[serde(default)]
    pub enable_fetch_tool: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bot_name: d_bot_name(),
            bot_id: d_bot_id(),
            system_prompt: None,
            model: None,
            temperature: d_temperature(),
            max_tokens: d_max_tokens(),
            max_logs: d_max_logs(),
            max_tool_depth: d_max_tool_depth(),
            cooldown_secs: d_cooldown_secs(),
            block_default_secs: d_block_default_secs(),
            initial_credit: d_initial_credit(),
            fallback_charge: d_fallback_charge(),
            image_mode: false,
            enable_ban_tool: false,
            enable_fetch_tool: false,
        }
    }
}

fn d_bot_name() -> String {
    "Kohi".into()
}
fn d_bot_id() -> String {
    "100000".into()
}
fn d_temperature() -> f32 {
    0.8
}
fn d_max_tokens() -> u32 {
    4096
}
fn d_max_logs() -> usize {
    60
}
fn d_max_tool_depth() -> u32 {
    5
}
fn d_cooldown_secs() -> f64 {
    8.0
}
fn d_block_default_secs() -> f64 {
    150.0
}
fn d_initial_credit() -> f64 {
    1.0
}
fn d_fallback_charge() -> f64 {
    0.01
}
