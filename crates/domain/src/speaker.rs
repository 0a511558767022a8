//! Reserved speaker identities.
//!
//! Real users carry their platform id. The agent itself is identified by
//! the configured `bot_id`; the two ids below never collide with a real
//! account on the platforms Kohi targets.

/// Entries holding tool results. Never merged with neighbours.
pub const TOOL_SPEAKER_ID: &str = "10001";

/// Entries holding notices the agent writes into its own history
/// (recursion limit, recalls).
pub const NOTICE_SPEAKER_ID: &str = "10002";

/// True when `id` belongs to one of the reserved identities.
pub fn is_reserved(id: &str) -> bool {
    id == TOOL_SPEAKER_ID || id == NOTICE_SPEAKER_ID
}
