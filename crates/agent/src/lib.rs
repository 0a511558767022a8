//! `kh-agent` — the per-group conversation agent.
//!
//! A [`ConversationAgent`] owns one group's history, tools, block list,
//! credit and deferred moderation queue, and runs the model/tool loop.
//! [`AgentRegistry`] hands out one agent per group.

pub mod agent;
pub mod blocklist;
pub mod builtin;
pub mod error;
pub mod fetch;
pub mod ops;
pub mod prompt;
pub mod registry;

pub use agent::{Admission, AgentDeps, ConversationAgent, InboundMessage, TurnEvent};
pub use blocklist::BlockList;
pub use error::AgentError;
pub use ops::{DeferredOperationQueue, PendingOp};
pub use registry::AgentRegistry;
