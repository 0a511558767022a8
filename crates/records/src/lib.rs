//! Conversation history for one group.
//!
//! A [`RecordList`] owns every [`RecordSeg`] of a conversation in timestamp
//! order. Consecutive entries from the same speaker are merged on insert,
//! recalled messages become tombstones instead of disappearing, and the
//! whole list projects into chat turns for the completion service.

pub mod list;
pub mod record;

pub use list::RecordList;
pub use record::{Fragment, RecordSeg, SegId, CONTENT_FRAGMENT, TOOL_CALLS_FRAGMENT};
