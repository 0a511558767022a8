//! `kh-domain` — types shared by every Kohi crate.
//!
//! Nothing in here performs I/O: chat turns, tool call shapes, usage
//! counters, the shared error enum, configuration structs and the
//! structured trace events.

pub mod config;
pub mod error;
pub mod speaker;
pub mod tool;
pub mod trace;
pub mod usage;

pub use error::{Error, Result};
