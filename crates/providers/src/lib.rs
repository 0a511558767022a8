//! `kh-providers` — completion services and error summarisers.
//!
//! The agent only sees [`CompletionService`]; [`OpenAiCompatProvider`] is
//! the one concrete adapter shipped here.

pub mod openai_compat;
pub mod summarize;
pub mod traits;
pub(crate) mod util;

pub use openai_compat::OpenAiCompatProvider;
pub use summarize::{ChatSummarizer, ErrorSummarizer, PlainSummarizer};
pub use traits::{ChatRequest, ChatResponse, CompletionService};
