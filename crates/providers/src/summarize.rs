//! Turning a fatal turn error into one short line for the chat.

use std::sync::Arc;

use kh_domain::error::Error;
use kh_domain::tool::Message;

use crate::traits::{ChatRequest, CompletionService};

/// Appended to every summary: a fatal error always resets the history.
pub const RESET_SUFFIX: &str = " (conversation context was reset)";

#[async_trait::async_trait]
pub trait ErrorSummarizer: Send + Sync {
    async fn summarize(&self, err: &Error) -> String;
}

/// Fixed wording per error kind. Never fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainSummarizer;

impl PlainSummarizer {
    pub fn describe(err: &Error) -> String {
        let head = match err {
            Error::Timeout(_) => "the model took too long to answer".to_string(),
            Error::Http(_) => "could not reach the model".to_string(),
            Error::NoChoices(_) => "the model returned an empty answer".to_string(),
            Error::Provider { message, .. } => {
                format!("the model refused the request: {}", truncate(message, 120))
            }
            Error::Json(_) => "the model answered with something unreadable".to_string(),
            other => format!("something went wrong: {}", truncate(&other.to_string(), 120)),
        };
        format!("{head}{RESET_SUFFIX}")
    }
}

#[async_trait::async_trait]
impl ErrorSummarizer for PlainSummarizer {
    async fn summarize(&self, err: &Error) -> String {
        Self::describe(err)
    }
}

/// Asks a completion service to explain the error in one casual sentence,
/// falling back to [`PlainSummarizer`] when that call fails too.
pub struct ChatSummarizer {
    service: Arc<dyn CompletionService>,
    model: Option<String>,
}

impl ChatSummarizer {
    pub fn new(service: Arc<dyn CompletionService>, model: Option<String>) -> Self {
        Self { service, model }
    }
}

#[async_trait::async_trait]
impl ErrorSummarizer for ChatSummarizer {
    async fn summarize(&self, err: &Error) -> String {
        let req = ChatRequest {
            messages: vec![
                Message::system(
                    "Explain the following program error to a group chat in one short, \
                     casual sentence. No stack traces, no apologies.",
                ),
                Message::user(truncate(&err.to_string(), 500)),
            ],
            temperature: Some(0.5),
            max_tokens: Some(120),
            model: self.model.clone(),
            ..Default::default()
        };
        match self.service.chat(&req).await {
            Ok(resp) if !resp.content.trim().is_empty() => {
                format!("{}{RESET_SUFFIX}", resp.content.trim())
            }
            Ok(_) => PlainSummarizer::describe(err),
            Err(e) => {
                tracing::warn!(error = %e, "error summary call failed");
                PlainSummarizer::describe(err)
            }
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}
