//! Completion client interface
//!
//! The orchestrator talks to the model provider through [`CompletionClient`].
//! Provider failures are classified up front so the retry logic can match on
//! them instead of on error strings.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::conversation::Message;
use crate::usage::TokenUsage;

/// Finish reason reported when the answer hit the token limit
pub const FINISH_REASON_LENGTH: &str = "length";

/// Matches the provider's context overflow message, e.g.
/// "This model's maximum context length is 4097 tokens. However, your messages resulted in 5000 tokens."
static RE_CONTEXT_LENGTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)maximum context length is (\d+) tokens.*?(?:resulted in|requested) (\d+) tokens").unwrap()
});

/// Per-request options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionOptions {
    /// Number of choices to generate
    pub n: u8,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self { n: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub message: Message,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Successful completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: TokenUsage,
}

impl Completion {
    /// Content of the first choice
    pub fn content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.choices.first().and_then(|c| c.finish_reason.as_deref())
    }

    /// True when the first choice was cut off by the token limit
    pub fn is_truncated(&self) -> bool {
        self.finish_reason() == Some(FINISH_REASON_LENGTH)
    }

    /// Contents of all choices, in order
    pub fn contents(&self) -> Vec<String> {
        self.choices.iter().map(|c| c.message.content.clone()).collect()
    }
}

/// Classified provider failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompletionError {
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Context length exceeded: {actual_tokens} tokens > {max_tokens} max")]
    ContextLengthExceeded {
        max_tokens: u32,
        actual_tokens: u32,
        message: String,
    },

    #[error("Completion timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl CompletionError {
    /// Classify a non-success provider response
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = provider_message(body).unwrap_or_else(|| body.to_string());

        if status == 429 {
            return Self::RateLimited(message);
        }

        if let Some((max_tokens, actual_tokens)) = parse_context_overflow(&message) {
            return Self::ContextLengthExceeded {
                max_tokens,
                actual_tokens,
                message,
            };
        }

        Self::Transport(format!("HTTP {}: {}", status, message))
    }

    pub fn is_context_overflow(&self) -> bool {
        matches!(self, Self::ContextLengthExceeded { .. })
    }
}

/// Provider error envelope: `{"error": {"message": ..., "type": ..., "code": ...}}`
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

fn provider_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .map(|e| e.error.message)
}

/// Extract `(max_tokens, actual_tokens)` from an overflow message
pub fn parse_context_overflow(message: &str) -> Option<(u32, u32)> {
    let caps = RE_CONTEXT_LENGTH.captures(message)?;
    let max_tokens = caps.get(1)?.as_str().parse().ok()?;
    let actual_tokens = caps.get(2)?.as_str().parse().ok()?;
    Some((max_tokens, actual_tokens))
}

/// Chat completion provider
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        options: CompletionOptions,
    ) -> Result<Completion, CompletionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    const OVERFLOW_BODY: &str = r#"{"error":{"message":"This model's maximum context length is 4097 tokens. However, your messages resulted in 5120 tokens. Please reduce the length of the messages.","type":"invalid_request_error","param":"messages","code":"context_length_exceeded"}}"#;

    #[test]
    fn test_classify_context_overflow() {
        match CompletionError::from_response(400, OVERFLOW_BODY) {
            CompletionError::ContextLengthExceeded { max_tokens, actual_tokens, message } => {
                assert_eq!(max_tokens, 4097);
                assert_eq!(actual_tokens, 5120);
                assert!(message.starts_with("This model's maximum context length"));
            }
            other => panic!("Expected context overflow, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_requested_variant() {
        let msg = "This model's maximum context length is 16385 tokens. However, you requested 17000 tokens (16000 in the messages, 1000 in the completion).";
        assert_eq!(parse_context_overflow(msg), Some((16385, 17000)));
    }

    #[test]
    fn test_classify_rate_limit() {
        let body = r#"{"error":{"message":"Rate limit reached for requests","type":"requests"}}"#;
        assert_eq!(
            CompletionError::from_response(429, body),
            CompletionError::RateLimited("Rate limit reached for requests".to_string())
        );
    }

    #[test]
    fn test_classify_other() {
        let err = CompletionError::from_response(500, "upstream exploded");
        assert_eq!(err, CompletionError::Transport("HTTP 500: upstream exploded".to_string()));
        assert!(!err.is_context_overflow());
    }

    #[test]
    fn test_completion_accessors() {
        let completion = Completion {
            model: "gpt-3.5-turbo".to_string(),
            choices: vec![
                Choice {
                    message: Message::assistant("first"),
                    finish_reason: Some("length".to_string()),
                },
                Choice {
                    message: Message::assistant("second"),
                    finish_reason: Some("stop".to_string()),
                },
            ],
            usage: TokenUsage::new(1, 2, 3),
        };

        assert_eq!(completion.content(), Some("first"));
        assert!(completion.is_truncated());
        assert_eq!(completion.contents(), vec!["first", "second"]);
    }
}
