//! Token Usage Tracking
//!
//! Per-model usage counters kept inside each conversation.
//! Ledgers are created lazily on first use of a model and live as long as
//! the conversation that owns them.

use serde::{Deserialize, Serialize};

/// Token counts reported by the provider for one completion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64, total_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    }
}

/// Cumulative counters for one model within one conversation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageLedger {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub message_count: u64,
    pub error_count: u64,
}

impl UsageLedger {
    /// Add one successful completion
    pub fn record(&mut self, usage: &TokenUsage) {
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.total_tokens += usage.total_tokens;
        self.message_count += 1;
    }

    pub fn record_error(&mut self) {
        self.error_count += 1;
    }

    /// Share of `total_tokens` spent on prompts (0-100%)
    pub fn prompt_share(&self) -> f64 {
        share(self.prompt_tokens, self.total_tokens)
    }

    /// Share of `total_tokens` spent on completions (0-100%)
    pub fn completion_share(&self) -> f64 {
        share(self.completion_tokens, self.total_tokens)
    }
}

fn share(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    part as f64 / total as f64 * 100.0
}

/// Format token count for display (e.g., 1.5M, 500K)
pub fn format_tokens(tokens: u64) -> String {
    if tokens >= 1_000_000 {
        format!("{:.1}M", tokens as f64 / 1_000_000.0)
    } else if tokens >= 1_000 {
        format!("{:.1}K", tokens as f64 / 1_000.0)
    } else {
        format!("{}", tokens)
    }
}
