//! GPT Relay Bot
//!
//! Telegram bot that relays chat messages to an OpenAI-compatible chat
//! completion API and answers with the model's reply.
//!
//! # Features
//!
//! - **Rolling history**: bounded per-chat dialogue with a fixed system preamble
//! - **Idle reset**: context cleared after a quiet period
//! - **Overflow recovery**: one-time switch to a larger-context model, then pruning
//! - **Usage ledgers**: per-model token and error counters, `/stats` report
//! - **Voice input**: transcription of voice messages
//! - **Suggestions**: optional follow-up question keyboard
//!
//! # Architecture
//!
//! ```text
//! Telegram ──► telegram ──► MessageRelay ──► CompletionOrchestrator ──► OpenAI API
//!                               │                    │
//!                               └── Registry ──► ConversationState
//!                                                    └── UsageLedger per model
//! ```

pub mod client;
pub mod config;
pub mod conversation;
pub mod openai;
pub mod orchestrator;
pub mod registry;
pub mod relay;
pub mod stats;
pub mod telegram;
pub mod usage;


pub use client::{Completion, CompletionClient, CompletionError, CompletionOptions};
pub use config::Config;
pub use conversation::{ConversationSettings, ConversationState, Message, Role};
pub use openai::OpenAiClient;
pub use orchestrator::{CompletionFailure, CompletionOrchestrator, OrchestratorSettings};
pub use registry::{ConversationHandle, ConversationRegistry};
pub use relay::{InboundMessage, MessageRelay, QuotedMessage, RelayReply};
pub use stats::{ModelStats, StatsReport};
pub use usage::{format_tokens, TokenUsage, UsageLedger};
