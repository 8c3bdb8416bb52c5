//! Conversation State
//!
//! Rolling dialogue history for one chat plus its usage counters.
//!
//! The system preamble lives in its own slot and is re-read every time the
//! history is materialized, so it is always first and never evicted. Turns
//! are kept in a bounded FIFO: once `history_trim` is exceeded the oldest
//! turn is dropped.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use tracing::debug;

use crate::usage::{TokenUsage, UsageLedger};

/// Default system preamble for new conversations
pub const DEFAULT_SYSTEM_PROMPT: &str = "Use metric units";

/// Maximum history length, system message included
pub const DEFAULT_HISTORY_TRIM: usize = 10;

/// Idle gap after which the next message starts from a clean context (10 min)
pub const DEFAULT_IDLE_RESET_SECS: i64 = 10 * 60;

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Role for a chat participant: bot accounts speak as the assistant
    pub fn from_sender(is_bot: bool) -> Self {
        if is_bot {
            Role::Assistant
        } else {
            Role::User
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Settings applied to every new conversation
#[derive(Debug, Clone)]
pub struct ConversationSettings {
    pub system_prompt: String,
    pub history_trim: usize,
    pub idle_reset: Duration,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            history_trim: DEFAULT_HISTORY_TRIM,
            idle_reset: Duration::seconds(DEFAULT_IDLE_RESET_SECS),
        }
    }
}

/// Voice message counters, cumulative and for the current session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoiceUsage {
    pub messages: u64,
    pub duration_secs: f64,
    pub session_messages: u64,
    pub session_duration_secs: f64,
}

/// Dialogue state for one chat
#[derive(Debug, Clone)]
pub struct ConversationState {
    system: String,
    turns: VecDeque<Message>,
    last_message_at: Option<DateTime<Utc>>,
    history_trim: usize,
    idle_reset: Duration,
    suggestion_count: u8,
    sessions: u64,
    session_messages: u64,
    models: HashMap<String, UsageLedger>,
    voice: VoiceUsage,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new(&ConversationSettings::default())
    }
}

impl ConversationState {
    pub fn new(settings: &ConversationSettings) -> Self {
        Self {
            system: settings.system_prompt.clone(),
            turns: VecDeque::new(),
            last_message_at: None,
            history_trim: settings.history_trim.max(1),
            idle_reset: settings.idle_reset,
            suggestion_count: 0,
            sessions: 1,
            session_messages: 0,
            models: HashMap::new(),
            voice: VoiceUsage::default(),
        }
    }

    /// Full history as sent to the model: system message first, then turns
    pub fn history(&self) -> Vec<Message> {
        let mut history = Vec::with_capacity(self.turns.len() + 1);
        history.push(Message::system(self.system.clone()));
        history.extend(self.turns.iter().cloned());
        history
    }

    /// Number of messages in `history()`, system message included
    pub fn len(&self) -> usize {
        self.turns.len() + 1
    }

    /// True when only the system message is present
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> impl Iterator<Item = &Message> {
        self.turns.iter()
    }

    /// Most recent message, falling back to the system message
    pub fn last_content(&self) -> &str {
        self.turns
            .back()
            .map(|m| m.content.as_str())
            .unwrap_or(&self.system)
    }

    pub fn system_content(&self) -> &str {
        &self.system
    }

    /// Replace the system preamble; visible in the very next `history()`
    pub fn set_system_content(&mut self, content: impl Into<String>) {
        self.system = content.into();
    }

    pub fn history_trim(&self) -> usize {
        self.history_trim
    }

    pub fn last_message_at(&self) -> Option<DateTime<Utc>> {
        self.last_message_at
    }

    /// Append a turn timestamped now
    pub fn append(&mut self, role: Role, content: impl Into<String>) {
        self.append_at(role, content, Utc::now());
    }

    /// Append a turn at an explicit time.
    ///
    /// An idle gap longer than the reset threshold clears the turns first.
    /// Afterwards the oldest turn is evicted while the history is over
    /// `history_trim`.
    pub fn append_at(&mut self, role: Role, content: impl Into<String>, now: DateTime<Utc>) {
        if let Some(last) = self.last_message_at {
            if now - last > self.idle_reset && !self.turns.is_empty() {
                debug!(
                    "Idle for {}s, dropping {} turns",
                    (now - last).num_seconds(),
                    self.turns.len()
                );
                self.turns.clear();
            }
        }

        self.turns.push_back(Message::new(role, content));
        self.last_message_at = Some(now);

        while self.len() > self.history_trim {
            self.turns.pop_front();
        }
    }

    /// Start a new session. Usage ledgers survive.
    pub fn reset(&mut self) {
        self.turns.clear();
        self.last_message_at = None;
        self.sessions += 1;
        self.session_messages = 0;
        self.voice.session_messages = 0;
        self.voice.session_duration_secs = 0.0;
    }

    /// Drop the oldest turn to make room after a context overflow.
    ///
    /// Returns false when there is no turn left to drop. The token counts are
    /// informational only: exactly one turn goes per call, so callers must
    /// re-measure before pruning again.
    pub fn prune_oldest(&mut self, current_tokens: u32, max_tokens: u32) -> bool {
        match self.turns.pop_front() {
            Some(dropped) => {
                debug!(
                    "Pruned oldest {} turn ({} tokens > {} max), {} left",
                    dropped.role,
                    current_tokens,
                    max_tokens,
                    self.turns.len()
                );
                true
            }
            None => false,
        }
    }

    pub fn record_voice_usage(&mut self, duration_secs: f64) {
        self.voice.messages += 1;
        self.voice.duration_secs += duration_secs;
        self.voice.session_messages += 1;
        self.voice.session_duration_secs += duration_secs;
    }

    pub fn record_model_usage(&mut self, model: &str, usage: &TokenUsage) {
        self.models
            .entry(model.to_string())
            .or_default()
            .record(usage);
        self.session_messages += 1;
    }

    pub fn record_error(&mut self, model: &str) {
        self.models
            .entry(model.to_string())
            .or_default()
            .record_error();
    }

    pub fn ledger(&self, model: &str) -> Option<&UsageLedger> {
        self.models.get(model)
    }

    pub fn models(&self) -> &HashMap<String, UsageLedger> {
        &self.models
    }

    /// Messages answered across all models and sessions
    pub fn total_messages(&self) -> u64 {
        self.models.values().map(|l| l.message_count).sum()
    }

    pub fn total_tokens(&self) -> u64 {
        self.models.values().map(|l| l.total_tokens).sum()
    }

    pub fn sessions(&self) -> u64 {
        self.sessions
    }

    pub fn session_messages(&self) -> u64 {
        self.session_messages
    }

    pub fn voice(&self) -> &VoiceUsage {
        &self.voice
    }

    /// Follow-up suggestions requested per answer (0 = disabled)
    pub fn suggestion_count(&self) -> u8 {
        self.suggestion_count
    }

    pub fn set_suggestion_count(&mut self, count: u8) {
        self.suggestion_count = count;
    }
}
