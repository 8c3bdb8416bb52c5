//! Message Relay
//!
//! Transport-independent handling of one inbound chat message: append it to
//! the chat's conversation, run the completion, record usage and build the
//! reply. The conversation lock is held for the whole exchange, so messages
//! from the same chat are answered one at a time.

use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::client::CompletionOptions;
use crate::conversation::{Message, Role};
use crate::orchestrator::{CompletionFailure, CompletionOrchestrator};
use crate::registry::ConversationRegistry;
use crate::stats::StatsReport;

/// System prompt for follow-up suggestion requests
pub const SUGGESTION_PROMPT: &str = "Generate a short followup question up to 10 tokens long";

/// Appended to answers cut off by the token limit
pub const TRUNCATION_MARK: &str = "…";

/// Answers this short never get suggestions
const MIN_SUGGESTION_ANSWER_CHARS: usize = 5;

/// Message the inbound message replied to
#[derive(Debug, Clone)]
pub struct QuotedMessage {
    pub text: String,
    pub from_bot: bool,
}

/// One inbound chat message, already stripped of bot mentions
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub chat_id: i64,
    pub text: String,
    pub quoted: Option<QuotedMessage>,
    /// Private chat or explicit mention of the bot
    pub addressed: bool,
}

impl InboundMessage {
    /// Message in a private chat
    pub fn private(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            quoted: None,
            addressed: true,
        }
    }
}

/// Answer for the transport
#[derive(Debug, Clone, PartialEq)]
pub struct RelayReply {
    /// Answer text, with the truncation mark when cut off
    pub text: String,
    /// Model that answered
    pub model: String,
    pub truncated: bool,
    pub suggestions: Vec<String>,
}

pub struct MessageRelay {
    registry: Arc<ConversationRegistry>,
    orchestrator: CompletionOrchestrator,
}

impl MessageRelay {
    pub fn new(registry: Arc<ConversationRegistry>, orchestrator: CompletionOrchestrator) -> Self {
        Self {
            registry,
            orchestrator,
        }
    }

    pub fn registry(&self) -> &ConversationRegistry {
        &self.registry
    }

    /// Relay one message.
    ///
    /// Returns `Ok(None)` when the message was only recorded (group chat
    /// without a mention, or nothing to append). Failures are recorded against
    /// the model that failed before being returned.
    pub async fn handle(&self, inbound: InboundMessage) -> Result<Option<RelayReply>, CompletionFailure> {
        let handle = self.registry.get(inbound.chat_id).await;
        let mut conversation = handle.lock().await;

        let mut addressed = inbound.addressed;
        let mut appended = false;

        if let Some(quoted) = inbound.quoted.as_ref().filter(|q| !q.text.is_empty()) {
            let role = Role::from_sender(quoted.from_bot);
            conversation.append(role, quoted.text.clone());
            addressed |= role == Role::Assistant;
            appended = true;
        }

        if !inbound.text.is_empty() {
            conversation.append(Role::User, inbound.text.clone());
            appended = true;
        }

        if !addressed || !appended {
            debug!(
                "Chat {}: recorded without answering (addressed={}, appended={})",
                inbound.chat_id, addressed, appended
            );
            return Ok(None);
        }

        let model = self.orchestrator.default_model().to_string();
        let completion = match self.orchestrator.complete(&model, &mut conversation).await {
            Ok(completion) => completion,
            Err(failure) => {
                error!("Chat {}: completion failed: {}", inbound.chat_id, failure);
                conversation.record_error(&failure.model);
                return Err(failure);
            }
        };

        let answer = completion.content().unwrap_or_default().to_string();
        conversation.append(Role::Assistant, answer.clone());
        conversation.record_model_usage(&completion.model, &completion.usage);

        let truncated = completion.is_truncated();
        let mut text = answer.clone();
        if truncated {
            text.push_str(TRUNCATION_MARK);
        }

        let count = conversation.suggestion_count();
        let suggestions = if count > 0 && answer.chars().count() > MIN_SUGGESTION_ANSWER_CHARS {
            self.suggest(&inbound.text, &answer, count).await
        } else {
            Vec::new()
        };

        Ok(Some(RelayReply {
            text,
            model: completion.model,
            truncated,
            suggestions,
        }))
    }

    /// Ask for `count` short follow-up questions. Failures yield none.
    async fn suggest(&self, question: &str, answer: &str, count: u8) -> Vec<String> {
        let messages = [
            Message::system(SUGGESTION_PROMPT),
            Message::user(question),
            Message::assistant(answer),
        ];

        match self
            .orchestrator
            .request(self.orchestrator.default_model(), &messages, CompletionOptions { n: count })
            .await
        {
            Ok(completion) => completion
                .contents()
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Err(e) => {
                warn!("Suggestion request failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Start a new session for the chat
    pub async fn reset(&self, chat_id: i64) {
        self.registry.get(chat_id).await.lock().await.reset();
    }

    /// Replace the chat's system preamble
    pub async fn set_role(&self, chat_id: i64, role: &str) {
        self.registry
            .get(chat_id)
            .await
            .lock()
            .await
            .set_system_content(role);
    }

    pub async fn set_suggestions(&self, chat_id: i64, count: u8) {
        self.registry
            .get(chat_id)
            .await
            .lock()
            .await
            .set_suggestion_count(count);
    }

    pub async fn record_voice(&self, chat_id: i64, duration_secs: f64) {
        self.registry
            .get(chat_id)
            .await
            .lock()
            .await
            .record_voice_usage(duration_secs);
    }

    /// Transcription hint: the most recent message of the chat
    pub async fn transcription_prompt(&self, chat_id: i64) -> String {
        let handle = self.registry.get(chat_id).await;
        let conversation = handle.lock().await;
        conversation.last_content().to_string()
    }

    pub async fn stats(&self, chat_id: i64) -> StatsReport {
        let handle = self.registry.get(chat_id).await;
        let conversation = handle.lock().await;
        StatsReport::from_conversation(&conversation)
    }
}
