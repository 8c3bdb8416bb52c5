//! Completion Orchestrator
//!
//! Gets a completion for a conversation, recovering from context overflow:
//!
//! 1. The default model overflowing by less than the large model's ceiling is
//!    retried once on the large-context model.
//! 2. Any other overflow drops the oldest turn and retries on the same model.
//! 3. Once only the system message is left, the original overflow is returned.
//!
//! Rate limits, timeouts and transport errors are returned immediately.
//! Each prune removes one turn, so the loop is bounded by the history length
//! plus the single model switch.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::client::{Completion, CompletionClient, CompletionError, CompletionOptions};
use crate::config::Config;
use crate::conversation::{ConversationState, Message};

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_LARGE_CONTEXT_MODEL: &str = "gpt-3.5-turbo-16k";
pub const DEFAULT_LARGE_CONTEXT_LIMIT: u32 = 16_000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Model selection and limits
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Small-context model used for ordinary requests
    pub default_model: String,
    /// Switch target when the default model overflows
    pub large_context_model: String,
    /// Overflows at or above this size are pruned instead of switched
    pub large_context_limit: u32,
    /// Upper bound for a single provider call
    pub request_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            large_context_model: DEFAULT_LARGE_CONTEXT_MODEL.to_string(),
            large_context_limit: DEFAULT_LARGE_CONTEXT_LIMIT,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_model: config.default_model.clone(),
            large_context_model: config.large_context_model.clone(),
            large_context_limit: config.large_context_limit,
            request_timeout: config.request_timeout,
        }
    }
}

/// A completion that could not be recovered, with the model that produced it
#[derive(Debug, thiserror::Error)]
#[error("{model}: {source}")]
pub struct CompletionFailure {
    pub model: String,
    #[source]
    pub source: CompletionError,
}

impl CompletionFailure {
    fn new(model: &str, source: CompletionError) -> Self {
        Self {
            model: model.to_string(),
            source,
        }
    }
}

pub struct CompletionOrchestrator {
    client: Arc<dyn CompletionClient>,
    settings: OrchestratorSettings,
}

impl CompletionOrchestrator {
    pub fn new(client: Arc<dyn CompletionClient>, settings: OrchestratorSettings) -> Self {
        Self { client, settings }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn default_model(&self) -> &str {
        &self.settings.default_model
    }

    /// Whether an overflow on `model` may be retried on the large-context model
    fn can_switch(&self, model: &str, actual_tokens: u32) -> bool {
        model == self.settings.default_model
            && model != self.settings.large_context_model
            && actual_tokens < self.settings.large_context_limit
    }

    /// One provider call with the configured timeout
    pub async fn request(
        &self,
        model: &str,
        messages: &[Message],
        options: CompletionOptions,
    ) -> Result<Completion, CompletionError> {
        let timeout = self.settings.request_timeout;
        match tokio::time::timeout(timeout, self.client.complete(model, messages, options)).await {
            Ok(result) => result,
            Err(_) => Err(CompletionError::Timeout(timeout)),
        }
    }

    /// Complete the conversation's current history on `model`.
    ///
    /// May prune `conversation` while recovering from overflow. The returned
    /// completion's `model` is the model that actually answered.
    pub async fn complete(
        &self,
        model: &str,
        conversation: &mut ConversationState,
    ) -> Result<Completion, CompletionFailure> {
        let mut model = model.to_string();
        let mut allow_switch = true;
        // every turn pruned, one switch, and the first attempt
        let max_attempts = conversation.len() + 1;

        for attempt in 1..=max_attempts {
            let messages = conversation.history();
            debug!(
                "Completion attempt {}/{}: model={}, messages={}",
                attempt,
                max_attempts,
                model,
                messages.len()
            );

            let error = match self.request(&model, &messages, CompletionOptions::default()).await {
                Ok(completion) => return Ok(completion),
                Err(error) => error,
            };

            let (max_tokens, actual_tokens) = match &error {
                CompletionError::ContextLengthExceeded {
                    max_tokens,
                    actual_tokens,
                    ..
                } => (*max_tokens, *actual_tokens),
                _ => {
                    warn!("Completion failed on {}: {}", model, error);
                    return Err(CompletionFailure::new(&model, error));
                }
            };

            if allow_switch && self.can_switch(&model, actual_tokens) {
                info!(
                    "Context overflow on {} ({} > {}), switching to {}",
                    model, actual_tokens, max_tokens, self.settings.large_context_model
                );
                model = self.settings.large_context_model.clone();
                allow_switch = false;
                continue;
            }
            allow_switch = false;

            if !conversation.prune_oldest(actual_tokens, max_tokens) {
                warn!(
                    "Context overflow on {} with minimal history ({} > {})",
                    model, actual_tokens, max_tokens
                );
                return Err(CompletionFailure::new(&model, error));
            }
            info!(
                "Context overflow on {} ({} > {}), pruned to {} messages",
                model,
                actual_tokens,
                max_tokens,
                conversation.len()
            );
        }

        Err(CompletionFailure::new(
            &model,
            CompletionError::Transport(format!("Gave up after {} attempts", max_attempts)),
        ))
    }
}
