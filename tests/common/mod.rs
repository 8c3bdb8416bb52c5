//! Shared test helpers: a scripted completion client

#![allow(dead_code)]

use async_trait::async_trait;
use gpt_relay_bot::client::Choice;
use gpt_relay_bot::{Completion, CompletionClient, CompletionError, CompletionOptions, Message, TokenUsage};
use std::collections::VecDeque;
use std::sync::Mutex;

/// One recorded call to the client
#[derive(Debug, Clone)]
pub struct Call {
    pub model: String,
    pub messages: Vec<Message>,
    pub n: u8,
}

/// Replays queued results in order and records every call
#[derive(Default)]
pub struct ScriptedClient {
    responses: Mutex<VecDeque<Result<Completion, CompletionError>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedClient {
    pub fn new(responses: Vec<Result<Completion, CompletionError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn models(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.model).collect()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        options: CompletionOptions,
    ) -> Result<Completion, CompletionError> {
        self.calls.lock().unwrap().push(Call {
            model: model.to_string(),
            messages: messages.to_vec(),
            n: options.n,
        });
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(CompletionError::Transport("script exhausted".to_string())))
    }
}

/// Completion whose `model` echoes the model that answered
pub fn answer(model: &str, content: &str, finish_reason: &str, usage: TokenUsage) -> Completion {
    Completion {
        model: model.to_string(),
        choices: vec![Choice {
            message: Message::assistant(content),
            finish_reason: Some(finish_reason.to_string()),
        }],
        usage,
    }
}

/// Completion with several choices
pub fn choices(model: &str, contents: &[&str]) -> Completion {
    Completion {
        model: model.to_string(),
        choices: contents
            .iter()
            .map(|c| Choice {
                message: Message::assistant(*c),
                finish_reason: Some("stop".to_string()),
            })
            .collect(),
        usage: TokenUsage::new(5, 5, 10),
    }
}

pub fn overflow(max_tokens: u32, actual_tokens: u32) -> CompletionError {
    CompletionError::ContextLengthExceeded {
        max_tokens,
        actual_tokens,
        message: format!(
            "This model's maximum context length is {} tokens. However, your messages resulted in {} tokens.",
            max_tokens, actual_tokens
        ),
    }
}
