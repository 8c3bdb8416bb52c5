//! OpenAI API Client
//!
//! Chat completions and audio transcription against an OpenAI-compatible API.
//! Non-success responses are classified into [`CompletionError`] variants.

use async_trait::async_trait;
use reqwest::{multipart, Client};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::client::{Completion, CompletionClient, CompletionError, CompletionOptions};
use crate::config::Config;
use crate::conversation::Message;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// OpenAI API client
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

/// API request
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "is_one")]
    n: u8,
}

fn is_one(n: &u8) -> bool {
    *n == 1
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Create from config
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.openai_api_key.clone(), config.openai_api_base.clone())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Transcribe an audio clip.
    ///
    /// `prompt` steers the transcription, usually the last message of the chat.
    pub async fn transcribe(
        &self,
        model: &str,
        audio: Vec<u8>,
        file_name: &str,
        prompt: &str,
    ) -> Result<String, CompletionError> {
        let part = multipart::Part::bytes(audio)
            .file_name(file_name.to_string())
            .mime_str("audio/ogg")
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        let form = multipart::Form::new()
            .text("model", model.to_string())
            .text("prompt", prompt.to_string())
            .part("file", part);

        debug!("Calling transcription API: model={}, file={}", model, file_name);

        let response = self
            .client
            .post(self.url("audio/transcriptions"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::from_response(status, &body));
        }

        let result: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Transport(format!("Malformed transcription: {}", e)))?;

        Ok(result.text)
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        options: CompletionOptions,
    ) -> Result<Completion, CompletionError> {
        let request = ChatRequest {
            model,
            messages,
            n: options.n.max(1),
        };

        debug!("Calling OpenAI API: model={}, messages={}, n={}", model, messages.len(), request.n);

        let response = self
            .client
            .post(self.url("chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::from_response(status, &body));
        }

        let completion: Completion = response
            .json()
            .await
            .map_err(|e| CompletionError::Transport(format!("Malformed completion: {}", e)))?;

        if completion.choices.is_empty() {
            return Err(CompletionError::Transport("Completion has no choices".to_string()));
        }

        info!(
            "OpenAI response: model={}, prompt={}, completion={}, finish={:?}",
            completion.model,
            completion.usage.prompt_tokens,
            completion.usage.completion_tokens,
            completion.finish_reason()
        );

        Ok(completion)
    }
}
