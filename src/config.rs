//! Configuration management

use anyhow::{bail, Context, Result};
use std::str::FromStr;
use std::time::Duration;

use crate::conversation::{
    ConversationSettings, DEFAULT_HISTORY_TRIM, DEFAULT_IDLE_RESET_SECS, DEFAULT_SYSTEM_PROMPT,
};
use crate::openai::DEFAULT_API_BASE;
use crate::orchestrator::{
    DEFAULT_LARGE_CONTEXT_LIMIT, DEFAULT_LARGE_CONTEXT_MODEL, DEFAULT_MODEL,
    DEFAULT_REQUEST_TIMEOUT_SECS,
};

/// Bot configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Telegram bot token
    pub telegram_token: String,

    /// Bot username for mention detection (falls back to getMe)
    pub bot_name: Option<String>,

    /// OpenAI API key
    pub openai_api_key: String,

    /// OpenAI-compatible API base URL
    pub openai_api_base: String,

    /// Small-context default model
    pub default_model: String,

    /// Model used when the default one overflows
    pub large_context_model: String,

    /// Overflows at or above this token count are pruned, not switched
    pub large_context_limit: u32,

    /// Voice transcription model
    pub transcription_model: String,

    /// Initial system preamble
    pub system_prompt: String,

    /// Max history length, system message included
    pub history_trim: usize,

    /// Idle gap that clears the context
    pub idle_reset_secs: i64,

    /// Timeout for a single completion call
    pub request_timeout: Duration,

    /// Longest voice message accepted, in seconds
    pub max_voice_secs: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let telegram_token = std::env::var("TELOXIDE_TOKEN")
            .or_else(|_| std::env::var("BOT_TOKEN"))
            .context("Missing TELOXIDE_TOKEN (or BOT_TOKEN) environment variable")?;

        let bot_name = std::env::var("BOT_NAME")
            .ok()
            .map(|name| name.trim_start_matches('@').to_string())
            .filter(|name| !name.is_empty());

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .context("Missing OPENAI_API_KEY environment variable")?;

        let openai_api_base = std::env::var("OPENAI_API_BASE")
            .unwrap_or_else(|_| DEFAULT_API_BASE.to_string());

        let default_model = std::env::var("DEFAULT_MODEL")
            .unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        let large_context_model = std::env::var("LARGE_CONTEXT_MODEL")
            .unwrap_or_else(|_| DEFAULT_LARGE_CONTEXT_MODEL.to_string());

        let transcription_model = std::env::var("TRANSCRIPTION_MODEL")
            .unwrap_or_else(|_| "whisper-1".to_string());

        let system_prompt = std::env::var("SYSTEM_PROMPT")
            .unwrap_or_else(|_| DEFAULT_SYSTEM_PROMPT.to_string());

        let large_context_limit = parse_var("LARGE_CONTEXT_LIMIT", DEFAULT_LARGE_CONTEXT_LIMIT)?;
        let history_trim = parse_var("HISTORY_TRIM", DEFAULT_HISTORY_TRIM)?;
        let idle_reset_secs = parse_var("IDLE_RESET_SECS", DEFAULT_IDLE_RESET_SECS)?;
        let request_timeout_secs = parse_var("REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;
        let max_voice_secs = parse_var("MAX_VOICE_SECS", 600)?;

        let config = Self {
            telegram_token,
            bot_name,
            openai_api_key,
            openai_api_base,
            default_model,
            large_context_model,
            large_context_limit,
            transcription_model,
            system_prompt,
            history_trim,
            idle_reset_secs,
            request_timeout: Duration::from_secs(request_timeout_secs),
            max_voice_secs,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.history_trim < 2 {
            bail!("HISTORY_TRIM must be at least 2 (got {})", self.history_trim);
        }
        if self.idle_reset_secs <= 0 {
            bail!("IDLE_RESET_SECS must be positive (got {})", self.idle_reset_secs);
        }
        if chrono::Duration::try_seconds(self.idle_reset_secs).is_none() {
            bail!("IDLE_RESET_SECS is out of range (got {})", self.idle_reset_secs);
        }
        if self.request_timeout.is_zero() {
            bail!("REQUEST_TIMEOUT_SECS must be positive");
        }
        Ok(())
    }

    /// Settings for newly created conversations. An out-of-range idle reset
    /// falls back to the default.
    pub fn conversation_settings(&self) -> ConversationSettings {
        let idle_reset = chrono::Duration::try_seconds(self.idle_reset_secs)
            .unwrap_or_else(|| chrono::Duration::seconds(DEFAULT_IDLE_RESET_SECS));
        ConversationSettings {
            system_prompt: self.system_prompt.clone(),
            history_trim: self.history_trim,
            idle_reset,
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid {}={:?}: {}", name, raw, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            telegram_token: "token".to_string(),
            bot_name: Some("relay_bot".to_string()),
            openai_api_key: "sk-test".to_string(),
            openai_api_base: DEFAULT_API_BASE.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            large_context_model: DEFAULT_LARGE_CONTEXT_MODEL.to_string(),
            large_context_limit: DEFAULT_LARGE_CONTEXT_LIMIT,
            transcription_model: "whisper-1".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            history_trim: DEFAULT_HISTORY_TRIM,
            idle_reset_secs: DEFAULT_IDLE_RESET_SECS,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_voice_secs: 600,
        }
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value::<usize>("HISTORY_TRIM", " 12 ").unwrap(), 12);
        let err = parse_value::<u32>("LARGE_CONTEXT_LIMIT", "lots").unwrap_err();
        assert!(err.to_string().contains("LARGE_CONTEXT_LIMIT"));
    }

    #[test]
    fn test_validate() {
        assert!(sample().validate().is_ok());

        let mut config = sample();
        config.history_trim = 1;
        assert!(config.validate().is_err());

        let mut config = sample();
        config.request_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_idle_reset_out_of_range() {
        let mut config = sample();
        config.idle_reset_secs = i64::MAX;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("IDLE_RESET_SECS"));

        let settings = config.conversation_settings();
        assert_eq!(settings.idle_reset, chrono::Duration::seconds(DEFAULT_IDLE_RESET_SECS));
    }

    #[test]
    fn test_conversation_settings() {
        let mut config = sample();
        config.system_prompt = "Answer in French".to_string();
        config.idle_reset_secs = 90;

        let settings = config.conversation_settings();
        assert_eq!(settings.system_prompt, "Answer in French");
        assert_eq!(settings.history_trim, DEFAULT_HISTORY_TRIM);
        assert_eq!(settings.idle_reset, chrono::Duration::seconds(90));
    }
}
