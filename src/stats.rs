//! Usage statistics report
//!
//! Read-only view over a [`ConversationState`] and its ledgers.

use std::fmt::Write;

use crate::conversation::{ConversationState, VoiceUsage};
use crate::usage::{format_tokens, UsageLedger};

/// Per-model line of the report
#[derive(Debug, Clone, PartialEq)]
pub struct ModelStats {
    pub model: String,
    pub message_count: u64,
    pub error_count: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub prompt_percent: f64,
    pub completion_percent: f64,
}

impl ModelStats {
    fn from_ledger(model: &str, ledger: &UsageLedger) -> Self {
        Self {
            model: model.to_string(),
            message_count: ledger.message_count,
            error_count: ledger.error_count,
            prompt_tokens: ledger.prompt_tokens,
            completion_tokens: ledger.completion_tokens,
            total_tokens: ledger.total_tokens,
            prompt_percent: ledger.prompt_share(),
            completion_percent: ledger.completion_share(),
        }
    }
}

/// Usage report for one chat
#[derive(Debug, Clone, PartialEq)]
pub struct StatsReport {
    pub total_messages: u64,
    pub sessions: u64,
    pub session_messages: u64,
    pub voice: VoiceUsage,
    /// Sorted by model name
    pub models: Vec<ModelStats>,
}

impl StatsReport {
    pub fn from_conversation(conversation: &ConversationState) -> Self {
        let mut models: Vec<ModelStats> = conversation
            .models()
            .iter()
            .map(|(name, ledger)| ModelStats::from_ledger(name, ledger))
            .collect();
        models.sort_by(|a, b| a.model.cmp(&b.model));

        Self {
            total_messages: conversation.total_messages(),
            sessions: conversation.sessions(),
            session_messages: conversation.session_messages(),
            voice: conversation.voice().clone(),
            models,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.models.iter().map(|m| m.total_tokens).sum()
    }

    /// True when no tokens have been spent yet
    pub fn is_empty(&self) -> bool {
        self.total_tokens() == 0
    }

    /// Plain-text rendering for the chat
    pub fn render(&self) -> String {
        let sessions = self.sessions.max(1) as f64;
        let mut out = String::new();

        let _ = writeln!(
            out,
            "Total messages: {} in {} sessions, {} in this session.",
            self.total_messages, self.sessions, self.session_messages
        );
        let _ = writeln!(
            out,
            "Messages per session: {:.1}",
            self.total_messages as f64 / sessions
        );
        let _ = writeln!(
            out,
            "Total voice messages: {} ({:.0} sec), {} ({:.0} sec) in this session.",
            self.voice.messages,
            self.voice.duration_secs,
            self.voice.session_messages,
            self.voice.session_duration_secs
        );
        let _ = writeln!(
            out,
            "Voice messages per session: {:.1}",
            self.voice.messages as f64 / sessions
        );

        for model in &self.models {
            let _ = writeln!(out);
            let _ = writeln!(out, "{}: {} messages", model.model, model.message_count);
            if model.error_count > 0 {
                let _ = writeln!(out, "  Errors: {}", model.error_count);
            }
            let _ = writeln!(
                out,
                "  Prompt tokens: {} ({:.1}%)",
                format_tokens(model.prompt_tokens),
                model.prompt_percent
            );
            let _ = writeln!(
                out,
                "  Completion tokens: {} ({:.1}%)",
                format_tokens(model.completion_tokens),
                model.completion_percent
            );
            let _ = writeln!(out, "  Total tokens: {}", format_tokens(model.total_tokens));
        }

        out.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::TokenUsage;

    #[test]
    fn test_report_two_models() {
        let mut conversation = ConversationState::default();
        for _ in 0..3 {
            conversation.record_model_usage("gpt-3.5-turbo", &TokenUsage::new(30, 10, 40));
        }
        conversation.record_model_usage("gpt-3.5-turbo-16k", &TokenUsage::new(900, 100, 1000));

        let report = StatsReport::from_conversation(&conversation);
        assert_eq!(report.total_messages, 4);
        assert_eq!(report.models.len(), 2);
        assert_eq!(report.models[0].model, "gpt-3.5-turbo");
        assert_eq!(report.models[0].message_count, 3);
        assert_eq!(report.models[1].message_count, 1);

        for model in &report.models {
            assert!((model.prompt_percent + model.completion_percent - 100.0).abs() < 0.001);
        }
        assert!((report.models[0].prompt_percent - 75.0).abs() < 0.001);
        assert_eq!(report.total_tokens(), 1120);
    }

    #[test]
    fn test_empty_report() {
        let report = StatsReport::from_conversation(&ConversationState::default());
        assert!(report.is_empty());
        assert_eq!(report.total_messages, 0);
        assert_eq!(report.sessions, 1);
    }

    #[test]
    fn test_render_mentions_models_and_voice() {
        let mut conversation = ConversationState::default();
        conversation.record_model_usage("gpt-3.5-turbo", &TokenUsage::new(1500, 500, 2000));
        conversation.record_error("gpt-3.5-turbo");
        conversation.record_voice_usage(12.0);

        let text = StatsReport::from_conversation(&conversation).render();
        assert!(text.contains("Total messages: 1 in 1 sessions"));
        assert!(text.contains("Total voice messages: 1 (12 sec)"));
        assert!(text.contains("gpt-3.5-turbo: 1 messages"));
        assert!(text.contains("Errors: 1"));
        assert!(text.contains("Prompt tokens: 1.5K (75.0%)"));
        assert!(text.contains("Total tokens: 2.0K"));
    }
}
