//! Telegram Bot transport
//!
//! Receives updates through an explicit teloxide Dispatcher, parses commands,
//! transcribes voice messages and hands text to the [`MessageRelay`].
//!
//! Group chats are only answered when the bot is mentioned or replied to;
//! other messages are still recorded as context.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use teloxide::{
    dispatching::{Dispatcher, UpdateFilterExt},
    dptree,
    error_handlers::LoggingErrorHandler,
    net::Download,
    prelude::*,
    types::{
        ChatAction, KeyboardButton, KeyboardMarkup, KeyboardRemove, ParseMode, ReplyMarkup, Update,
        Voice,
    },
    utils::html,
};

use crate::client::CompletionClient;
use crate::config::Config;
use crate::openai::OpenAiClient;
use crate::orchestrator::{CompletionOrchestrator, OrchestratorSettings};
use crate::registry::ConversationRegistry;
use crate::relay::{InboundMessage, MessageRelay, QuotedMessage, RelayReply};

/// Telegram caps messages at 4096 chars; leave some headroom
pub(crate) const MAX_MESSAGE_CHARS: usize = 4000;

/// Upper bound for `/suggestions`
pub(crate) const MAX_SUGGESTIONS: u8 = 5;

const ERROR_REPLY: &str = "Error occurred. Please try again later.";

const HELP_TEXT: &str = "This is a chatbot that uses OpenAI's API to generate responses to your messages.\n\
    - You can start a new conversation by typing /new.\n\
    - You can set bot role in the conversation by typing /role <role>.\n\
    - You can get follow-up suggestions with /suggestions <number> (0 disables).\n\
    - You can view usage with /stats.\n\
    - You can also send voice messages to the bot and it will transcribe them.";

static RE_CHAT_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*https://t\.me/").unwrap());

/// Parsed bot command
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BotCommand {
    Start,
    Help,
    New,
    /// `/role` with its argument, empty when missing
    Role(String),
    Stats,
    /// `/suggestions` with its argument, `None` when missing or not a number
    Suggestions(Option<u8>),
    Unknown(String),
}

impl BotCommand {
    /// Parse `/cmd[@bot] args`. Returns `None` for non-commands and for
    /// commands addressed to another bot.
    pub(crate) fn parse(text: &str, bot_name: &str) -> Option<Self> {
        let text = text.trim();
        if !text.starts_with('/') {
            return None;
        }

        let parts: Vec<&str> = text.splitn(2, char::is_whitespace).collect();
        let args = parts.get(1).map(|s| s.trim()).unwrap_or("");
        let (cmd, target) = match parts[0].split_once('@') {
            Some((cmd, target)) => (cmd, Some(target)),
            None => (parts[0], None),
        };

        if let Some(target) = target {
            if !target.eq_ignore_ascii_case(bot_name) {
                return None;
            }
        }

        let command = match cmd.to_lowercase().as_str() {
            "/start" => Self::Start,
            "/help" => Self::Help,
            "/new" => Self::New,
            "/role" => Self::Role(args.to_string()),
            "/stats" => Self::Stats,
            "/suggestions" => Self::Suggestions(args.parse().ok()),
            _ => Self::Unknown(cmd.to_string()),
        };
        Some(command)
    }
}

/// Remove `@bot_name` mentions. Returns the cleaned text and whether the bot
/// was mentioned.
pub(crate) fn strip_mention(text: &str, bot_name: &str) -> (String, bool) {
    if bot_name.is_empty() {
        return (text.to_string(), false);
    }

    let pattern = format!(r"(?i)@{}\b", regex::escape(bot_name));
    let re = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(_) => return (text.to_string(), false),
    };

    if !re.is_match(text) {
        return (text.to_string(), false);
    }

    let cleaned = re.replace_all(text, "");
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    (cleaned, true)
}

/// Links to other Telegram chats are refused
pub(crate) fn is_chat_link(text: &str) -> bool {
    RE_CHAT_LINK.is_match(text)
}

/// Split text into chunks of at most `max` chars
pub(crate) fn split_message(text: &str, max: usize) -> Vec<&str> {
    let max = max.max(1);
    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        let split_at = remaining
            .char_indices()
            .nth(max)
            .map(|(i, _)| i)
            .unwrap_or(remaining.len());
        let (chunk, rest) = remaining.split_at(split_at);
        chunks.push(chunk);
        remaining = rest;
    }
    chunks
}

/// Convert model markdown to Telegram HTML.
///
/// Handles fenced code blocks (with an optional language tag), inline code
/// and `**bold**`. Everything else is escaped. An unterminated fence runs to
/// the end of the text.
pub(crate) fn markdown_to_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 32);
    let mut rest = text;
    let mut bold = false;

    while let Some(c) = rest.chars().next() {
        if let Some(after) = rest.strip_prefix("```") {
            let (lang, body) = match after.split_once('\n') {
                Some((tag, body)) if is_language_tag(tag) => (tag.trim(), body),
                _ => ("", after),
            };
            let (code, next) = body.split_once("```").unwrap_or((body, ""));

            if lang.is_empty() {
                out.push_str("<pre><code>");
            } else {
                out.push_str(&format!("<pre><code class=\"language-{}\">", lang));
            }
            out.push_str(&html::escape(code.trim_end_matches('\n')));
            out.push_str("</code></pre>");
            rest = next;
        } else if let Some((code, next)) = rest.strip_prefix('`').and_then(|a| a.split_once('`')) {
            out.push_str("<code>");
            out.push_str(&html::escape(code));
            out.push_str("</code>");
            rest = next;
        } else if let Some(after) = rest.strip_prefix("**") {
            if bold {
                out.push_str("</b>");
                bold = false;
            } else if after.contains("**") {
                out.push_str("<b>");
                bold = true;
            } else {
                out.push_str("**");
            }
            rest = after;
        } else {
            let len = c.len_utf8();
            out.push_str(&html::escape(&rest[..len]));
            rest = &rest[len..];
        }
    }

    if bold {
        out.push_str("</b>");
    }
    out
}

fn is_language_tag(tag: &str) -> bool {
    tag.trim()
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '+' | '#'))
}

/// Reply keyboard with one suggestion per row, or keyboard removal
pub(crate) fn suggestion_markup(suggestions: &[String]) -> ReplyMarkup {
    if suggestions.is_empty() {
        return ReplyMarkup::KeyboardRemove(KeyboardRemove::new());
    }

    let rows: Vec<Vec<KeyboardButton>> = suggestions
        .iter()
        .map(|s| vec![KeyboardButton::new(s.clone())])
        .collect();
    ReplyMarkup::Keyboard(KeyboardMarkup::new(rows))
}

/// Shared handler state
struct BotData {
    relay: MessageRelay,
    openai: OpenAiClient,
    config: Config,
    bot_name: String,
}

/// Run Telegram bot with explicit Dispatcher for reliable polling
pub async fn run_telegram_bot(config: Config) -> Result<()> {
    let bot = Bot::new(config.telegram_token.clone());

    tracing::info!("Verifying bot token...");
    let me = match bot.get_me().await {
        Ok(me) => me,
        Err(e) => {
            tracing::error!("Failed to authenticate bot: {}", e);
            anyhow::bail!("Bot authentication failed: {}", e);
        }
    };
    let bot_name = config
        .bot_name
        .clone()
        .or_else(|| me.username.clone())
        .unwrap_or_default();
    tracing::info!("Bot authenticated: @{} (ID: {})", bot_name, me.id);

    // Polling does not work while a webhook is set
    if let Err(e) = bot.delete_webhook().await {
        tracing::warn!("Failed to delete webhook: {} (continuing anyway)", e);
    }

    let openai = OpenAiClient::from_config(&config);
    let client: Arc<dyn CompletionClient> = Arc::new(openai.clone());
    let orchestrator = CompletionOrchestrator::new(client, OrchestratorSettings::from_config(&config));
    let registry = Arc::new(ConversationRegistry::new(config.conversation_settings()));

    tracing::info!(
        "Models: default={}, large={} (switch below {} tokens)",
        config.default_model,
        config.large_context_model,
        config.large_context_limit
    );
    tracing::info!(
        "History: {} messages, idle reset after {}s, request timeout {:?}",
        config.history_trim,
        config.idle_reset_secs,
        config.request_timeout
    );

    let handler_data = Arc::new(BotData {
        relay: MessageRelay::new(registry, orchestrator),
        openai,
        config,
        bot_name,
    });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(message_handler));

    tracing::info!("Starting dispatcher with long polling...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![handler_data])
        .default_handler(|upd| async move {
            tracing::debug!("Unhandled update: {:?}", upd);
        })
        .error_handler(LoggingErrorHandler::with_custom_text(
            "Error in message handler",
        ))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    tracing::warn!("Dispatcher stopped");
    Ok(())
}

/// Message handler endpoint for the dispatcher
async fn message_handler(bot: Bot, msg: Message, data: Arc<BotData>) -> ResponseResult<()> {
    let chat_id = msg.chat.id.0;
    let user_id = msg.from.as_ref().map(|u| u.id.0).unwrap_or(0);
    let text_preview = msg
        .text()
        .unwrap_or("<non-text>")
        .chars()
        .take(50)
        .collect::<String>();

    tracing::info!(
        ">>> Message received: user={}, chat={}, text={:?}",
        user_id,
        chat_id,
        text_preview
    );

    if let Err(e) = handle_message(&bot, &msg, &data).await {
        tracing::error!("Error handling message: {:#}", e);
        let _ = bot.send_message(msg.chat.id, ERROR_REPLY).await;
    }

    Ok(())
}

async fn handle_message(bot: &Bot, msg: &Message, data: &BotData) -> Result<()> {
    if let Some(text) = msg.text() {
        if let Some(command) = BotCommand::parse(text, &data.bot_name) {
            return handle_command(bot, msg.chat.id, data, command).await;
        }
        return handle_text(bot, msg, data, text).await;
    }

    if let Some(voice) = msg.voice() {
        return handle_voice(bot, msg, data, voice).await;
    }

    if msg.document().is_some() {
        bot.send_message(msg.chat.id, "Not implemented yet").await?;
    }

    Ok(())
}

async fn handle_command(bot: &Bot, chat_id: ChatId, data: &BotData, command: BotCommand) -> Result<()> {
    match command {
        BotCommand::Start | BotCommand::Help => {
            tracing::info!("Chat {} requested help", chat_id);
            bot.send_message(chat_id, HELP_TEXT).await?;
        }

        BotCommand::New => {
            data.relay.reset(chat_id.0).await;
            tracing::info!("Starting new conversation for {}", chat_id);
            bot.send_message(chat_id, "New conversation started. Type /help for more information.")
                .reply_markup(ReplyMarkup::KeyboardRemove(KeyboardRemove::new()))
                .await?;
        }

        BotCommand::Role(role) => {
            if role.is_empty() {
                bot.send_message(chat_id, "Please specify a role with /role <role>").await?;
            } else {
                data.relay.set_role(chat_id.0, &role).await;
                tracing::info!("Chat {} role set ({} chars)", chat_id, role.len());
                bot.send_message(chat_id, "Role updated.").await?;
            }
        }

        BotCommand::Stats => {
            let report = data.relay.stats(chat_id.0).await;
            let text = if report.is_empty() {
                "No usage statistics available.".to_string()
            } else {
                report.render()
            };
            bot.send_message(chat_id, text).await?;
        }

        BotCommand::Suggestions(Some(count)) => {
            let count = count.min(MAX_SUGGESTIONS);
            data.relay.set_suggestions(chat_id.0, count).await;
            let text = if count == 0 {
                "Suggestions disabled.".to_string()
            } else {
                format!("Will suggest {} follow-up questions.", count)
            };
            bot.send_message(chat_id, text).await?;
        }

        BotCommand::Suggestions(None) => {
            bot.send_message(chat_id, "Please specify a number of suggestions with /suggestions <number>")
                .await?;
        }

        BotCommand::Unknown(cmd) => {
            bot.send_message(chat_id, format!("Unknown command {}. Type /help for more information.", cmd))
                .await?;
        }
    }

    Ok(())
}

async fn handle_text(bot: &Bot, msg: &Message, data: &BotData, text: &str) -> Result<()> {
    if is_chat_link(text) {
        bot.send_message(msg.chat.id, "Please don't send links to other chats.").await?;
        return Ok(());
    }

    let (text, mentioned) = strip_mention(text, &data.bot_name);
    let quoted = msg.reply_to_message().and_then(|reply| {
        reply.text().map(|t| QuotedMessage {
            text: t.to_string(),
            from_bot: reply.from.as_ref().map(|u| u.is_bot).unwrap_or(false),
        })
    });

    let inbound = InboundMessage {
        chat_id: msg.chat.id.0,
        text,
        quoted,
        addressed: mentioned || msg.chat.is_private(),
    };

    if inbound.addressed || inbound.quoted.as_ref().map(|q| q.from_bot).unwrap_or(false) {
        bot.send_chat_action(msg.chat.id, ChatAction::Typing).await?;
    }

    if let Some(reply) = data.relay.handle(inbound).await? {
        send_reply(bot, msg.chat.id, &reply).await?;
    }

    Ok(())
}

async fn handle_voice(bot: &Bot, msg: &Message, data: &BotData, voice: &Voice) -> Result<()> {
    let chat_id = msg.chat.id;
    let duration = voice.duration.seconds();

    if duration > data.config.max_voice_secs {
        bot.send_message(
            chat_id,
            format!("Voice message is too long ({}s, max {}s).", duration, data.config.max_voice_secs),
        )
        .await?;
        return Ok(());
    }

    bot.send_chat_action(chat_id, ChatAction::RecordVoice).await?;

    tracing::debug!("Downloading voice {:?} ({}s)", voice.file.unique_id, duration);
    let file = bot.get_file(&voice.file.id).await?;
    let mut audio: Vec<u8> = Vec::new();
    bot.download_file(&file.path, &mut audio).await?;

    data.relay.record_voice(chat_id.0, f64::from(duration)).await;

    let prompt = data.relay.transcription_prompt(chat_id.0).await;
    let text = data
        .openai
        .transcribe(&data.config.transcription_model, audio, "voice.ogg", &prompt)
        .await?;
    tracing::debug!("Transcribed {} chars", text.len());

    bot.send_message(chat_id, format!("<i>&gt; {}</i>", html::escape(&text)))
        .parse_mode(ParseMode::Html)
        .await?;

    handle_text(bot, msg, data, &text).await
}

/// Send a reply, splitting long answers. Each chunk goes out as HTML and is
/// resent as plain text if Telegram rejects the markup. Suggestions ride on
/// the last chunk.
async fn send_reply(bot: &Bot, chat_id: ChatId, reply: &RelayReply) -> Result<()> {
    if reply.text.trim().is_empty() {
        bot.send_message(chat_id, "(no response)").await?;
        return Ok(());
    }

    let chunks = split_message(&reply.text, MAX_MESSAGE_CHARS);
    let last = chunks.len().saturating_sub(1);
    for (i, chunk) in chunks.into_iter().enumerate() {
        let markup = (i == last).then(|| suggestion_markup(&reply.suggestions));

        let mut request = bot
            .send_message(chat_id, markdown_to_html(chunk))
            .parse_mode(ParseMode::Html);
        if let Some(markup) = markup.clone() {
            request = request.reply_markup(markup);
        }
        if let Err(e) = request.await {
            tracing::warn!("HTML reply rejected ({}), sending plain text", e);
            let mut request = bot.send_message(chat_id, chunk);
            if let Some(markup) = markup {
                request = request.reply_markup(markup);
            }
            request.await?;
        }
    }
    Ok(())
}
