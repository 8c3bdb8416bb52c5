//! Message Relay Integration Tests
//!
//! End-to-end handling of inbound messages against a scripted client.

mod common;

use common::{answer, choices, overflow, ScriptedClient};
use gpt_relay_bot::relay::{SUGGESTION_PROMPT, TRUNCATION_MARK};
use gpt_relay_bot::{
    CompletionError, CompletionOrchestrator, ConversationRegistry, InboundMessage, Message,
    MessageRelay, OrchestratorSettings, QuotedMessage, Role, TokenUsage,
};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

const SMALL: &str = "gpt-3.5-turbo";
const LARGE: &str = "gpt-3.5-turbo-16k";

fn relay(client: Arc<ScriptedClient>) -> MessageRelay {
    MessageRelay::new(
        Arc::new(ConversationRegistry::default()),
        CompletionOrchestrator::new(client, OrchestratorSettings::default()),
    )
}

#[tokio::test]
async fn test_private_message_is_answered_and_recorded() {
    let client = Arc::new(ScriptedClient::new(vec![Ok(answer(
        SMALL,
        "Paris.",
        "stop",
        TokenUsage::new(20, 3, 23),
    ))]));
    let relay = relay(client.clone());

    let reply = assert_ok!(relay.handle(InboundMessage::private(1, "Capital of France?")).await)
        .expect("private messages are answered");

    assert_eq!(reply.text, "Paris.");
    assert_eq!(reply.model, SMALL);
    assert!(!reply.truncated);
    assert!(reply.suggestions.is_empty());

    let handle = relay.registry().get(1).await;
    let conversation = handle.lock().await;
    assert_eq!(
        conversation.history(),
        vec![
            Message::system("Use metric units"),
            Message::user("Capital of France?"),
            Message::assistant("Paris."),
        ]
    );
    let ledger = conversation.ledger(SMALL).unwrap();
    assert_eq!((ledger.prompt_tokens, ledger.completion_tokens, ledger.total_tokens), (20, 3, 23));
    assert_eq!(ledger.message_count, 1);
}

#[tokio::test]
async fn test_truncated_answer_gets_ellipsis() {
    let client = Arc::new(ScriptedClient::new(vec![Ok(answer(
        SMALL,
        "Once upon a time",
        "length",
        TokenUsage::new(10, 100, 110),
    ))]));
    let relay = relay(client);

    let reply = assert_ok!(relay.handle(InboundMessage::private(1, "Tell me a story")).await).unwrap();
    assert!(reply.truncated);
    assert_eq!(reply.text, format!("Once upon a time{}", TRUNCATION_MARK));

    // history keeps the raw answer
    let handle = relay.registry().get(1).await;
    assert_eq!(handle.lock().await.last_content(), "Once upon a time");
}

#[tokio::test]
async fn test_group_message_without_mention_is_only_recorded() {
    let client = Arc::new(ScriptedClient::new(vec![]));
    let relay = relay(client.clone());

    let inbound = InboundMessage {
        chat_id: -100,
        text: "just chatting".to_string(),
        quoted: None,
        addressed: false,
    };
    assert_eq!(assert_ok!(relay.handle(inbound).await), None);
    assert!(client.calls().is_empty());

    let handle = relay.registry().get(-100).await;
    assert_eq!(handle.lock().await.len(), 2);
}

#[tokio::test]
async fn test_reply_to_bot_addresses_it() {
    let client = Arc::new(ScriptedClient::new(vec![Ok(answer(
        SMALL,
        "Yes, 42.",
        "stop",
        TokenUsage::new(30, 4, 34),
    ))]));
    let relay = relay(client.clone());

    let inbound = InboundMessage {
        chat_id: -100,
        text: "Are you sure?".to_string(),
        quoted: Some(QuotedMessage {
            text: "The answer is 42.".to_string(),
            from_bot: true,
        }),
        addressed: false,
    };
    let reply = assert_ok!(relay.handle(inbound).await).unwrap();
    assert_eq!(reply.text, "Yes, 42.");

    let sent = &client.calls()[0].messages;
    assert_eq!(sent[1], Message::assistant("The answer is 42."));
    assert_eq!(sent[2], Message::user("Are you sure?"));
}

#[tokio::test]
async fn test_quoted_user_message_is_context_only() {
    let client = Arc::new(ScriptedClient::new(vec![]));
    let relay = relay(client.clone());

    let inbound = InboundMessage {
        chat_id: -100,
        text: "agreed".to_string(),
        quoted: Some(QuotedMessage {
            text: "pizza tonight?".to_string(),
            from_bot: false,
        }),
        addressed: false,
    };
    assert_eq!(assert_ok!(relay.handle(inbound).await), None);

    let handle = relay.registry().get(-100).await;
    let conversation = handle.lock().await;
    let turns: Vec<Role> = conversation.turns().map(|m| m.role).collect();
    assert_eq!(turns, vec![Role::User, Role::User]);
}

#[tokio::test]
async fn test_usage_recorded_against_model_that_answered() {
    let client = Arc::new(ScriptedClient::new(vec![
        Err(overflow(4097, 9_000)),
        Ok(answer(LARGE, "Big answer", "stop", TokenUsage::new(9_000, 10, 9_010))),
    ]));
    let relay = relay(client);

    let reply = assert_ok!(relay.handle(InboundMessage::private(5, "long question")).await).unwrap();
    assert_eq!(reply.model, LARGE);

    let report = relay.stats(5).await;
    assert_eq!(report.total_messages, 1);
    assert_eq!(report.models.len(), 1);
    assert_eq!(report.models[0].model, LARGE);
    assert_eq!(report.models[0].total_tokens, 9_010);
}

#[tokio::test]
async fn test_failure_recorded_against_failing_model() {
    let client = Arc::new(ScriptedClient::new(vec![Err(CompletionError::RateLimited(
        "busy".to_string(),
    ))]));
    let relay = relay(client);

    let failure = assert_err!(relay.handle(InboundMessage::private(9, "hello")).await);
    assert_eq!(failure.model, SMALL);

    let handle = relay.registry().get(9).await;
    let conversation = handle.lock().await;
    assert_eq!(conversation.ledger(SMALL).map(|l| l.error_count), Some(1));
    assert_eq!(conversation.total_messages(), 0);
    // the user's message stays in history
    assert_eq!(conversation.last_content(), "hello");
}

#[tokio::test]
async fn test_suggestions_requested_when_enabled() {
    let client = Arc::new(ScriptedClient::new(vec![
        Ok(answer(SMALL, "Rust is a systems language.", "stop", TokenUsage::new(10, 6, 16))),
        Ok(choices(SMALL, &["Who made Rust?", " Is it fast? ", ""])),
    ]));
    let relay = relay(client.clone());
    relay.set_suggestions(3, 3).await;

    let reply = assert_ok!(relay.handle(InboundMessage::private(3, "What is Rust?")).await).unwrap();
    assert_eq!(reply.suggestions, vec!["Who made Rust?", "Is it fast?"]);

    let calls = client.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].n, 3);
    assert_eq!(
        calls[1].messages,
        vec![
            Message::system(SUGGESTION_PROMPT),
            Message::user("What is Rust?"),
            Message::assistant("Rust is a systems language."),
        ]
    );

    // suggestion calls do not count as answered messages
    assert_eq!(relay.stats(3).await.total_messages, 1);
}

#[tokio::test]
async fn test_suggestion_failure_keeps_answer() {
    let client = Arc::new(ScriptedClient::new(vec![
        Ok(answer(SMALL, "A long enough answer", "stop", TokenUsage::new(1, 1, 2))),
        Err(CompletionError::Transport("boom".to_string())),
    ]));
    let relay = relay(client);
    relay.set_suggestions(4, 2).await;

    let reply = assert_ok!(relay.handle(InboundMessage::private(4, "question")).await).unwrap();
    assert_eq!(reply.text, "A long enough answer");
    assert!(reply.suggestions.is_empty());
}

#[tokio::test]
async fn test_short_answer_skips_suggestions() {
    let client = Arc::new(ScriptedClient::new(vec![Ok(answer(
        SMALL,
        "Yes.",
        "stop",
        TokenUsage::new(1, 1, 2),
    ))]));
    let relay = relay(client.clone());
    relay.set_suggestions(6, 2).await;

    assert_ok!(relay.handle(InboundMessage::private(6, "ok?")).await);
    assert_eq!(client.calls().len(), 1);
}

#[tokio::test]
async fn test_role_reset_and_voice_commands() {
    let client = Arc::new(ScriptedClient::new(vec![Ok(answer(
        SMALL,
        "Arr!",
        "stop",
        TokenUsage::new(1, 1, 2),
    ))]));
    let relay = relay(client.clone());

    relay.set_role(8, "You are a pirate").await;
    relay.record_voice(8, 4.0).await;
    assert_ok!(relay.handle(InboundMessage::private(8, "hi")).await);
    assert_eq!(client.calls()[0].messages[0], Message::system("You are a pirate"));
    assert_eq!(relay.transcription_prompt(8).await, "Arr!");

    relay.reset(8).await;
    let report = relay.stats(8).await;
    assert_eq!(report.sessions, 2);
    assert_eq!(report.session_messages, 0);
    assert_eq!(report.total_messages, 1);
    assert_eq!(report.voice.messages, 1);
    assert_eq!(report.voice.session_messages, 0);
    // the role survives a reset
    assert_eq!(relay.transcription_prompt(8).await, "You are a pirate");
}
