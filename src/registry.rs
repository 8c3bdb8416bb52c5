//! Conversation Registry
//!
//! Maps chat IDs to their conversation state. Each conversation sits behind
//! its own async mutex: holding it across a completion call queues the next
//! message from the same chat, while other chats proceed independently.
//! Entries are never removed.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::conversation::{ConversationSettings, ConversationState};

/// Shared handle to one chat's conversation
pub type ConversationHandle = Arc<Mutex<ConversationState>>;

pub struct ConversationRegistry {
    settings: ConversationSettings,
    conversations: RwLock<HashMap<i64, ConversationHandle>>,
}

impl Default for ConversationRegistry {
    fn default() -> Self {
        Self::new(ConversationSettings::default())
    }
}

impl ConversationRegistry {
    pub fn new(settings: ConversationSettings) -> Self {
        Self {
            settings,
            conversations: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &ConversationSettings {
        &self.settings
    }

    /// Get or create the conversation for a chat
    pub async fn get(&self, chat_id: i64) -> ConversationHandle {
        if let Some(handle) = self.conversations.read().await.get(&chat_id) {
            return Arc::clone(handle);
        }

        let mut conversations = self.conversations.write().await;
        let handle = conversations.entry(chat_id).or_insert_with(|| {
            debug!("Creating conversation for chat {}", chat_id);
            Arc::new(Mutex::new(ConversationState::new(&self.settings)))
        });
        Arc::clone(handle)
    }

    pub async fn contains(&self, chat_id: i64) -> bool {
        self.conversations.read().await.contains_key(&chat_id)
    }

    /// Number of known chats
    pub async fn len(&self) -> usize {
        self.conversations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.conversations.read().await.is_empty()
    }
}
