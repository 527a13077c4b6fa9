//! In-memory store with the same contract as the sqlite backend.
//!
//! Used by unit tests and as the offline fallback when the database cannot be
//! opened. The store is eventually-consistent from the caller's perspective;
//! nothing here may be relied on for read-after-write ordering guarantees
//! beyond the per-conversation insertion order.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::error::StorageResult;
use super::ids::{ConversationId, MessageId};
use super::types::{ConversationRecord, MessageRecord, unix_timestamp_seconds};
use super::{ConversationStore, MessageStore};

#[derive(Debug, Default)]
struct Inner {
    conversations: Vec<ConversationRecord>,
    messages: HashMap<ConversationId, Vec<MessageRecord>>,
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored messages for one conversation; test convenience.
    pub fn message_count(&self, conversation_id: ConversationId) -> usize {
        self.locked()
            .messages
            .get(&conversation_id)
            .map_or(0, Vec::len)
    }

    /// Returns one message by id; test convenience.
    pub fn find_message(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> Option<MessageRecord> {
        self.locked()
            .messages
            .get(&conversation_id)
            .and_then(|messages| {
                messages
                    .iter()
                    .find(|message| message.id == message_id)
                    .cloned()
            })
    }
}

impl ConversationStore for MemoryStorage {
    fn create_or_get_conversation(
        &self,
        user_id: &str,
        peer_id: &str,
    ) -> StorageResult<ConversationRecord> {
        let mut inner = self.locked();

        if let Some(existing) = inner
            .conversations
            .iter()
            .find(|conversation| conversation.user_id == user_id && conversation.peer_id == peer_id)
        {
            return Ok(existing.clone());
        }

        let created = ConversationRecord {
            id: ConversationId::new_v7(),
            user_id: user_id.to_string(),
            peer_id: peer_id.to_string(),
            updated_at_unix_seconds: unix_timestamp_seconds(),
        };
        inner.conversations.push(created.clone());
        Ok(created)
    }
}

impl MessageStore for MemoryStorage {
    fn upsert_message(
        &self,
        conversation_id: ConversationId,
        message: MessageRecord,
    ) -> StorageResult<()> {
        let mut inner = self.locked();
        let messages = inner.messages.entry(conversation_id).or_default();

        // Placeholder ids are reused for the final content, so matching ids
        // replace content in place instead of appending a duplicate row.
        if let Some(existing) = messages.iter_mut().find(|stored| stored.id == message.id) {
            existing.content = message.content;
            return Ok(());
        }

        messages.push(message);
        Ok(())
    }

    fn list_messages(
        &self,
        conversation_id: ConversationId,
        limit: usize,
        offset: usize,
    ) -> StorageResult<Vec<MessageRecord>> {
        let inner = self.locked();
        let messages = inner
            .messages
            .get(&conversation_id)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let take = if limit == 0 { usize::MAX } else { limit };
        Ok(messages
            .iter()
            .skip(offset)
            .take(take)
            .cloned()
            .collect())
    }
}
