pub mod error;
pub mod ids;
pub mod memory;
pub mod sqlite;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use ids::{ConversationId, MessageId};
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;
pub use types::{ConversationRecord, MessageRecord, SenderKind, unix_timestamp_seconds};

pub trait ConversationStore: Send + Sync {
    /// Returns the conversation between `user_id` and `peer_id`, creating it
    /// on first use. Idempotent per (user, peer) pair.
    fn create_or_get_conversation(
        &self,
        user_id: &str,
        peer_id: &str,
    ) -> StorageResult<ConversationRecord>;
}

pub trait MessageStore: Send + Sync {
    /// Inserts the message, or replaces the stored content when the id is
    /// already present. Streaming placeholders reuse their id for the final
    /// content, so upsert semantics keep exactly one row per message.
    fn upsert_message(
        &self,
        conversation_id: ConversationId,
        message: MessageRecord,
    ) -> StorageResult<()>;

    /// Lists messages in insertion order. `limit == 0` means no limit.
    fn list_messages(
        &self,
        conversation_id: ConversationId,
        limit: usize,
        offset: usize,
    ) -> StorageResult<Vec<MessageRecord>>;
}

pub trait Storage: ConversationStore + MessageStore {}

impl<T> Storage for T where T: ConversationStore + MessageStore {}
