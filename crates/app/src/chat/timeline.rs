use std::collections::HashSet;

use reclaim_storage::{MessageId, SenderKind};

/// Lifecycle status for one timeline message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageStatus {
    Sent,
    Streaming,
    Done,
    Error,
    Cancelled,
}

/// One message as the screen shows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender: SenderKind,
    pub content: String,
    pub status: MessageStatus,
}

impl ChatMessage {
    pub fn new(
        id: MessageId,
        sender: SenderKind,
        content: impl Into<String>,
        status: MessageStatus,
    ) -> Self {
        Self {
            id,
            sender,
            content: content.into(),
            status,
        }
    }

    /// Creates a user message the moment it is submitted.
    pub fn user(id: MessageId, content: impl Into<String>) -> Self {
        Self::new(id, SenderKind::User, content, MessageStatus::Sent)
    }

    /// Creates an empty assistant placeholder that streams in place.
    pub fn assistant_placeholder(id: MessageId) -> Self {
        Self::new(id, SenderKind::Ai, String::new(), MessageStatus::Streaming)
    }
}

/// Ordered message list gated by a seen-id set.
///
/// Re-adding an id that is already present is a no-op, so replayed or
/// duplicated events can never produce duplicate rows.
#[derive(Debug, Default)]
pub struct Timeline {
    messages: Vec<ChatMessage>,
    seen: HashSet<MessageId>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the message unless its id was already seen. Returns whether
    /// the message was appended.
    pub fn push(&mut self, message: ChatMessage) -> bool {
        if !self.seen.insert(message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Replaces the content of the message with the given id. Returns false
    /// when no such message exists.
    pub fn set_content(&mut self, id: MessageId, content: &str) -> bool {
        match self.find_mut(id) {
            Some(message) => {
                message.content = content.to_string();
                true
            }
            None => false,
        }
    }

    pub fn set_status(&mut self, id: MessageId, status: MessageStatus) -> bool {
        match self.find_mut(id) {
            Some(message) => {
                message.status = status;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|message| message.id == id)
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn find_mut(&mut self, id: MessageId) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|message| message.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pushing_an_already_seen_id_is_a_no_op() {
        let mut timeline = Timeline::new();
        let id = MessageId::new_v7();

        assert!(timeline.push(ChatMessage::user(id, "hello")));
        assert!(!timeline.push(ChatMessage::user(id, "hello again")));

        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline.get(id).unwrap().content, "hello");
    }

    #[test]
    fn set_content_addresses_by_id() {
        let mut timeline = Timeline::new();
        let placeholder = MessageId::new_v7();
        timeline.push(ChatMessage::user(MessageId::new_v7(), "hi"));
        timeline.push(ChatMessage::assistant_placeholder(placeholder));

        assert!(timeline.set_content(placeholder, "Hello there!"));
        assert!(timeline.set_status(placeholder, MessageStatus::Done));

        let message = timeline.get(placeholder).unwrap();
        assert_eq!(message.content, "Hello there!");
        assert_eq!(message.status, MessageStatus::Done);
    }

    #[test]
    fn mutating_an_unknown_id_reports_failure() {
        let mut timeline = Timeline::new();
        assert!(!timeline.set_content(MessageId::new_v7(), "ghost"));
        assert!(!timeline.set_status(MessageId::new_v7(), MessageStatus::Done));
    }
}
