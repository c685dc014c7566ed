use std::collections::HashSet;

use uuid::Uuid;

use loadline_types::models::ChatMessage;

/// Ordered, de-duplicated message list of one open conversation.
///
/// Fetch results and realtime inserts both go through [`Timeline::merge`],
/// so a message delivered twice, or by both paths, shows up once.
#[derive(Debug, Default, Clone)]
pub struct Timeline {
    messages: Vec<ChatMessage>,
    ids: HashSet<Uuid>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a message at its `created_at` position, after any message
    /// with the same timestamp. Returns false if the id is already present.
    pub fn merge(&mut self, message: ChatMessage) -> bool {
        if !self.ids.insert(message.id) {
            return false;
        }
        let pos = self
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(pos, message);
        true
    }

    /// Merge every message; returns how many were new.
    pub fn merge_all(&mut self, messages: impl IntoIterator<Item = ChatMessage>) -> usize {
        messages
            .into_iter()
            .map(|m| self.merge(m))
            .filter(|added| *added)
            .count()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn as_slice(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.ids.clear();
    }
}
