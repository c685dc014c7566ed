use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use loadline_backend::Backend;
use loadline_types::api::{MessageFilter, NewMessage};
use loadline_types::models::{ChatMessage, Counterpart, Message};

use crate::error::Result;

/// Display name for a user whose profile row is missing.
pub const UNKNOWN_NAME: &str = "unknown";

/// Queries and mutations over the `messages` and `profiles` tables.
#[derive(Clone)]
pub struct MessageStore {
    backend: Arc<dyn Backend>,
    fetch_limit: u32,
}

impl MessageStore {
    pub fn new(backend: Arc<dyn Backend>, fetch_limit: u32) -> Self {
        Self {
            backend,
            fetch_limit,
        }
    }

    /// Messages of one thread, oldest first.
    ///
    /// Without a counterpart this is everything `self_id` sent or received.
    /// With one, it is everything the counterpart sent or received, which is
    /// the administrator's view of that user's thread.
    pub async fn fetch_conversation(
        &self,
        self_id: Uuid,
        counterpart: Option<Uuid>,
    ) -> Result<Vec<ChatMessage>> {
        let participant = counterpart.unwrap_or(self_id);
        let mut messages = self
            .backend
            .select_messages(MessageFilter::Participant(participant), self.fetch_limit)
            .await?;
        // stable: equal timestamps keep backend order
        messages.sort_by_key(|m| m.created_at);
        debug!(participant = %participant, count = messages.len(), "Conversation fetched");
        Ok(messages)
    }

    /// Roster of users who have written to `self_id`, most recent first.
    pub async fn try_fetch_counterparts(&self, self_id: Uuid) -> Result<Vec<Counterpart>> {
        let senders = self
            .backend
            .distinct_senders(addressed_to(self_id))
            .await?;
        if senders.is_empty() {
            return Ok(vec![]);
        }

        let profiles = self.backend.profiles(&senders).await?;
        let roster = senders
            .into_iter()
            .map(|id| Counterpart {
                id,
                name: profiles
                    .iter()
                    .find(|p| p.id == id)
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|| UNKNOWN_NAME.to_string()),
            })
            .collect();
        Ok(roster)
    }

    /// Like [`MessageStore::try_fetch_counterparts`], but failures are
    /// logged and read as an empty roster.
    pub async fn fetch_counterparts(&self, self_id: Uuid) -> Vec<Counterpart> {
        match self.try_fetch_counterparts(self_id).await {
            Ok(roster) => roster,
            Err(e) => {
                warn!("Roster fetch failed: {}", e);
                vec![]
            }
        }
    }

    /// Send `content` from `sender`. `receiver = None` addresses the
    /// administrator.
    ///
    /// Returns `Ok(None)` without calling the backend when there is no
    /// sender or the content is blank.
    pub async fn send_message(
        &self,
        sender: Option<Uuid>,
        receiver: Option<Uuid>,
        content: &str,
    ) -> Result<Option<Message>> {
        let Some(sender_id) = sender else {
            return Ok(None);
        };
        let content = content.trim();
        if content.is_empty() {
            return Ok(None);
        }

        let message = self
            .backend
            .insert_message(&NewMessage {
                sender_id,
                receiver_id: receiver,
                content: content.to_string(),
            })
            .await?;
        debug!(msg_id = %message.id, "Message sent");
        Ok(Some(message))
    }

    /// The administrator, as shown to users. With several administrator
    /// profiles the earliest one wins.
    pub async fn fetch_administrator(&self) -> Result<Option<Counterpart>> {
        let admins = self.backend.admin_profiles().await?;
        if admins.len() > 1 {
            warn!(count = admins.len(), "More than one administrator profile");
        }
        Ok(admins.into_iter().next().map(|p| Counterpart {
            id: p.id,
            name: p.name,
        }))
    }

    pub async fn resolve_name(&self, id: Uuid) -> Result<Option<String>> {
        Ok(self.backend.profile(id).await?.map(|p| p.name))
    }
}

/// Messages addressed to `receiver`, null receivers included.
pub fn addressed_to(receiver: Uuid) -> MessageFilter {
    MessageFilter::AddressedTo {
        receiver,
        include_unaddressed: true,
    }
}
