use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The authenticated account as the auth store knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub user: AuthUser,
    pub expires_at: DateTime<Utc>,
}

/// An authenticated user combined with its profile row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub is_admin: bool,
}

impl Identity {
    pub fn from_parts(user: AuthUser, profile: Profile) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: profile.name,
            is_admin: profile.is_admin,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub name: String,
    pub phone_number: Option<String>,
    pub address: Option<String>,
    pub is_admin: bool,
}

/// A row of the `messages` table.
///
/// `receiver_id = None` means the message is addressed to the administrator.
/// Rows are append-only: never edited, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Message {
    pub id: Uuid,
    pub content: String,
    pub sender_id: Uuid,
    pub receiver_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// True when this message was sent by, or addressed to, `user_id`.
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.sender_id == user_id || self.receiver_id == Some(user_id)
    }
}

/// A message denormalized with the display names of both parties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub content: String,
    pub sender_id: Uuid,
    pub sender_name: Option<String>,
    pub receiver_id: Option<Uuid>,
    pub receiver_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn from_message(
        message: Message,
        sender_name: Option<String>,
        receiver_name: Option<String>,
    ) -> Self {
        Self {
            id: message.id,
            content: message.content,
            sender_id: message.sender_id,
            sender_name,
            receiver_id: message.receiver_id,
            receiver_name,
            created_at: message.created_at,
        }
    }
}

/// The other party in a two-person thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Counterpart {
    pub id: Uuid,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(sender: Uuid, receiver: Option<Uuid>) -> Message {
        Message {
            id: Uuid::new_v4(),
            content: "load 42 picked up".into(),
            sender_id: sender,
            receiver_id: receiver,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn involves_checks_both_ends() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert!(message(a, Some(b)).involves(a));
        assert!(message(a, Some(b)).involves(b));
        assert!(!message(a, None).involves(b));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let raw = serde_json::json!({
            "id": Uuid::new_v4(),
            "content": "hi",
            "sender_id": Uuid::new_v4(),
            "receiver_id": null,
            "created_at": "2026-01-01T00:00:00Z",
            "priority": "high",
        });
        assert!(serde_json::from_value::<Message>(raw).is_err());
    }

    #[test]
    fn missing_fields_are_rejected() {
        let raw = serde_json::json!({
            "id": Uuid::new_v4(),
            "sender_id": Uuid::new_v4(),
            "created_at": "2026-01-01T00:00:00Z",
        });
        assert!(serde_json::from_value::<Message>(raw).is_err());
    }
}
