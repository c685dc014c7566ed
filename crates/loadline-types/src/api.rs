use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

// -- JWT Claims --

/// Access-token claims issued by the backend at sign-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Everything the register form collects.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignUp {
    pub email: String,
    pub password: String,
    pub name: String,
    pub phone_number: Option<String>,
    pub address: Option<String>,
}

// -- Profiles --

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub phone_number: Option<String>,
    pub address: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.phone_number.is_none() && self.address.is_none()
    }
}

// -- Messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewMessage {
    pub sender_id: Uuid,
    pub receiver_id: Option<Uuid>,
    pub content: String,
}

/// Row filter over the `messages` table. The same filter drives both the
/// SQL query and the relevance check on realtime inserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFilter {
    /// Messages the user sent or received.
    Participant(Uuid),
    /// Messages addressed to `receiver`, optionally counting null-receiver
    /// rows as addressed to it too. The receiver's own messages are excluded.
    AddressedTo {
        receiver: Uuid,
        include_unaddressed: bool,
    },
}

impl MessageFilter {
    pub fn matches(&self, message: &Message) -> bool {
        match *self {
            Self::Participant(id) => message.involves(id),
            Self::AddressedTo {
                receiver,
                include_unaddressed,
            } => {
                if message.sender_id == receiver {
                    return false;
                }
                match message.receiver_id {
                    Some(id) => id == receiver,
                    None => include_unaddressed,
                }
            }
        }
    }
}
