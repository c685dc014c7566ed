use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Session;

/// Table names published on the realtime channel.
pub const MESSAGES_TABLE: &str = "messages";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
}

/// A row change pushed to realtime subscribers.
///
/// `record` carries the inserted row verbatim; subscribers decode it into
/// the matching record type and drop it when it does not fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeEvent {
    pub table: String,
    pub kind: ChangeKind,
    pub record: serde_json::Value,
    pub commit_timestamp: DateTime<Utc>,
}

/// Auth state changes emitted by a backend client handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AuthEvent {
    SignedIn(Session),
    SignedOut,
}
