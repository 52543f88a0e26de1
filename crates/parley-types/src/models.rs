use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Delivery state of a message, derived from the read/delivered flags.
/// Precedence: read > delivered > sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn derive(read: bool, delivered: bool) -> Self {
        if read {
            Self::Read
        } else if delivered {
            Self::Delivered
        } else {
            Self::Sent
        }
    }
}

/// A direct message between two users. `id` and `created_at` are assigned
/// by the store at persistence time; `status` is derived, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub text: Option<String>,
    pub image: Option<String>,
    pub read: bool,
    pub delivered: bool,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// True if this message belongs to the conversation between `a` and `b`,
    /// in either direction.
    pub fn is_between(&self, a: Uuid, b: Uuid) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }
}

/// Projection of a conversation's most recent message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastMessage {
    pub text: Option<String>,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: MessageStatus,
}

/// Per-peer rollup: most recent message plus unread count. Derived by a
/// single aggregation query, one row per distinct conversation partner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub peer_id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub last_message: LastMessage,
    pub unread_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_precedence() {
        assert_eq!(MessageStatus::derive(false, false), MessageStatus::Sent);
        assert_eq!(MessageStatus::derive(false, true), MessageStatus::Delivered);
        assert_eq!(MessageStatus::derive(true, false), MessageStatus::Read);
        // read wins over delivered
        assert_eq!(MessageStatus::derive(true, true), MessageStatus::Read);
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&MessageStatus::Sent).unwrap(),
            "\"sent\""
        );
        assert_eq!(
            serde_json::to_string(&MessageStatus::Read).unwrap(),
            "\"read\""
        );
    }
}
