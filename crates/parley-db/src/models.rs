//! Database row types — these map directly to SQLite rows.
//! Distinct from the parley-types wire models to keep the DB layer
//! independent.

use chrono::{DateTime, Utc};
use parley_types::api::UserSummary;
use parley_types::models::{Message, MessageStatus};
use tracing::warn;
use uuid::Uuid;

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub text: Option<String>,
    pub image: Option<String>,
    pub read: bool,
    pub delivered: bool,
    pub created_at: String,
}

/// Pagination cursor: the (created_at, id) of the last message of the
/// previous page. Keyed on the stable sort key rather than an offset so
/// concurrent inserts cannot shift page boundaries.
#[derive(Debug, Clone)]
pub struct MessageCursor {
    pub created_at: String,
    pub id: String,
}

/// SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
/// Accept RFC 3339 first, then fall back to naive UTC.
pub fn parse_timestamp(raw: &str, message_id: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt created_at '{}' on row '{}': {}", raw, message_id, e);
            DateTime::default()
        })
}

pub fn parse_uuid_lossy(raw: &str, context: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt uuid '{}' in {}: {}", raw, context, e);
        Uuid::default()
    })
}

impl MessageRow {
    pub fn into_message(self) -> Message {
        let status = MessageStatus::derive(self.read, self.delivered);
        Message {
            id: parse_uuid_lossy(&self.id, "messages.id"),
            sender_id: parse_uuid_lossy(&self.sender_id, "messages.sender_id"),
            receiver_id: parse_uuid_lossy(&self.receiver_id, "messages.receiver_id"),
            text: self.text,
            image: self.image,
            read: self.read,
            delivered: self.delivered,
            status,
            created_at: parse_timestamp(&self.created_at, &self.id),
        }
    }
}

impl UserRow {
    pub fn into_summary(self) -> UserSummary {
        UserSummary {
            id: parse_uuid_lossy(&self.id, "users.id"),
            username: self.username,
            display_name: self.display_name,
            avatar_url: self.avatar_url,
        }
    }
}
