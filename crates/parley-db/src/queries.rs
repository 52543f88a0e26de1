use std::sync::LazyLock;

use regex::Regex;
use rusqlite::Connection;

use parley_types::models::{ConversationSummary, LastMessage, Message, MessageStatus};

use crate::Database;
use crate::StoreError;
use crate::models::{MessageCursor, MessageRow, UserRow, parse_timestamp, parse_uuid_lossy};

/// URL-shape check for the image field. Matches http/https/ftp URLs with a
/// non-empty host part.
static IMAGE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?|ftp)://[^\s/$.?#].[^\s]*$").expect("image URL regex")
});

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
        display_name: Option<&str>,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, display_name) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, username, password_hash, display_name],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>, StoreError> {
        self.with_conn(|conn| query_user(conn, "username = ?1", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>, StoreError> {
        self.with_conn(|conn| query_user(conn, "id = ?1", id))
    }

    /// Case-insensitive substring search on username and display name,
    /// excluding the requester.
    pub fn search_users(&self, query: &str, exclude_id: &str) -> Result<Vec<UserRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, password, display_name, avatar_url, created_at
                 FROM users
                 WHERE id != ?1
                   AND (username LIKE '%' || ?2 || '%'
                        OR display_name LIKE '%' || ?2 || '%')
                 ORDER BY username ASC
                 LIMIT 25",
            )?;

            let rows = stmt
                .query_map(rusqlite::params![exclude_id, query], map_user_row)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Messages --

    /// Persist a new message. The id and timestamp are assigned here, never
    /// by the caller. Fails with a field-level validation error when neither
    /// text nor image is supplied, or the image is not URL-shaped.
    pub fn append_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        text: Option<&str>,
        image: Option<&str>,
    ) -> Result<Message, StoreError> {
        let text = text.map(str::trim).filter(|t| !t.is_empty());
        let image = image.map(str::trim).filter(|i| !i.is_empty());

        if text.is_none() && image.is_none() {
            return Err(StoreError::Validation {
                field: "text",
                reason: "message must contain either text or image",
            });
        }
        if let Some(url) = image {
            if !IMAGE_URL_RE.is_match(url) {
                return Err(StoreError::Validation {
                    field: "image",
                    reason: "invalid image URL format",
                });
            }
        }

        let id = uuid::Uuid::new_v4().to_string();

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, text, image)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, sender_id, receiver_id, text, image],
            )?;

            // Read the row back so the returned message carries the
            // store-assigned timestamp, not a caller-side clock.
            let row = conn.query_row(
                "SELECT id, sender_id, receiver_id, text, image, read, delivered, created_at
                 FROM messages WHERE id = ?1",
                [&id],
                map_message_row,
            )?;

            Ok(row.into_message())
        })
    }

    /// Idempotent: marking an already-read message is a no-op.
    pub fn mark_read(&self, message_id: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let n = conn.execute("UPDATE messages SET read = 1 WHERE id = ?1", [message_id])?;
            if n == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
    }

    /// Same as [`mark_read`](Self::mark_read) but only succeeds when
    /// `receiver_id` is the message's receiver. Unknown id and foreign
    /// receiver are indistinguishable to the caller.
    pub fn mark_read_for_receiver(
        &self,
        message_id: &str,
        receiver_id: &str,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE messages SET read = 1 WHERE id = ?1 AND receiver_id = ?2",
                [message_id, receiver_id],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
    }

    /// Idempotent: marking an already-delivered message is a no-op.
    pub fn mark_delivered(&self, message_id: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE messages SET delivered = 1 WHERE id = ?1",
                [message_id],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
    }

    /// All messages between two users, both directions, ascending by
    /// (created_at, id). The cursor is exclusive: pages resume strictly
    /// after the last message of the previous page.
    pub fn list_between(
        &self,
        user_a: &str,
        user_b: &str,
        cursor: Option<&MessageCursor>,
        limit: u32,
    ) -> Result<Vec<Message>, StoreError> {
        self.with_conn(|conn| {
            let rows = match cursor {
                Some(cur) => {
                    let mut stmt = conn.prepare(
                        "SELECT id, sender_id, receiver_id, text, image, read, delivered, created_at
                         FROM messages
                         WHERE ((sender_id = ?1 AND receiver_id = ?2)
                                OR (sender_id = ?2 AND receiver_id = ?1))
                           AND (created_at > ?3 OR (created_at = ?3 AND id > ?4))
                         ORDER BY created_at ASC, id ASC
                         LIMIT ?5",
                    )?;
                    stmt.query_map(
                        rusqlite::params![user_a, user_b, cur.created_at, cur.id, limit],
                        map_message_row,
                    )?
                    .collect::<Result<Vec<_>, _>>()?
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT id, sender_id, receiver_id, text, image, read, delivered, created_at
                         FROM messages
                         WHERE ((sender_id = ?1 AND receiver_id = ?2)
                                OR (sender_id = ?2 AND receiver_id = ?1))
                         ORDER BY created_at ASC, id ASC
                         LIMIT ?3",
                    )?;
                    stmt.query_map(rusqlite::params![user_a, user_b, limit], map_message_row)?
                        .collect::<Result<Vec<_>, _>>()?
                }
            };

            Ok(rows.into_iter().map(MessageRow::into_message).collect())
        })
    }

    // -- Conversations --

    /// One summary per distinct conversation partner: the most recent
    /// message (ties broken by id) plus the count of unread messages from
    /// that partner, ordered most-recent first.
    ///
    /// Computed as a single query so the last message and the unread count
    /// always come from the same snapshot of the log.
    pub fn list_conversations(
        &self,
        requester_id: &str,
    ) -> Result<Vec<ConversationSummary>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "WITH convo AS (
                     SELECT
                         CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END AS partner_id,
                         id, text, image, read, delivered, created_at,
                         CASE WHEN receiver_id = ?1 AND read = 0 THEN 1 ELSE 0 END AS unread
                     FROM messages
                     WHERE sender_id = ?1 OR receiver_id = ?1
                 ),
                 ranked AS (
                     SELECT partner_id, id, text, image, read, delivered, created_at,
                            ROW_NUMBER() OVER (
                                PARTITION BY partner_id
                                ORDER BY created_at DESC, id DESC
                            ) AS rn,
                            SUM(unread) OVER (PARTITION BY partner_id) AS unread_count
                     FROM convo
                 )
                 SELECT r.partner_id, u.username, u.display_name, u.avatar_url,
                        r.id, r.text, r.image, r.read, r.delivered, r.created_at,
                        r.unread_count
                 FROM ranked r
                 JOIN users u ON u.id = r.partner_id
                 WHERE r.rn = 1
                 ORDER BY r.created_at DESC, r.id DESC",
            )?;

            let rows = stmt
                .query_map([requester_id], |row| {
                    let partner_id: String = row.get(0)?;
                    let username: String = row.get(1)?;
                    let display_name: Option<String> = row.get(2)?;
                    let avatar_url: Option<String> = row.get(3)?;
                    let message_id: String = row.get(4)?;
                    let text: Option<String> = row.get(5)?;
                    let image: Option<String> = row.get(6)?;
                    let read: bool = row.get(7)?;
                    let delivered: bool = row.get(8)?;
                    let created_at: String = row.get(9)?;
                    let unread_count: i64 = row.get(10)?;

                    Ok(ConversationSummary {
                        peer_id: parse_uuid_lossy(&partner_id, "messages partner"),
                        username,
                        display_name,
                        avatar_url,
                        last_message: LastMessage {
                            text,
                            image,
                            created_at: parse_timestamp(&created_at, &message_id),
                            status: MessageStatus::derive(read, delivered),
                        },
                        unread_count: unread_count.max(0) as u32,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_user(
    conn: &Connection,
    predicate: &str,
    value: &str,
) -> Result<Option<UserRow>, StoreError> {
    let sql = format!(
        "SELECT id, username, password, display_name, avatar_url, created_at
         FROM users WHERE {}",
        predicate
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt.query_row([value], map_user_row).optional()?;

    Ok(row)
}

fn map_user_row(row: &rusqlite::Row<'_>) -> Result<UserRow, rusqlite::Error> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        display_name: row.get(3)?,
        avatar_url: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn map_message_row(row: &rusqlite::Row<'_>) -> Result<MessageRow, rusqlite::Error> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        text: row.get(3)?,
        image: row.get(4)?,
        read: row.get(5)?,
        delivered: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, StoreError>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, StoreError> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
