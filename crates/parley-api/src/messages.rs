use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use parley_db::models::MessageCursor;
use parley_types::api::SendMessageRequest;
use parley_types::events::GatewayEvent;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::middleware::Claims;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor-based pagination — pass the (created_at, id) of the last
    /// message of the previous page to resume strictly after it. Both
    /// halves must be present together.
    pub after: Option<String>,
    pub after_id: Option<String>,
}

fn default_limit() -> u32 {
    50
}

/// Messages between the requester and one peer, ascending by
/// (created_at, id), the order the conversation view renders in.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(peer_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let me = claims.sub.to_string();
    let peer = peer_id.to_string();
    let limit = query.limit.min(200);

    let cursor = match (query.after, query.after_id) {
        (Some(created_at), Some(id)) => Some(MessageCursor { created_at, id }),
        (None, None) => None,
        _ => {
            return Err(ApiError::Validation {
                field: "after",
                reason: "after and after_id must be supplied together",
            });
        }
    };

    let messages = tokio::task::spawn_blocking(move || {
        if state.db.get_user_by_id(&peer)?.is_none() {
            return Err(parley_db::StoreError::NotFound);
        }
        state.db.list_between(&me, &peer, cursor.as_ref(), limit)
    })
    .await
    .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))??;

    Ok(Json(messages))
}

/// Persist a message to one peer, then push it to the peer's live gateway
/// channel. The push is fire-and-forget: an offline peer simply fetches the
/// message on next open. Sending never blocks on recipient connectivity,
/// and failed sends are never retried here; the user resends explicitly.
pub async fn send_message(
    State(state): State<AppState>,
    Path(peer_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if peer_id == claims.sub {
        return Err(ApiError::Validation {
            field: "receiver",
            reason: "cannot send a message to yourself",
        });
    }

    let me = claims.sub.to_string();
    let peer = peer_id.to_string();

    // Run blocking DB work off the async runtime
    let db_state = state.clone();
    let message = tokio::task::spawn_blocking(move || {
        if db_state.db.get_user_by_id(&peer)?.is_none() {
            return Err(parley_db::StoreError::NotFound);
        }
        db_state
            .db
            .append_message(&me, &peer, req.text.as_deref(), req.image.as_deref())
    })
    .await
    .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))??;

    // Push to the receiver's live channel, if any. The pushed payload is
    // the message exactly as persisted (status "sent").
    let pushed = state
        .dispatcher
        .send_to_user(
            peer_id,
            GatewayEvent::NewMessage {
                message: message.clone(),
            },
        )
        .await;

    if pushed {
        // The receiver had a live channel: flag the row as delivered. The
        // 201 response still reflects the state at persistence time.
        let id = message.id.to_string();
        let deliver_state = state.clone();
        let _ = tokio::task::spawn_blocking(move || {
            if let Err(e) = deliver_state.db.mark_delivered(&id) {
                warn!("failed to mark message {} delivered: {}", id, e);
            }
        })
        .await;
    } else {
        debug!(
            "receiver {} offline, push dropped for message {}",
            peer_id, message.id
        );
    }

    Ok((StatusCode::CREATED, Json(message)))
}

/// Flip the read flag on one message. Only the message's receiver may do
/// this; anyone else sees 404, indistinguishable from an unknown id.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let id = message_id.to_string();
    let me = claims.sub.to_string();

    tokio::task::spawn_blocking(move || state.db.mark_read_for_receiver(&id, &me))
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))??;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parley_db::Database;
    use parley_gateway::dispatcher::Dispatcher;
    use parley_types::models::MessageStatus;

    use crate::auth::AppStateInner;

    fn test_state() -> AppState {
        Arc::new(AppStateInner {
            db: Database::open_in_memory().unwrap(),
            jwt_secret: "test-secret".into(),
            dispatcher: Dispatcher::new(),
        })
    }

    fn seed_user(state: &AppState, username: &str) -> Uuid {
        let id = Uuid::new_v4();
        state
            .db
            .create_user(&id.to_string(), username, "hash", None)
            .unwrap();
        id
    }

    fn claims_for(user_id: Uuid, username: &str) -> Claims {
        Claims {
            sub: user_id,
            username: username.into(),
            exp: 0,
        }
    }

    #[tokio::test]
    async fn send_pushes_to_connected_receiver_and_marks_delivered() {
        let state = test_state();
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");

        let (_conn, mut rx) = state.dispatcher.register_channel(bob).await;

        let result = send_message(
            State(state.clone()),
            Path(bob),
            Extension(claims_for(alice, "alice")),
            Json(SendMessageRequest {
                text: Some("hi".into()),
                image: None,
            }),
        )
        .await;
        assert!(result.is_ok());

        // the push carries the message exactly as persisted
        match rx.recv().await {
            Some(GatewayEvent::NewMessage { message }) => {
                assert_eq!(message.sender_id, alice);
                assert_eq!(message.receiver_id, bob);
                assert_eq!(message.status, MessageStatus::Sent);
                assert_eq!(message.text.as_deref(), Some("hi"));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        // the stored row was flagged delivered after the push
        let stored = state
            .db
            .list_between(&alice.to_string(), &bob.to_string(), None, 50)
            .unwrap();
        assert!(stored[0].delivered);
    }

    #[tokio::test]
    async fn send_to_offline_receiver_drops_push_but_persists() {
        let state = test_state();
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");

        let result = send_message(
            State(state.clone()),
            Path(bob),
            Extension(claims_for(alice, "alice")),
            Json(SendMessageRequest {
                text: Some("hi".into()),
                image: None,
            }),
        )
        .await;
        assert!(result.is_ok());

        let stored = state
            .db
            .list_between(&alice.to_string(), &bob.to_string(), None, 50)
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert!(!stored[0].delivered);
        assert_eq!(stored[0].status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn send_rejects_empty_body_unknown_peer_and_self() {
        let state = test_state();
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");

        let empty = send_message(
            State(state.clone()),
            Path(bob),
            Extension(claims_for(alice, "alice")),
            Json(SendMessageRequest {
                text: None,
                image: None,
            }),
        )
        .await;
        assert!(matches!(empty.err(), Some(ApiError::Validation { .. })));

        let unknown = send_message(
            State(state.clone()),
            Path(Uuid::new_v4()),
            Extension(claims_for(alice, "alice")),
            Json(SendMessageRequest {
                text: Some("hi".into()),
                image: None,
            }),
        )
        .await;
        assert!(matches!(unknown.err(), Some(ApiError::NotFound)));

        let to_self = send_message(
            State(state.clone()),
            Path(alice),
            Extension(claims_for(alice, "alice")),
            Json(SendMessageRequest {
                text: Some("hi".into()),
                image: None,
            }),
        )
        .await;
        assert!(matches!(to_self.err(), Some(ApiError::Validation { .. })));

        // nothing was persisted by the failed sends
        let stored = state
            .db
            .list_between(&alice.to_string(), &bob.to_string(), None, 50)
            .unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn mark_read_is_receiver_only() {
        let state = test_state();
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");

        let message = state
            .db
            .append_message(&alice.to_string(), &bob.to_string(), Some("hi"), None)
            .unwrap();

        // the sender may not mark it read
        let by_sender = mark_read(
            State(state.clone()),
            Path(message.id),
            Extension(claims_for(alice, "alice")),
        )
        .await;
        assert!(matches!(by_sender.err(), Some(ApiError::NotFound)));

        let by_receiver = mark_read(
            State(state.clone()),
            Path(message.id),
            Extension(claims_for(bob, "bob")),
        )
        .await;
        assert!(by_receiver.is_ok());
    }
}
