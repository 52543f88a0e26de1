use axum::{Extension, Json, extract::State, response::IntoResponse};

use parley_types::api::ConversationsResponse;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::middleware::Claims;

/// One summary row per conversation partner, most recent first. A user with
/// no message history gets an empty list, not an error.
pub async fn get_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let me = claims.sub.to_string();
    let conversations = tokio::task::spawn_blocking(move || state.db.list_conversations(&me))
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))??;

    Ok(Json(ConversationsResponse {
        total: conversations.len(),
        conversations,
    }))
}
