use axum::{Extension, Json, extract::Query, extract::State, response::IntoResponse};
use serde::Deserialize;

use parley_db::models::UserRow;
use parley_types::api::UserSummary;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::middleware::Claims;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
}

/// Substring search over usernames and display names, excluding the
/// requester. Used by the client to start a conversation with someone new.
pub async fn search_users(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let term = query.q.trim().to_string();
    if term.is_empty() {
        return Err(ApiError::Validation {
            field: "q",
            reason: "search query must not be empty",
        });
    }

    let me = claims.sub.to_string();
    let rows = tokio::task::spawn_blocking(move || state.db.search_users(&term, &me))
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))??;

    let users: Vec<UserSummary> = rows.into_iter().map(UserRow::into_summary).collect();

    Ok(Json(users))
}
