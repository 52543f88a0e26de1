use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use parley_db::StoreError;

/// API failure taxonomy. Everything a handler can surface maps onto one of
/// these; the JSON body always carries a `message`, and validation failures
/// also name the offending `field`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{reason}")]
    Validation {
        field: &'static str,
        reason: &'static str,
    },

    #[error("not found")]
    NotFound,

    #[error("invalid credentials")]
    Unauthorized,

    #[error("{0}")]
    Conflict(&'static str),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation { field, reason } => Self::Validation { field, reason },
            StoreError::NotFound => Self::NotFound,
            other => Self::Internal(anyhow::Error::new(other)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::Validation { field, reason } => (
                StatusCode::BAD_REQUEST,
                json!({ "message": reason, "field": field }),
            ),
            Self::NotFound => (StatusCode::NOT_FOUND, json!({ "message": "not found" })),
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({ "message": "invalid credentials" }),
            ),
            Self::Conflict(reason) => (StatusCode::CONFLICT, json!({ "message": reason })),
            Self::Internal(e) => {
                error!("internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "message": "internal server error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
