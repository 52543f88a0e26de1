use thiserror::Error;

/// Store-level failures. Validation carries the offending field so callers
/// can surface field-level reasons to the user.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{field}: {reason}")]
    Validation {
        field: &'static str,
        reason: &'static str,
    },

    #[error("not found")]
    NotFound,

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Internal(String),
}

impl StoreError {
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}
