//! Error types shared by every crate that touches persisted state.

/// Errors that can occur in core storage operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("other error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

/// Result type for core/storage operations.
pub type Result<T> = std::result::Result<T, CoreError>;
