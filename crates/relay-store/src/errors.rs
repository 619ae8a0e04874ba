//! Error types for the session store.

use thiserror::Error;

/// Errors returned by every [`SessionStore`](crate::SessionStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Redis command or connection error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A stored entry could not be encoded or decoded.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Which migration failed and why.
        message: String,
    },

    /// Internal error (e.g. a blocking task panicked).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;
