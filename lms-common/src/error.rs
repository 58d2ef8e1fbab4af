//! Common error types for LMSync

use thiserror::Error;

/// Common result type for LMSync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the LMSync services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON payload encode/decode error
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found (missing parent, master, or item)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Uniqueness violation on an idempotent upsert.
    ///
    /// Distinguished from "already applied": the existence check handles
    /// replays, so a constraint trip means two writers raced or the data
    /// is genuinely duplicated. Surfaced, never swallowed.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// start/end or available-from/to violate the window ordering invariant
    #[error("Invalid time window: {0}")]
    InvalidTimeWindow(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the underlying sqlx error is a UNIQUE constraint violation.
    pub fn is_unique_violation(err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Database(db) => db.is_unique_violation(),
            _ => false,
        }
    }
}
