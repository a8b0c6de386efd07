//! Error types for the chat subsystem

use std::time::Duration;
use thiserror::Error;

/// Result type for chat operations
pub type ChatResult<T> = Result<T, ChatError>;

/// Errors a chat submission can end in
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Submission rejected before any write
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Store unreachable, timed out or failed
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// A submission that must not be stored
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("author must not be empty")]
    EmptyAuthor,

    #[error("message body must not be empty")]
    EmptyBody,

    #[error("author {claimed} does not match session identity {identity}")]
    AuthorMismatch { identity: String, claimed: String },

    #[error("connection {0} is not admitted")]
    NotAdmitted(String),
}

/// Failures surfaced by the message store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(e: rusqlite::Error) -> Self {
        PersistenceError::Backend(e.to_string())
    }
}

impl From<r2d2::Error> for PersistenceError {
    fn from(e: r2d2::Error) -> Self {
        PersistenceError::Unavailable(e.to_string())
    }
}

/// Delivery to a single peer failed
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    #[error("peer connection closed")]
    Closed,

    #[error("peer outbound queue is full")]
    Backpressure,
}
