//! Storage gateway errors

use thiserror::Error;

/// Errors that can occur when talking to the object store or its locks.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object does not exist.
    #[error("object not found: {0}")]
    NotFound(String),

    /// A conditional write lost against a concurrent writer.
    #[error("precondition failed writing {path} (observed generation {generation})")]
    Conflict { path: String, generation: i64 },

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The storage API returned an error response.
    #[error("storage API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Gave up waiting for the advisory lock.
    #[error("cannot wait more for lock {0}")]
    LockTimeout(String),

    /// The caller's cancellation signal fired while waiting for a lock.
    #[error("cancelled while waiting for lock {0}")]
    Cancelled(String),

    /// The lock is held under a different id than the caller's.
    #[error("the lock id does not correspond, cannot unlock {0}")]
    StaleLock(String),

    /// The lock object body is not a UUID.
    #[error("invalid lock body in {path}: {reason}")]
    InvalidLock { path: String, reason: String },
}

impl StoreError {
    /// True for the distinct "object does not exist" case, which many
    /// callers treat as ordinary control flow rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// True when a conditional write lost to a concurrent writer.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}
