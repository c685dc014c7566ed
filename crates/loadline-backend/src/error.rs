use thiserror::Error;

/// Errors reported by a backend data service call.
#[derive(Error, Debug)]
pub enum BackendError {
    /// No session, or the session token no longer validates.
    #[error("Not signed in")]
    Unauthenticated,

    #[error("Invalid email or password")]
    InvalidCredentials,

    /// A unique constraint would be violated (e.g. email already registered).
    #[error("Already exists: {0}")]
    Conflict(String),

    /// The session user may not touch this row.
    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The request was rejected before reaching storage.
    #[error("Invalid request: {0}")]
    Invalid(String),

    /// A stored row could not be decoded into its record type.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// The client handle was shut down.
    #[error("Backend client is closed")]
    Closed,

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl BackendError {
    /// Whether retrying the same call later can succeed without user action.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Task(_))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BackendError>;
