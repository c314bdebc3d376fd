//! Error types for InboxWarm.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WarmupError>;

#[derive(Debug, Error)]
pub enum WarmupError {
    /// Network or provider hiccup; the work item is marked failed and retried by a later sweep.
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Mailbox error: {0}")]
    Mailbox(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Inconsistent or missing records for an inbound event.
    #[error("Data error: {0}")]
    Data(String),

    #[error("Score calculation failed: {0}")]
    Calculation(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for WarmupError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl WarmupError {
    /// Errors that should leave the item for the next sweep instead of skipping it.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::AuthFailed(_) | Self::Mailbox(_)
        )
    }

    /// Errors that abort a whole trigger pass rather than a single item.
    pub fn is_fatal_for_pass(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Io(_))
    }
}
