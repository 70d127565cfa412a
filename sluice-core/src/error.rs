use thiserror::Error;

use crate::backlog::WorkerId;

#[derive(Error, Debug)]
pub enum SluiceError {
    /// Reconciliation was attempted while the worker still holds
    /// unacknowledged items. Indicates lost work, never retried.
    #[error("worker {worker} reconciled with {outstanding} unacknowledged item(s) still reserved")]
    ReservationNotDrained { worker: WorkerId, outstanding: usize },

    #[error("snapshot source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("failed to fetch {item}: {reason}")]
    FetchFailed { item: String, reason: String },

    #[error("failed to process {item}: {reason}")]
    ProcessingFailed { item: String, reason: String },

    #[error("backlog lock poisoned")]
    LockPoisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SluiceError {
    /// Errors that must stop the poller instead of being absorbed into the
    /// failure-acknowledgement path.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SluiceError::ReservationNotDrained { .. } | SluiceError::LockPoisoned
        )
    }

    pub fn processing(item: impl std::fmt::Debug, reason: impl std::fmt::Display) -> Self {
        SluiceError::ProcessingFailed {
            item: format!("{item:?}"),
            reason: reason.to_string(),
        }
    }

    pub fn fetch(item: impl std::fmt::Debug, reason: impl std::fmt::Display) -> Self {
        SluiceError::FetchFailed {
            item: format!("{item:?}"),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SluiceError>;
