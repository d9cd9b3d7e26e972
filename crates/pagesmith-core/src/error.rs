//! Error taxonomy for the orchestration engine.
//!
//! Failure is a value: handlers classify every error into one of these
//! kinds, record the message on the owning job, and let the worker decide
//! between retry and dead-letter based on [`EngineError::is_retriable`].

use thiserror::Error;

use crate::store::StoreError;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Input rejected at the boundary (bad MIME, too large, malformed source).
    #[error("validation error: {0}")]
    Validation(String),

    /// Job or result does not exist, is owned by someone else, or expired.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation clashes with the job's current state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Source adapter error (remote timeout, 404, permissions).
    #[error("source fetch failed: {0}")]
    FetchFailed(String),

    /// The converter raised; carries the converter's message.
    #[error("conversion failed: {0}")]
    ConvertFailed(String),

    /// PDF split aborted (corrupt, encrypted, empty).
    #[error("split failed: {0}")]
    SplitFailed(String),

    /// Handler exceeded the per-item budget.
    #[error("operation timed out after {0}s")]
    Timeout(u64),

    #[error("queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Catch-all; the message is never exposed verbatim to clients.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable wire name for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::NotFound(_) => "not_found",
            EngineError::Conflict(_) => "conflict",
            EngineError::FetchFailed(_) => "fetch_failed",
            EngineError::ConvertFailed(_) => "convert_failed",
            EngineError::SplitFailed(_) => "split_failed",
            EngineError::Timeout(_) => "timeout",
            EngineError::QueueUnavailable(_) => "queue_unavailable",
            EngineError::StoreUnavailable(_) => "store_unavailable",
            EngineError::Internal(_) => "internal",
        }
    }

    /// Whether the queue should re-deliver the work item.
    ///
    /// Validation, conversion and split errors are permanent: re-running
    /// the same input produces the same outcome.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            EngineError::FetchFailed(_)
                | EngineError::Timeout(_)
                | EngineError::QueueUnavailable(_)
                | EngineError::StoreUnavailable(_)
                | EngineError::Internal(_)
        )
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => EngineError::NotFound(what),
            StoreError::Unavailable(msg) => EngineError::StoreUnavailable(msg),
            StoreError::Serialization(msg) => EngineError::Internal(msg),
        }
    }
}
