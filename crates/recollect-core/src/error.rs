//! Error taxonomy for the retrieval core.
//!
//! Every public operation returns `Result<T>` with a typed error kind
//! rather than panicking. Mapping to a stable wire error code (e.g.
//! `E040`, `E429`) is left to whatever boundary wraps the core.

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, RecollectError>;

/// Error taxonomy described in spec section 7.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum RecollectError {
    /// Missing, empty, over-long, or out-of-range parameters. Fails fast,
    /// never partially applied.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A memory id, session id, or pending file does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A save path escapes the allowed base directory or is not `.md`.
    #[error("path access denied: {0}")]
    PathAccessDenied(String),

    /// A guarded endpoint (e.g. the index-scan cooldown) rejected the call.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited {
        /// Suggested wait before retrying, in milliseconds.
        retry_after_ms: u64,
    },

    /// The underlying store or filesystem failed.
    #[error("storage failed: {0}")]
    StorageFailed(String),

    /// An embedding provider is down or BM25 is disabled; caller should
    /// degrade rather than fail outright.
    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    /// A cooperative cancellation or deadline expiry.
    #[error("operation timed out or was cancelled")]
    Cancelled,

    /// The PE gate decided UPDATE/SUPERSEDE/REINFORCE/CREATE_LINKED. Not an
    /// error; returned through the same channel for observability.
    #[error("conflict resolved via {action:?}")]
    ConflictResolved {
        /// The gate action that was taken.
        action: crate::model::GateAction,
    },
}

impl RecollectError {
    /// Short helper for the common "empty query" validation failure.
    pub fn empty_query() -> Self {
        RecollectError::InvalidInput("query must be non-empty after trimming".into())
    }
}
