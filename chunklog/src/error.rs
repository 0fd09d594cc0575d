//! Error types for chunklog operations.

use common::{CacheError, CxError};

/// Errors returned by chunklog operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The requested log, chunk or record does not exist.
    #[error("not found: {0}")]
    NotExist(String),

    /// Malformed input: a bad start ID, an unsupported condition or a record
    /// too large to fit into an empty chunk.
    #[error("invalid argument: {0}")]
    Invalid(String),

    /// The request spans more resources than the service allows.
    #[error("resource exhausted: {0}")]
    Exhausted(String),

    /// The store has been shut down.
    #[error("closed")]
    Closed,

    /// The caller's context was canceled.
    #[error("canceled")]
    Canceled,

    /// The caller's deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Data was written but its metadata could not be recorded. The
    /// affected log refuses further writes.
    #[error("corruption: {0}")]
    Corruption(String),

    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error came from the caller's own context.
    pub fn is_context(&self) -> bool {
        matches!(self, Error::Canceled | Error::DeadlineExceeded)
    }
}

impl From<CxError> for Error {
    fn from(err: CxError) -> Self {
        match err {
            CxError::Canceled => Error::Canceled,
            CxError::DeadlineExceeded => Error::DeadlineExceeded,
        }
    }
}

impl From<CacheError> for Error {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Closed => Error::Closed,
            CacheError::Canceled(cx) => cx.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

/// Result type alias for chunklog operations.
pub type Result<T> = std::result::Result<T, Error>;
