use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Which precondition of a [`WriteBatch`](super::session_store::WriteBatch) failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// The path was required to be absent but holds a value.
    AlreadyExists,
    /// The path was required to hold a value but is absent.
    Missing,
    /// The path holds a value different from the expected one.
    Mismatch,
}

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    #[error("write conflict on `{path}` ({kind:?})")]
    Conflict { path: String, kind: ConflictKind },
    #[error("invalid store path `{path}`: {reason}")]
    InvalidPath { path: String, reason: &'static str },
    #[error("invalid write batch: {0}")]
    InvalidBatch(String),
    #[error("stored value at `{path}` is malformed: {reason}")]
    Corrupt { path: String, reason: String },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Whether this error reports a failed precondition rather than a backend fault.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}
