//! FiberDB error taxonomy.
//!
//! Every error that can escape the engine is represented here. Disposition
//! (surfaced vs. logged-and-skipped vs. internal-and-recoverable) follows the
//! policy table in the storage design: corruption on read is survivable,
//! corruption on write is fatal to that operation, capacity errors are
//! recoverable, and query syntax errors are never retried.

use thiserror::Error;

/// Errors produced by the FiberDB engine.
#[derive(Error, Debug)]
pub enum FiberError {
    /// The query descriptor was malformed: missing `primary`, an unknown
    /// operator, or a shape the query engine cannot plan.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The query's deadline elapsed before execution reached a result.
    #[error("query timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A WAL append, snapshot write, or other durable I/O operation failed.
    /// The in-memory state is never mutated when this is returned.
    #[error("storage error: {0}")]
    StorageError(String),

    /// A WAL line failed to parse during replay. Replay logs this and
    /// continues; it is never returned to a caller of `replay()` itself,
    /// but is used internally to report the skip via tracing and tests.
    #[error("corrupt log entry: {0}")]
    CorruptLogEntry(String),

    /// No registered index could answer a lookup. Internal to the index
    /// manager / query engine; causes a fallback to a full type scan and is
    /// not expected to reach a caller.
    #[error("no index available for this lookup")]
    IndexUnavailable,

    /// The query admission semaphore is full. Callers may retry after the
    /// suggested duration.
    #[error("capacity exceeded, retry after {retry_after:?}")]
    CapacityExceeded {
        /// Suggested minimum wait before retrying.
        retry_after: std::time::Duration,
    },

    /// Requested entity, index, or edge does not exist. Only used in
    /// internal plumbing; `get_entity` surfaces this as `None` rather than
    /// an error, per the public contract.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Convenience result alias used throughout the crate.
pub type FiberResult<T> = Result<T, FiberError>;

impl From<std::io::Error> for FiberError {
    fn from(err: std::io::Error) -> Self {
        FiberError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for FiberError {
    fn from(err: serde_json::Error) -> Self {
        FiberError::StorageError(err.to_string())
    }
}
