//! Error types for Refract.

use crate::filter::FilterError;
use thiserror::Error;

/// Result type alias using Refract's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Refract operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid input (empty descriptor, zero-sized frame, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Graph pool is exhausted: every cached graph is in use and a new
    /// fingerprint cannot be admitted.
    #[error("graph pool exhausted: no idle entry to evict")]
    PoolExhausted,

    /// Filter graph construction or processing failed.
    ///
    /// The inner error is forwarded unmodified so callers can
    /// distinguish build failures from mid-stream failures.
    #[error("filter error: {0}")]
    Filter(#[from] FilterError),

    /// Image decoding failed.
    #[error("decode failed: {0}")]
    Decode(String),

    /// Image encoding failed.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Worker pool queue is full and the reject policy fired.
    #[error("task queue full")]
    QueueFull,

    /// Blocking submission timed out waiting for queue space.
    #[error("submit timed out waiting for queue space")]
    SubmitTimeout,

    /// Task was discarded because the queue was full.
    #[error("task discarded: queue full")]
    TaskDiscarded,

    /// Operation attempted on a stopped worker pool.
    #[error("worker pool is shut down")]
    Shutdown,

    /// A submitted task panicked.
    #[error("task panicked: {0}")]
    TaskPanicked(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
