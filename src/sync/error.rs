//! Errors raised by synchronization primitives.

use thiserror::Error;

/// Misuse of a synchronization object.
///
/// These are programming errors surfaced as values, never silent no-ops.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// A mutex was released by a thread that does not own it.
    #[error("mutex released by a thread that does not own it")]
    NotOwner,

    /// Releasing the semaphore would exceed its maximum count.
    #[error("semaphore release of {release} would exceed maximum {max} (count {count})")]
    SemaphoreOverflow { count: u32, release: u32, max: u32 },

    /// A multi-wait was constructed over no objects.
    #[error("multi-wait requires at least one event")]
    Empty,

    /// A multi-wait was constructed over more objects than supported.
    #[error("multi-wait supports at most {max} events, got {count}")]
    TooManyObjects { count: usize, max: usize },

    /// Malformed construction or release parameters.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl SyncError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

/// Result type for synchronization operations.
pub type SyncResult<T> = Result<T, SyncError>;
