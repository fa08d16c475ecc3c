//! Managed thread launch errors.

use thiserror::Error;

use super::ThreadPriority;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThreadError {
    #[error("thread '{name}' is already running")]
    AlreadyRunning { name: String },

    #[error("failed to spawn thread '{name}': {reason}")]
    Spawn { name: String, reason: String },

    /// The priority could not be applied; the worker was never started.
    #[error("failed to apply {priority:?} priority to thread '{name}': {reason}")]
    Priority {
        name: String,
        priority: ThreadPriority,
        reason: String,
    },
}

impl ThreadError {
    pub fn already_running(name: impl Into<String>) -> Self {
        Self::AlreadyRunning { name: name.into() }
    }
}
