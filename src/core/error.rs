//! Error types for queue operations.

use thiserror::Error;

/// Errors produced by queues, consumer pools and the execution pool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Queue holds `max_size` items already; the item was not admitted.
    #[error("queue capacity exceeded (max size: {max_size})")]
    CapacityExceeded {
        /// Configured admission limit.
        max_size: usize,
    },
    /// Shutdown has been signaled; no new items are admitted.
    #[error("queue is shutting down")]
    Shutdown,
    /// Consumers for this queue are already running.
    #[error("queue already started")]
    AlreadyStarted,
    /// A task did not finish within its wait bound.
    #[error("operation timed out")]
    Timeout,
    /// A task panicked or its pool was torn down before it finished.
    #[error("execution failed: {0}")]
    Execution(String),
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// An OS thread could not be spawned.
    #[error("failed to spawn thread: {0}")]
    Spawn(String),
}

impl QueueError {
    /// Whether this is an admission-time rejection (capacity or shutdown).
    #[must_use]
    pub const fn is_admission(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. } | Self::Shutdown)
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
