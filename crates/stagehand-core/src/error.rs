//! Error types for the stagehand runtime

use core::fmt;

/// Result type for stage, schedule and call operations
pub type StageResult<T> = Result<T, StageError>;

/// Boxed error carried by a trapped continuation
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Usage errors signaled immediately to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    /// A timer was scheduled with a negative delay
    NegativeTimeout(i64),

    /// The clock or theater has been stopped and cannot restart
    Stopped,

    /// `bind` or `trap` on a call that already completed
    AlreadyCompleted,

    /// A timer or task was operated before being bound to a context
    Unbound,

    /// The worker pool refused the job (shutting down)
    Rejected,

    /// Configuration failed validation
    InvalidConfig(&'static str),

    /// An OS thread could not be spawned
    SpawnFailed,
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageError::NegativeTimeout(millis) => write!(f, "negative timeout: {}ms", millis),
            StageError::Stopped => write!(f, "stopped"),
            StageError::AlreadyCompleted => write!(f, "call already completed"),
            StageError::Unbound => write!(f, "not bound to a context"),
            StageError::Rejected => write!(f, "job rejected by worker pool"),
            StageError::InvalidConfig(reason) => write!(f, "invalid configuration: {}", reason),
            StageError::SpawnFailed => write!(f, "failed to spawn thread"),
        }
    }
}

impl std::error::Error for StageError {}

/// Returned by [`SyncCont::await_result`](crate::SyncCont::await_result)
/// when no result arrives in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutError;

impl fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timed out waiting for continuation")
    }
}

impl std::error::Error for TimeoutError {}
