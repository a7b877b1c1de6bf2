//! Runtime error types.

use crate::config::ConfigError;
use flowstate_core::CoreError;
use thiserror::Error;

/// Errors surfaced by a state machine.
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("no tokio runtime available to run transitions")]
    NoRuntime,

    #[error("unmatched policy 'error_state' requires an error-state factory")]
    MissingErrorState,
}

impl MachineError {
    /// Returns an error code suitable for host applications and logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            MachineError::Core(e) => e.error_code(),
            MachineError::Config(_) => "BAD_CONFIG",
            MachineError::NoRuntime => "NO_RUNTIME",
            MachineError::MissingErrorState => "BAD_CONFIG",
        }
    }

    /// Returns true if the event had no registered transition.
    pub fn is_no_transition(&self) -> bool {
        matches!(
            self,
            MachineError::Core(CoreError::NoTransitionRegistered { .. })
        )
    }

    /// Returns true if `retry` was refused.
    pub fn is_cannot_retry(&self) -> bool {
        matches!(self, MachineError::Core(CoreError::CannotRetry { .. }))
    }

    /// Returns true if the call was refused only because of the machine's
    /// current state and will succeed unchanged once the machine reaches an
    /// error state. Only `CannotRetry` qualifies: whether a missing
    /// transition ever matches depends on registrations, not on waiting.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MachineError::Core(CoreError::CannotRetry { .. }))
    }
}
