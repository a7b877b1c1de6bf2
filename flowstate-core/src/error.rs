//! Core error types.

use thiserror::Error;

/// Errors raised by dispatch and retry bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("no transition registered: cannot apply '{event}' in state '{state}'")]
    NoTransitionRegistered { state: String, event: String },

    #[error("cannot retry: machine is not in an error state (current: '{state}')")]
    CannotRetry { state: String },
}

impl CoreError {
    /// Builds a `NoTransitionRegistered` error from the offending pair.
    pub fn no_transition(state: &impl std::fmt::Debug, event: &impl std::fmt::Debug) -> Self {
        CoreError::NoTransitionRegistered {
            state: format!("{:?}", state),
            event: format!("{:?}", event),
        }
    }

    /// Returns an error code suitable for host applications and logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::NoTransitionRegistered { .. } => "NO_TRANSITION",
            CoreError::CannotRetry { .. } => "CANNOT_RETRY",
        }
    }
}

/// Failure produced by a transition body.
///
/// The engine never inspects these beyond reporting them; a failing body
/// leaves the current state untouched unless it emitted before failing.
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("transition failed: {0}")]
    Failed(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl TransitionError {
    /// Shorthand for a failure carrying only a message.
    pub fn failed(reason: impl Into<String>) -> Self {
        TransitionError::Failed(reason.into())
    }
}
