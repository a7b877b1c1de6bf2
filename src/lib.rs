//! flowstate - asynchronous state machines dispatched on the shape of
//! states and events.
//!
//! A machine holds one current state. Events are matched against registered
//! transitions by the tag of the current state and the tag of the event; a
//! matching transition whose predicate accepts the current state runs as an
//! async task that may read the state and emit new ones. Subscribers receive
//! the current state first and every emission after it.
//!
//! ```rust
//! use flowstate::{MachineState, StateMachine, Tagged, Transition};
//!
//! #[derive(Debug, Clone, PartialEq)]
//! enum Door {
//!     Closed,
//!     Open,
//! }
//!
//! impl Tagged for Door {
//!     type Tag = &'static str;
//!     fn tag(&self) -> &'static str {
//!         match self {
//!             Door::Closed => "closed",
//!             Door::Open => "open",
//!         }
//!     }
//! }
//!
//! impl MachineState for Door {}
//!
//! #[derive(Debug)]
//! struct Push;
//!
//! impl Tagged for Push {
//!     type Tag = &'static str;
//!     fn tag(&self) -> &'static str {
//!         "push"
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), flowstate::MachineError> {
//! let door: StateMachine<Door, Push> = StateMachine::create(Door::Closed, |r| {
//!     r.on("closed", "push", Transition::always(|_, ctx| async move {
//!         ctx.emit(Door::Open);
//!         Ok(())
//!     }));
//! })?;
//!
//! let mut states = door.states();
//! door.on_event(Push)?;
//! door.idle().await;
//!
//! assert_eq!(states.next().await, Some(Door::Closed));
//! assert_eq!(states.next().await, Some(Door::Open));
//! door.destroy();
//! # Ok(())
//! # }
//! ```

pub use flowstate_core::{
    transition, BoxFuture, CoreError, KeyMode, KeyOf, MachineEvent, MachineState, NoSideEffect,
    Registrar, SideEffect, StateRegistrar, Tag, Tagged, Transition, TransitionContext,
    TransitionError, TransitionKey, TransitionRegistry, TransitionResult, TransitionScope,
};
pub use flowstate_runtime::{
    ConfigError, ErrorStateFactory, FailureReason, MachineBuilder, MachineConfig, MachineError,
    SideEffectStream, StateMachine, StateStream, TaskFailure, UnmatchedPolicy,
};

/// Installs a `tracing` subscriber filtered by `RUST_LOG`, defaulting to
/// `default_filter`. Does nothing if a global subscriber is already set.
pub fn init_logging(default_filter: &str) {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .try_init();
}
