//! # flowstate-core
//!
//! Core types for flowstate.
//!
//! This crate provides:
//! - Shape tags for states and events
//! - Transitions (executability predicate + asynchronous body)
//! - The transition registry and its key modes
//! - Registration helpers
//! - Core error types

pub mod error;
pub mod registrar;
pub mod registry;
pub mod tag;
pub mod transition;

pub use error::{CoreError, TransitionError};
pub use registrar::{Registrar, StateRegistrar};
pub use registry::{KeyMode, KeyOf, TransitionKey, TransitionRegistry};
pub use tag::{MachineEvent, MachineState, NoSideEffect, SideEffect, Tag, Tagged};
pub use transition::{
    transition, BoxFuture, Transition, TransitionContext, TransitionResult, TransitionScope,
};
