//! # flowstate-runtime
//!
//! Dispatch engine for flowstate.
//!
//! This crate provides:
//! - The state machine and its builder
//! - Replaying state streams and no-replay side-effect streams
//! - A supervised task scope with cancel-all and failure reporting
//! - YAML/env configuration

pub mod config;
pub mod error;
pub mod machine;
pub mod publisher;
pub mod scope;

pub use config::{ConfigError, MachineConfig, UnmatchedPolicy};
pub use error::MachineError;
pub use machine::{ErrorStateFactory, MachineBuilder, StateMachine};
pub use publisher::{SideEffectBus, SideEffectStream, StatePublisher, StateStream};
pub use scope::{FailureReason, ScopeStats, TaskFailure, TaskScope};
