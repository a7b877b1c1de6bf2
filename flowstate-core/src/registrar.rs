//! Registration helpers used while building a machine.
//!
//! ```rust
//! use flowstate_core::{Registrar, Tagged, Transition, TransitionRegistry};
//!
//! #[derive(Debug, Clone)]
//! enum Light { Red, Green }
//! #[derive(Debug)]
//! struct Tick;
//!
//! impl Tagged for Light {
//!     type Tag = &'static str;
//!     fn tag(&self) -> &'static str {
//!         match self { Light::Red => "red", Light::Green => "green" }
//!     }
//! }
//! impl Tagged for Tick {
//!     type Tag = &'static str;
//!     fn tag(&self) -> &'static str { "tick" }
//! }
//!
//! let registry = TransitionRegistry::<Light, Tick>::default();
//! let mut r = Registrar::new(&registry);
//! r.in_state("red", |s| {
//!     s.on("tick", Transition::always(|_, ctx| async move {
//!         ctx.emit(Light::Green);
//!         Ok(())
//!     }));
//! })
//! .on("green", "tick", Transition::always(|_, ctx| async move {
//!     ctx.emit(Light::Red);
//!     Ok(())
//! }));
//!
//! assert_eq!(registry.len(), 2);
//! ```

use crate::registry::{TransitionKey, TransitionRegistry};
use crate::tag::{NoSideEffect, Tagged};
use crate::transition::Transition;
use std::sync::Arc;

/// Registers transitions into a [`TransitionRegistry`].
///
/// Later registrations for the same key replace earlier ones. Nothing checks
/// that every state/event pair is covered.
pub struct Registrar<'a, S: Tagged, E: Tagged, F = NoSideEffect> {
    registry: &'a TransitionRegistry<S, E, F>,
    registered: usize,
}

impl<'a, S: Tagged, E: Tagged, F> Registrar<'a, S, E, F> {
    pub fn new(registry: &'a TransitionRegistry<S, E, F>) -> Self {
        Self {
            registry,
            registered: 0,
        }
    }

    /// Registers `transition` for `event` while the machine is in `state`.
    pub fn on(
        &mut self,
        state: S::Tag,
        event: E::Tag,
        transition: Transition<S, E, F>,
    ) -> &mut Self {
        self.registry
            .register(TransitionKey::new(state, event), transition);
        self.registered += 1;
        self
    }

    /// Registers a shared transition for `event` while the machine is in
    /// `state`.
    pub fn on_shared(
        &mut self,
        state: S::Tag,
        event: E::Tag,
        transition: Arc<Transition<S, E, F>>,
    ) -> &mut Self {
        self.registry
            .register_shared(TransitionKey::new(state, event), transition);
        self.registered += 1;
        self
    }

    /// Registers `transition` for `event` in any state. Only matches when the
    /// registry keys by event alone.
    pub fn on_event(
        &mut self,
        event: E::Tag,
        transition: Transition<S, E, F>,
    ) -> &mut Self {
        self.registry
            .register(TransitionKey::any_state(event), transition);
        self.registered += 1;
        self
    }

    /// Registers every transition declared in `block` for `state`.
    pub fn in_state(
        &mut self,
        state: S::Tag,
        block: impl FnOnce(&mut StateRegistrar<'_, S, E, F>),
    ) -> &mut Self {
        let mut scoped = StateRegistrar {
            registry: self.registry,
            state,
            registered: 0,
        };
        block(&mut scoped);
        self.registered += scoped.registered;
        self
    }

    /// Runs `block` once per state, so each state gets its own transitions.
    pub fn in_states(
        &mut self,
        states: impl IntoIterator<Item = S::Tag>,
        block: impl Fn(&mut StateRegistrar<'_, S, E, F>),
    ) -> &mut Self {
        for state in states {
            self.in_state(state, &block);
        }
        self
    }

    /// Number of registrations performed through this registrar.
    pub fn registered(&self) -> usize {
        self.registered
    }

    pub fn registry(&self) -> &TransitionRegistry<S, E, F> {
        self.registry
    }
}

/// Registrar bound to a single source state.
pub struct StateRegistrar<'a, S: Tagged, E: Tagged, F = NoSideEffect> {
    registry: &'a TransitionRegistry<S, E, F>,
    state: S::Tag,
    registered: usize,
}

impl<'a, S: Tagged, E: Tagged, F> StateRegistrar<'a, S, E, F> {
    /// Registers `transition` for `event` in the bound state.
    pub fn on(
        &mut self,
        event: E::Tag,
        transition: Transition<S, E, F>,
    ) -> &mut Self {
        self.registry
            .register(TransitionKey::new(self.state.clone(), event), transition);
        self.registered += 1;
        self
    }

    pub fn state(&self) -> &S::Tag {
        &self.state
    }
}
