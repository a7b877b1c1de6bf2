//! Transition registry - exact-match lookup from shape tags to transitions.

use crate::tag::{NoSideEffect, Tagged};
use crate::transition::Transition;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which shapes participate in a registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMode {
    /// Keys are `(state tag, event tag)` pairs.
    #[default]
    StateAndEvent,
    /// Keys are event tags only; the transition predicate is the sole
    /// state-dependent gate.
    EventOnly,
}

impl KeyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyMode::StateAndEvent => "state_and_event",
            KeyMode::EventOnly => "event_only",
        }
    }
}

impl std::str::FromStr for KeyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "state_and_event" | "state-and-event" => Ok(KeyMode::StateAndEvent),
            "event_only" | "event-only" => Ok(KeyMode::EventOnly),
            other => Err(format!("unknown key mode '{}'", other)),
        }
    }
}

/// Registry key. `state` is `None` for event-only registrations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransitionKey<ST, ET> {
    pub state: Option<ST>,
    pub event: ET,
}

impl<ST, ET> TransitionKey<ST, ET> {
    pub fn new(state: ST, event: ET) -> Self {
        Self {
            state: Some(state),
            event,
        }
    }

    /// A key matching `event` regardless of state (event-only mode).
    pub fn any_state(event: ET) -> Self {
        Self { state: None, event }
    }

    /// Drops the state part when `mode` ignores it.
    fn normalize(self, mode: KeyMode) -> Self {
        match mode {
            KeyMode::StateAndEvent => self,
            KeyMode::EventOnly => Self {
                state: None,
                event: self.event,
            },
        }
    }
}

/// Key type for a given state/event pair of types.
pub type KeyOf<S, E> = TransitionKey<<S as Tagged>::Tag, <E as Tagged>::Tag>;

/// Stores every transition a machine can run.
///
/// Backed by a concurrent map, so registration may race with dispatch.
pub struct TransitionRegistry<S: Tagged, E: Tagged, F = NoSideEffect> {
    mode: KeyMode,
    transitions: DashMap<KeyOf<S, E>, Arc<Transition<S, E, F>>>,
}

impl<S: Tagged, E: Tagged, F> TransitionRegistry<S, E, F> {
    pub fn new(mode: KeyMode) -> Self {
        Self {
            mode,
            transitions: DashMap::new(),
        }
    }

    pub fn mode(&self) -> KeyMode {
        self.mode
    }

    /// Registers a transition, replacing any previous one for the same key.
    ///
    /// Returns the replaced transition, if any.
    pub fn register(
        &self,
        key: KeyOf<S, E>,
        transition: Transition<S, E, F>,
    ) -> Option<Arc<Transition<S, E, F>>> {
        self.register_shared(key, Arc::new(transition))
    }

    /// Registers an already shared transition under `key`.
    pub fn register_shared(
        &self,
        key: KeyOf<S, E>,
        transition: Arc<Transition<S, E, F>>,
    ) -> Option<Arc<Transition<S, E, F>>> {
        let key = key.normalize(self.mode);
        if self.mode == KeyMode::StateAndEvent && key.state.is_none() {
            tracing::warn!(
                "transition for event {:?} registered without a state tag; it cannot match in state_and_event mode",
                key.event
            );
        }

        let replaced = self.transitions.insert(key.clone(), transition);
        if replaced.is_some() {
            tracing::debug!("replaced transition for {:?} -> {:?}", key.state, key.event);
        }
        replaced
    }

    /// Finds the transition for a state/event shape pair.
    pub fn find(&self, state: &S::Tag, event: &E::Tag) -> Option<Arc<Transition<S, E, F>>> {
        let key = match self.mode {
            KeyMode::StateAndEvent => TransitionKey::new(state.clone(), event.clone()),
            KeyMode::EventOnly => TransitionKey::any_state(event.clone()),
        };
        self.find_key(&key)
    }

    /// Finds the transition matching the shapes of `state` and `event`.
    pub fn find_for(&self, state: &S, event: &E) -> Option<Arc<Transition<S, E, F>>> {
        self.find(&state.tag(), &event.tag())
    }

    /// Looks up an exact key.
    pub fn find_key(&self, key: &KeyOf<S, E>) -> Option<Arc<Transition<S, E, F>>> {
        self.transitions.get(key).map(|r| r.value().clone())
    }

    pub fn contains(&self, state: &S::Tag, event: &E::Tag) -> bool {
        self.find(state, event).is_some()
    }

    /// Removes a registration. Returns the removed transition, if any.
    pub fn unregister(&self, key: KeyOf<S, E>) -> Option<Arc<Transition<S, E, F>>> {
        let key = key.normalize(self.mode);
        self.transitions.remove(&key).map(|(_, t)| t)
    }

    /// Returns all registered keys.
    pub fn keys(&self) -> Vec<KeyOf<S, E>> {
        self.transitions.iter().map(|r| r.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }
}

impl<S: Tagged, E: Tagged, F> Default for TransitionRegistry<S, E, F> {
    fn default() -> Self {
        Self::new(KeyMode::default())
    }
}

impl<S: Tagged, E: Tagged, F> std::fmt::Debug for TransitionRegistry<S, E, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionRegistry")
            .field("mode", &self.mode)
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    #[derive(Debug, Clone, PartialEq)]
    enum Phase {
        Initial,
        Loading,
        Loaded(Vec<String>),
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum PhaseTag {
        Initial,
        Loading,
        Loaded,
    }

    impl Tagged for Phase {
        type Tag = PhaseTag;

        fn tag(&self) -> PhaseTag {
            match self {
                Phase::Initial => PhaseTag::Initial,
                Phase::Loading => PhaseTag::Loading,
                Phase::Loaded(_) => PhaseTag::Loaded,
            }
        }
    }

    #[derive(Debug)]
    enum Command {
        ShowLoading,
        LoadData,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum CommandTag {
        ShowLoading,
        LoadData,
    }

    impl Tagged for Command {
        type Tag = CommandTag;

        fn tag(&self) -> CommandTag {
            match self {
                Command::ShowLoading => CommandTag::ShowLoading,
                Command::LoadData => CommandTag::LoadData,
            }
        }
    }

    fn noop() -> Transition<Phase, Command> {
        Transition::always(|_, _| async { Ok(()) })
    }

    #[test]
    fn test_register_and_find() {
        let registry: TransitionRegistry<Phase, Command> = TransitionRegistry::default();
        registry.register(
            TransitionKey::new(PhaseTag::Initial, CommandTag::ShowLoading),
            noop(),
        );
        registry.register(
            TransitionKey::new(PhaseTag::Loading, CommandTag::LoadData),
            noop(),
        );

        assert_eq!(registry.len(), 2);
        assert!(registry
            .find_for(&Phase::Initial, &Command::ShowLoading)
            .is_some());
        assert!(registry.find_for(&Phase::Loading, &Command::LoadData).is_some());

        // Exact match only: same event, different state shape.
        assert!(registry
            .find_for(&Phase::Loading, &Command::ShowLoading)
            .is_none());
        assert!(registry
            .find_for(&Phase::Loaded(vec!["x".into()]), &Command::LoadData)
            .is_none());
    }

    #[test]
    fn test_match_is_by_shape_not_value() {
        let registry: TransitionRegistry<Phase, Command> = TransitionRegistry::default();
        registry.register(TransitionKey::new(PhaseTag::Loaded, CommandTag::LoadData), noop());

        assert!(registry
            .find_for(&Phase::Loaded(vec![]), &Command::LoadData)
            .is_some());
        assert!(registry
            .find_for(&Phase::Loaded(vec!["a".into(), "b".into()]), &Command::LoadData)
            .is_some());
    }

    #[test]
    fn test_reregistration_overwrites() {
        let registry: TransitionRegistry<Phase, Command> = TransitionRegistry::default();
        let key = TransitionKey::new(PhaseTag::Initial, CommandTag::ShowLoading);

        let first = Arc::new(noop());
        let second = Arc::new(noop());
        assert!(registry.register_shared(key.clone(), first.clone()).is_none());
        let replaced = registry.register_shared(key.clone(), second.clone()).unwrap();

        assert!(Arc::ptr_eq(&replaced, &first));
        assert!(Arc::ptr_eq(&registry.find_key(&key).unwrap(), &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_event_only_mode_ignores_state() {
        let registry: TransitionRegistry<Phase, Command> =
            TransitionRegistry::new(KeyMode::EventOnly);
        registry.register(
            TransitionKey::new(PhaseTag::Initial, CommandTag::ShowLoading),
            noop(),
        );

        assert_eq!(
            registry.keys(),
            vec![TransitionKey::any_state(CommandTag::ShowLoading)]
        );
        assert!(registry.contains(&PhaseTag::Loading, &CommandTag::ShowLoading));
        assert!(registry.contains(&PhaseTag::Loaded, &CommandTag::ShowLoading));
        assert!(!registry.contains(&PhaseTag::Initial, &CommandTag::LoadData));
    }

    #[test]
    fn test_stateless_key_never_matches_in_pair_mode() {
        let registry: TransitionRegistry<Phase, Command> = TransitionRegistry::default();
        registry.register(TransitionKey::any_state(CommandTag::LoadData), noop());

        assert_eq!(registry.len(), 1);
        assert!(!registry.contains(&PhaseTag::Loading, &CommandTag::LoadData));
    }

    #[test]
    fn test_unregister() {
        let registry: TransitionRegistry<Phase, Command> = TransitionRegistry::default();
        let key = TransitionKey::new(PhaseTag::Initial, CommandTag::ShowLoading);
        registry.register(key.clone(), noop());

        assert!(registry.unregister(key.clone()).is_some());
        assert!(registry.unregister(key).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_key_mode_parse() {
        assert_eq!("event_only".parse::<KeyMode>(), Ok(KeyMode::EventOnly));
        assert_eq!(
            "State-And-Event".parse::<KeyMode>(),
            Ok(KeyMode::StateAndEvent)
        );
        assert!("by_type".parse::<KeyMode>().is_err());
        assert_eq!(KeyMode::EventOnly.as_str(), "event_only");
    }

    fn phase_tag(n: u8) -> PhaseTag {
        match n % 3 {
            0 => PhaseTag::Initial,
            1 => PhaseTag::Loading,
            _ => PhaseTag::Loaded,
        }
    }

    fn command_tag(n: u8) -> CommandTag {
        if n % 2 == 0 {
            CommandTag::ShowLoading
        } else {
            CommandTag::LoadData
        }
    }

    proptest! {
        #[test]
        fn prop_last_registration_wins(ops in prop::collection::vec((0u8..3, 0u8..2), 1..40)) {
            let registry: TransitionRegistry<Phase, Command> = TransitionRegistry::default();
            let mut model = HashMap::new();

            for (s, e) in ops {
                let key = TransitionKey::new(phase_tag(s), command_tag(e));
                let transition = Arc::new(noop());
                registry.register_shared(key.clone(), transition.clone());
                model.insert(key, transition);
            }

            prop_assert_eq!(registry.len(), model.len());
            for (key, expected) in &model {
                let found = registry.find_key(key).unwrap();
                prop_assert!(Arc::ptr_eq(&found, expected));
            }
        }

        #[test]
        fn prop_event_only_keys_are_unique_per_event(ops in prop::collection::vec((0u8..3, 0u8..2), 1..40)) {
            let registry: TransitionRegistry<Phase, Command> = TransitionRegistry::new(KeyMode::EventOnly);
            let mut events = std::collections::HashSet::new();

            for (s, e) in ops {
                registry.register(TransitionKey::new(phase_tag(s), command_tag(e)), noop());
                events.insert(command_tag(e));
            }

            prop_assert_eq!(registry.len(), events.len());
            for key in registry.keys() {
                prop_assert!(key.state.is_none());
            }
        }
    }
}
