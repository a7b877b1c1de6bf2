//! The state machine: dispatch, retry and teardown.
//!
//! A [`StateMachine`] owns a transition registry, a state publisher, a
//! side-effect bus and a task scope. Events are matched against the
//! registry by the shape of the current state and the event; an executable
//! transition is started on the scope and runs concurrently with any other
//! transition already in flight.

use crate::config::{MachineConfig, UnmatchedPolicy};
use crate::error::MachineError;
use crate::publisher::{SideEffectBus, SideEffectStream, StatePublisher, StateStream};
use crate::scope::{ScopeStats, TaskFailure, TaskScope};
use flowstate_core::{
    CoreError, KeyMode, KeyOf, MachineEvent, MachineState, NoSideEffect, Registrar, SideEffect,
    Tagged, Transition, TransitionContext, TransitionError, TransitionRegistry, TransitionScope,
};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Builds the error state published for an unmatched event.
pub type ErrorStateFactory<S, E> = Arc<dyn Fn(&S, &E) -> S + Send + Sync>;

type RegistrationBlock<S, E, F> = Box<dyn FnOnce(&mut Registrar<'_, S, E, F>)>;

struct MachineCore<S: MachineState, E: MachineEvent, F: SideEffect> {
    id: String,
    config: MachineConfig,
    registry: TransitionRegistry<S, E, F>,
    states: StatePublisher<S>,
    side_effects: SideEffectBus<F>,
    scope: TaskScope,
    error_state: Option<ErrorStateFactory<S, E>>,
    destroyed: AtomicBool,
}

impl<S: MachineState, E: MachineEvent, F: SideEffect> MachineCore<S, E, F> {
    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Matches `event` against `current` and starts the transition if it is
    /// executable.
    fn dispatch(self: &Arc<Self>, current: S, event: E) -> Result<(), MachineError> {
        match self.resolve(&current, &event) {
            Ok(transition) => {
                self.start(&transition, &current, event);
                Ok(())
            }
            Err(Unresolved::Unmatched(err)) => self.unmatched(&current, &event, err),
            Err(Unresolved::NotExecutable) => Ok(()),
        }
    }

    /// Finds the transition for `event` in `state` and checks its predicate.
    fn resolve(&self, state: &S, event: &E) -> Result<Arc<Transition<S, E, F>>, Unresolved> {
        let Some(transition) = self.registry.find_for(state, event) else {
            return Err(Unresolved::Unmatched(CoreError::no_transition(
                &state.tag(),
                &event.tag(),
            )));
        };

        if !transition.is_executable(state) {
            tracing::debug!(
                machine_id = %self.id,
                "transition for {:?} not executable in {:?}, dropping event",
                event.tag(),
                state.tag()
            );
            return Err(Unresolved::NotExecutable);
        }
        Ok(transition)
    }

    fn start(self: &Arc<Self>, transition: &Transition<S, E, F>, state: &S, event: E) {
        let label = format!("{:?} -> {:?}", state.tag(), event.tag());
        let ctx = TransitionContext::new(Arc::new(DispatchScope { core: self.clone() })
            as Arc<dyn TransitionScope<S, F>>);
        let body = transition.execute(event, ctx);

        match self.scope.spawn(label.clone(), body) {
            Some(task_id) => {
                tracing::debug!(machine_id = %self.id, task_id, "scheduled transition {}", label)
            }
            None => tracing::debug!(
                machine_id = %self.id,
                "scope cancelled, transition {} not scheduled",
                label
            ),
        }
    }

    /// Runs a deferred retry: restores the pre-error state and starts the
    /// transition in one step, or leaves the error state untouched.
    fn resume(self: &Arc<Self>, event: E) -> Result<(), TransitionError> {
        let resumed = self
            .states
            .restore_if(|restored| self.resolve(restored, &event));

        match resumed {
            None => {
                tracing::debug!(
                    machine_id = %self.id,
                    "machine left the error state, dropping retry of {:?}",
                    event.tag()
                );
                Ok(())
            }
            Some(Ok((restored, transition))) => {
                tracing::debug!(
                    machine_id = %self.id,
                    "retrying {:?} from {:?}",
                    event.tag(),
                    restored.tag()
                );
                self.start(&transition, &restored, event);
                Ok(())
            }
            Some(Err(Unresolved::NotExecutable)) => Ok(()),
            Some(Err(Unresolved::Unmatched(err))) => match self.config.unmatched {
                UnmatchedPolicy::Reject => Err(TransitionError::Core(err)),
                UnmatchedPolicy::ErrorState => {
                    tracing::debug!(machine_id = %self.id, "{}, staying in error state", err);
                    Ok(())
                }
            },
        }
    }

    fn unmatched(&self, current: &S, event: &E, err: CoreError) -> Result<(), MachineError> {
        match self.config.unmatched {
            UnmatchedPolicy::Reject => {
                tracing::debug!(machine_id = %self.id, "{}", err);
                Err(err.into())
            }
            UnmatchedPolicy::ErrorState => {
                let factory = self
                    .error_state
                    .as_ref()
                    .ok_or(MachineError::MissingErrorState)?;
                let error_state = factory(current, event);
                tracing::debug!(
                    machine_id = %self.id,
                    "{}, moving to error state {:?}",
                    err,
                    error_state.tag()
                );
                self.states.publish(error_state);
                Ok(())
            }
        }
    }
}

/// Why an event did not start a transition.
enum Unresolved {
    Unmatched(CoreError),
    NotExecutable,
}

/// Backs the context handed to every transition body.
struct DispatchScope<S: MachineState, E: MachineEvent, F: SideEffect> {
    core: Arc<MachineCore<S, E, F>>,
}

impl<S: MachineState, E: MachineEvent, F: SideEffect> TransitionScope<S, F>
    for DispatchScope<S, E, F>
{
    fn current_state(&self) -> S {
        self.core.states.current()
    }

    fn emit_state(&self, state: S) -> bool {
        if self.core.is_destroyed() {
            return false;
        }
        tracing::trace!(machine_id = %self.core.id, "emit state {:?}", state);
        self.core.states.publish(state)
    }

    fn emit_side_effect(&self, effect: F) -> bool {
        if self.core.is_destroyed() {
            return false;
        }
        tracing::trace!(machine_id = %self.core.id, "emit side effect {:?}", effect);
        self.core.side_effects.emit(effect)
    }

    fn is_cancelled(&self) -> bool {
        self.core.is_destroyed()
    }
}

/// An asynchronous state machine.
///
/// Cloning yields another handle to the same machine. Dropping every handle
/// does not stop running transitions; call [`StateMachine::destroy`].
pub struct StateMachine<S: MachineState, E: MachineEvent, F: SideEffect = NoSideEffect> {
    core: Arc<MachineCore<S, E, F>>,
}

impl<S: MachineState, E: MachineEvent, F: SideEffect> Clone for StateMachine<S, E, F> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<S: MachineState, E: MachineEvent, F: SideEffect> StateMachine<S, E, F> {
    /// Starts building a machine that begins in `initial`.
    pub fn builder(initial: S) -> MachineBuilder<S, E, F> {
        MachineBuilder::new(initial)
    }

    /// Creates a machine with the default configuration, running `block`
    /// once to register its transitions.
    pub fn create(
        initial: S,
        block: impl FnOnce(&mut Registrar<'_, S, E, F>) + 'static,
    ) -> Result<Self, MachineError> {
        Self::builder(initial).register(block).build()
    }

    /// Returns the machine id (`machine-<uuid>`).
    pub fn id(&self) -> &str {
        &self.core.id
    }

    pub fn config(&self) -> &MachineConfig {
        &self.core.config
    }

    /// Returns a snapshot of the current state.
    pub fn current_state(&self) -> S {
        self.core.states.current()
    }

    /// Subscribes to states. The first item is the current state.
    pub fn states(&self) -> StateStream<S> {
        self.core.states.subscribe()
    }

    /// Subscribes to side effects emitted from now on.
    pub fn side_effects(&self) -> SideEffectStream<F> {
        self.core.side_effects.subscribe()
    }

    /// Subscribes to failures of transition bodies and retries.
    pub fn failures(&self) -> broadcast::Receiver<TaskFailure> {
        self.core.scope.failures()
    }

    /// Feeds an event to the machine.
    ///
    /// Returns `NoTransitionRegistered` when nothing matches and the machine
    /// rejects unmatched events. A matched transition whose predicate
    /// rejects the current state is dropped silently.
    pub fn on_event(&self, event: E) -> Result<(), MachineError> {
        if self.core.is_destroyed() {
            tracing::debug!(
                machine_id = %self.core.id,
                "machine destroyed, ignoring {:?}",
                event.tag()
            );
            return Ok(());
        }
        let current = self.core.states.current();
        self.core.dispatch(current, event)
    }

    /// Re-runs `event` against the last non-error state before the current
    /// error state, after `delay`.
    ///
    /// Fails with `CannotRetry` unless the current state is an error state
    /// with a recorded predecessor. If the machine has left the error state
    /// by the time the delay elapses, the retry is dropped. The restored
    /// state is only published when a transition for `event` starts from
    /// it; otherwise the machine stays in the error state, and with
    /// [`UnmatchedPolicy::Reject`] a missing transition is reported on
    /// [`StateMachine::failures`].
    pub fn retry(&self, event: E, delay: Duration) -> Result<(), MachineError> {
        let core = &self.core;
        if core.is_destroyed() {
            tracing::debug!(machine_id = %core.id, "machine destroyed, ignoring retry");
            return Ok(());
        }

        let current = core.states.current();
        if !current.is_error() || core.states.restore_point().is_none() {
            return Err(CoreError::CannotRetry {
                state: format!("{:?}", current.tag()),
            }
            .into());
        }

        let label = format!("retry {:?}", event.tag());
        let core = core.clone();
        let task = async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            core.resume(event)
        };

        if let Some(task_id) = self.core.scope.spawn(label, task) {
            tracing::debug!(machine_id = %self.core.id, task_id, ?delay, "retry scheduled");
        }
        Ok(())
    }

    /// Tears the machine down: cancels every running transition and pending
    /// retry, then completes all streams. Idempotent.
    pub fn destroy(&self) {
        let core = &self.core;
        if core.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        core.scope.cancel();
        core.states.close();
        core.side_effects.close();
        tracing::info!(machine_id = %core.id, "machine destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.core.is_destroyed()
    }

    /// Registers a transition after creation. Replaces any transition
    /// registered for the same key.
    pub fn register(
        &self,
        key: KeyOf<S, E>,
        transition: Transition<S, E, F>,
    ) -> Option<Arc<Transition<S, E, F>>> {
        self.core.registry.register(key, transition)
    }

    pub fn registry(&self) -> &TransitionRegistry<S, E, F> {
        &self.core.registry
    }

    /// Number of transitions and retries still running.
    pub fn in_flight(&self) -> usize {
        self.core.scope.in_flight()
    }

    /// Waits until no transition or retry is running.
    pub async fn idle(&self) {
        self.core.scope.idle().await
    }

    pub fn stats(&self) -> &ScopeStats {
        self.core.scope.stats()
    }
}

impl<S: MachineState, E: MachineEvent, F: SideEffect> fmt::Debug for StateMachine<S, E, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("id", &self.core.id)
            .field("state", &self.core.states.current())
            .field("destroyed", &self.is_destroyed())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Configures and creates a [`StateMachine`].
pub struct MachineBuilder<S: MachineState, E: MachineEvent, F: SideEffect = NoSideEffect> {
    initial: S,
    config: MachineConfig,
    handle: Option<Handle>,
    error_state: Option<ErrorStateFactory<S, E>>,
    blocks: Vec<RegistrationBlock<S, E, F>>,
}

impl<S: MachineState, E: MachineEvent, F: SideEffect> MachineBuilder<S, E, F> {
    pub fn new(initial: S) -> Self {
        Self {
            initial,
            config: MachineConfig::default(),
            handle: None,
            error_state: None,
            blocks: Vec::new(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: MachineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn key_mode(mut self, key_mode: KeyMode) -> Self {
        self.config.key_mode = key_mode;
        self
    }

    pub fn on_unmatched(mut self, policy: UnmatchedPolicy) -> Self {
        self.config.unmatched = policy;
        self
    }

    /// Sets the error-state factory and switches unmatched events to
    /// [`UnmatchedPolicy::ErrorState`].
    pub fn error_state(mut self, factory: impl Fn(&S, &E) -> S + Send + Sync + 'static) -> Self {
        self.error_state = Some(Arc::new(factory));
        self.config.unmatched = UnmatchedPolicy::ErrorState;
        self
    }

    /// Runtime that transitions are spawned on. Defaults to the runtime
    /// current at `build` time.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Adds a registration block. Blocks run once, in order, during `build`.
    pub fn register(
        mut self,
        block: impl FnOnce(&mut Registrar<'_, S, E, F>) + 'static,
    ) -> Self {
        self.blocks.push(Box::new(block));
        self
    }

    pub fn build(self) -> Result<StateMachine<S, E, F>, MachineError> {
        self.config.validate()?;
        if self.config.unmatched == UnmatchedPolicy::ErrorState && self.error_state.is_none() {
            return Err(MachineError::MissingErrorState);
        }
        let handle = match self.handle {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| MachineError::NoRuntime)?,
        };

        let id = format!("machine-{}", Uuid::new_v4());
        let registry = TransitionRegistry::new(self.config.key_mode);
        let registered = {
            let mut registrar = Registrar::new(&registry);
            for block in self.blocks {
                block(&mut registrar);
            }
            registrar.registered()
        };

        tracing::info!(
            machine_id = %id,
            key_mode = self.config.key_mode.as_str(),
            unmatched = self.config.unmatched.as_str(),
            registered,
            "machine created in {:?}",
            self.initial.tag()
        );

        let core = MachineCore {
            scope: TaskScope::new(id.clone(), handle, self.config.failure_channel_capacity),
            states: StatePublisher::new(self.initial, self.config.state_channel_capacity)
                .with_error_states(S::is_error),
            side_effects: SideEffectBus::new(self.config.side_effect_channel_capacity),
            id,
            config: self.config,
            registry,
            error_state: self.error_state,
            destroyed: AtomicBool::new(false),
        };
        Ok(StateMachine {
            core: Arc::new(core),
        })
    }
}
