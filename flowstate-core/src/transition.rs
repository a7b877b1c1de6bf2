//! Transitions: an executability predicate plus an asynchronous body.

use crate::error::TransitionError;
use crate::tag::NoSideEffect;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of running a transition body.
pub type TransitionResult = Result<(), TransitionError>;

type Predicate<S> = Box<dyn Fn(&S) -> bool + Send + Sync>;

type Body<S, E, F> =
    Box<dyn Fn(E, TransitionContext<S, F>) -> BoxFuture<'static, TransitionResult> + Send + Sync>;

/// The machine-side half of a [`TransitionContext`].
///
/// The dispatch engine implements this for every task it schedules.
pub trait TransitionScope<S, F>: Send + Sync {
    /// Returns the machine's current state at the time of the call.
    fn current_state(&self) -> S;

    /// Publishes a new current state. Returns false if it was discarded.
    fn emit_state(&self, state: S) -> bool;

    /// Publishes a side effect. Returns false if it was discarded.
    fn emit_side_effect(&self, effect: F) -> bool;

    /// Returns true once the owning machine has been destroyed.
    fn is_cancelled(&self) -> bool;
}

/// Handle given to a transition body for reading and emitting state.
pub struct TransitionContext<S, F = NoSideEffect> {
    scope: Arc<dyn TransitionScope<S, F>>,
}

impl<S, F> Clone for TransitionContext<S, F> {
    fn clone(&self) -> Self {
        Self {
            scope: self.scope.clone(),
        }
    }
}

impl<S, F> fmt::Debug for TransitionContext<S, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionContext")
            .field("cancelled", &self.scope.is_cancelled())
            .finish()
    }
}

impl<S, F> TransitionContext<S, F> {
    pub fn new(scope: Arc<dyn TransitionScope<S, F>>) -> Self {
        Self { scope }
    }

    /// Reads the current state. Other transitions may emit between two
    /// calls, so re-read after every suspension point.
    pub fn state(&self) -> S {
        self.scope.current_state()
    }

    /// Publishes `state` as the new current state.
    pub fn emit(&self, state: S) -> bool {
        self.scope.emit_state(state)
    }

    /// Reads the current state, applies `f` and emits the result.
    ///
    /// Not atomic with respect to other transitions.
    pub fn update(&self, f: impl FnOnce(S) -> S) -> bool {
        let next = f(self.scope.current_state());
        self.scope.emit_state(next)
    }

    /// Publishes a one-shot side effect.
    pub fn emit_side_effect(&self, effect: F) -> bool {
        self.scope.emit_side_effect(effect)
    }

    pub fn is_cancelled(&self) -> bool {
        self.scope.is_cancelled()
    }
}

/// A registered unit of work.
pub struct Transition<S, E, F = NoSideEffect> {
    predicate: Predicate<S>,
    body: Body<S, E, F>,
}

impl<S, E, F> Transition<S, E, F>
where
    S: Send + Sync + 'static,
    E: Send + 'static,
    F: Send + 'static,
{
    /// Creates a transition gated by `predicate`.
    pub fn new<P, B, Fut>(predicate: P, body: B) -> Self
    where
        P: Fn(&S) -> bool + Send + Sync + 'static,
        B: Fn(E, TransitionContext<S, F>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TransitionResult> + Send + 'static,
    {
        Self {
            predicate: Box::new(predicate),
            body: Box::new(move |event, ctx| Box::pin(body(event, ctx))),
        }
    }

    /// Creates a transition that is executable in every state.
    pub fn always<B, Fut>(body: B) -> Self
    where
        B: Fn(E, TransitionContext<S, F>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TransitionResult> + Send + 'static,
    {
        Self::new(|_: &S| true, body)
    }
}

impl<S, E, F> Transition<S, E, F> {
    /// Evaluates the predicate against `state`.
    pub fn is_executable(&self, state: &S) -> bool {
        (self.predicate)(state)
    }

    /// Starts the body. The returned future does nothing until polled.
    pub fn execute(&self, event: E, ctx: TransitionContext<S, F>) -> BoxFuture<'static, TransitionResult> {
        (self.body)(event, ctx)
    }
}

impl<S, E, F> fmt::Debug for Transition<S, E, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition").finish_non_exhaustive()
    }
}

/// Creates a gated transition. Shorthand for [`Transition::new`].
pub fn transition<S, E, F, P, B, Fut>(predicate: P, body: B) -> Transition<S, E, F>
where
    S: Send + Sync + 'static,
    E: Send + 'static,
    F: Send + 'static,
    P: Fn(&S) -> bool + Send + Sync + 'static,
    B: Fn(E, TransitionContext<S, F>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TransitionResult> + Send + 'static,
{
    Transition::new(predicate, body)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// In-memory scope recording everything a body emits.
    pub(crate) struct RecordingScope<S, F> {
        pub current: Mutex<S>,
        pub states: Mutex<Vec<S>>,
        pub effects: Mutex<Vec<F>>,
        pub cancelled: AtomicBool,
    }

    impl<S: Clone, F> RecordingScope<S, F> {
        pub(crate) fn new(initial: S) -> Arc<Self> {
            Arc::new(Self {
                current: Mutex::new(initial),
                states: Mutex::new(Vec::new()),
                effects: Mutex::new(Vec::new()),
                cancelled: AtomicBool::new(false),
            })
        }
    }

    impl<S, F> TransitionScope<S, F> for RecordingScope<S, F>
    where
        S: Clone + Send + Sync,
        F: Send + Sync,
    {
        fn current_state(&self) -> S {
            self.current.lock().unwrap().clone()
        }

        fn emit_state(&self, state: S) -> bool {
            if self.cancelled.load(Ordering::SeqCst) {
                return false;
            }
            *self.current.lock().unwrap() = state.clone();
            self.states.lock().unwrap().push(state);
            true
        }

        fn emit_side_effect(&self, effect: F) -> bool {
            if self.cancelled.load(Ordering::SeqCst) {
                return false;
            }
            self.effects.lock().unwrap().push(effect);
            true
        }

        fn is_cancelled(&self) -> bool {
            self.cancelled.load(Ordering::SeqCst)
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Page {
        loading: bool,
        items: Vec<String>,
    }

    #[derive(Debug)]
    enum PageEvent {
        Loaded(Vec<String>),
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Nav {
        Details(String),
    }

    #[test]
    fn test_predicate_evaluation() {
        let t: Transition<Page, PageEvent> =
            Transition::new(|p: &Page| p.loading, |_, _| async { Ok(()) });

        assert!(t.is_executable(&Page {
            loading: true,
            items: vec![]
        }));
        assert!(!t.is_executable(&Page {
            loading: false,
            items: vec![]
        }));
    }

    #[tokio::test]
    async fn test_body_reads_and_emits() {
        let scope = RecordingScope::<Page, Nav>::new(Page {
            loading: true,
            items: vec![],
        });
        let t: Transition<Page, PageEvent, Nav> =
            Transition::always(|event, ctx: TransitionContext<Page, Nav>| async move {
                let PageEvent::Loaded(items) = event;
                let first = items.first().cloned();
                ctx.update(move |page| Page {
                    loading: !page.loading,
                    items,
                });
                if let Some(first) = first {
                    ctx.emit_side_effect(Nav::Details(first));
                }
                Ok(())
            });

        let ctx = TransitionContext::new(scope.clone() as Arc<dyn TransitionScope<Page, Nav>>);
        t.execute(PageEvent::Loaded(vec!["a".into(), "b".into()]), ctx)
            .await
            .unwrap();

        let states = scope.states.lock().unwrap().clone();
        assert_eq!(
            states,
            vec![Page {
                loading: false,
                items: vec!["a".into(), "b".into()]
            }]
        );
        assert_eq!(
            scope.effects.lock().unwrap().clone(),
            vec![Nav::Details("a".into())]
        );
    }

    #[tokio::test]
    async fn test_body_failure_is_returned() {
        let scope = RecordingScope::<Page, NoSideEffect>::new(Page {
            loading: true,
            items: vec![],
        });
        let t: Transition<Page, PageEvent> =
            transition(|_: &Page| true, |_, _| async { Err(TransitionError::failed("offline")) });

        let ctx = TransitionContext::new(scope.clone() as Arc<dyn TransitionScope<Page, NoSideEffect>>);
        let err = t
            .execute(PageEvent::Loaded(vec![]), ctx)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "transition failed: offline");
        assert!(scope.states.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_emit_after_cancel_is_discarded() {
        let scope = RecordingScope::<Page, NoSideEffect>::new(Page {
            loading: false,
            items: vec![],
        });
        scope.cancelled.store(true, Ordering::SeqCst);
        let ctx = TransitionContext::new(scope.clone() as Arc<dyn TransitionScope<Page, NoSideEffect>>);

        assert!(ctx.is_cancelled());
        assert!(!ctx.emit(Page {
            loading: true,
            items: vec![]
        }));
        assert!(scope.states.lock().unwrap().is_empty());
    }
}
