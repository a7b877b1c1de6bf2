//! State and side-effect broadcasting.
//!
//! States go through a [`StatePublisher`]: a single-slot "latest value" cell
//! paired with a broadcast channel. Subscribing and publishing take the same
//! lock, so a new subscriber always sees the current value first and then
//! every later emission, with no gap and no duplicate.
//!
//! Side effects go through a [`SideEffectBus`], which has no replay: effects
//! emitted while nobody listens are lost.

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

struct PublisherInner<S> {
    current: S,
    /// Last non-error state before the current run of error states.
    restore_point: Option<S>,
    /// `None` once closed.
    sender: Option<broadcast::Sender<S>>,
    emitted: u64,
}

/// Holds the current state and broadcasts every change.
pub struct StatePublisher<S> {
    inner: RwLock<PublisherInner<S>>,
    is_error: fn(&S) -> bool,
}

impl<S: Clone + Send + Sync + 'static> StatePublisher<S> {
    /// Creates a publisher holding `initial`. No state counts as an error
    /// until [`StatePublisher::with_error_states`] says otherwise.
    pub fn new(initial: S, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: RwLock::new(PublisherInner {
                current: initial,
                restore_point: None,
                sender: Some(sender),
                emitted: 0,
            }),
            is_error: |_| false,
        }
    }

    /// Classifies states as errors. Entering an error state from a
    /// non-error one records the state left behind as the restore point.
    pub fn with_error_states(mut self, is_error: fn(&S) -> bool) -> Self {
        self.is_error = is_error;
        self
    }

    /// Returns a snapshot of the current state.
    pub fn current(&self) -> S {
        self.inner.read().current.clone()
    }

    /// Returns the state that was current when the machine entered its
    /// current run of error states. `None` outside an error state.
    pub fn restore_point(&self) -> Option<S> {
        self.inner.read().restore_point.clone()
    }

    /// Number of states emitted since creation.
    pub fn emitted(&self) -> u64 {
        self.inner.read().emitted
    }

    /// Replaces the current state and notifies subscribers.
    ///
    /// Returns false if the publisher is closed; the state is then dropped.
    pub fn publish(&self, state: S) -> bool {
        let mut inner = self.inner.write();
        self.publish_locked(&mut inner, state)
    }

    /// Offers the restore point to `accept` while the current state is an
    /// error state. The restore point is published only if `accept`
    /// returns `Ok`; on `Err` nothing changes.
    ///
    /// Returns `None` when there is nothing to restore: the publisher is
    /// closed, the current state is not an error, or no restore point is
    /// recorded. `accept` runs under the publisher lock and must not touch
    /// the publisher.
    pub fn restore_if<R, X>(
        &self,
        accept: impl FnOnce(&S) -> Result<R, X>,
    ) -> Option<Result<(S, R), X>> {
        let mut inner = self.inner.write();
        if inner.sender.is_none() || !(self.is_error)(&inner.current) {
            return None;
        }
        let restored = inner.restore_point.clone()?;
        match accept(&restored) {
            Ok(accepted) => {
                self.publish_locked(&mut inner, restored.clone());
                Some(Ok((restored, accepted)))
            }
            Err(rejected) => Some(Err(rejected)),
        }
    }

    fn publish_locked(&self, inner: &mut PublisherInner<S>, state: S) -> bool {
        let Some(sender) = inner.sender.as_ref() else {
            return false;
        };
        // No receivers is not an error: the value is still current.
        let _ = sender.send(state.clone());

        let entering_error = (self.is_error)(&state) && !(self.is_error)(&inner.current);
        let left = std::mem::replace(&mut inner.current, state);
        if entering_error {
            inner.restore_point = Some(left);
        } else if !(self.is_error)(&inner.current) {
            inner.restore_point = None;
        }
        inner.emitted += 1;
        true
    }

    /// Subscribes to state changes, starting with the current state.
    pub fn subscribe(&self) -> StateStream<S> {
        let inner = self.inner.read();
        StateStream {
            pending: Some(inner.current.clone()),
            receiver: inner.sender.as_ref().map(|s| s.subscribe()),
        }
    }

    /// Stops broadcasting. Existing streams end after draining what they
    /// already received. Returns false if already closed.
    pub fn close(&self) -> bool {
        self.inner.write().sender.take().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().sender.is_none()
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .read()
            .sender
            .as_ref()
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}

/// A subscription to a machine's states.
pub struct StateStream<S> {
    pending: Option<S>,
    receiver: Option<broadcast::Receiver<S>>,
}

impl<S: Clone> StateStream<S> {
    /// Waits for the next state. Returns `None` once the machine is
    /// destroyed and every received state has been yielded.
    pub async fn next(&mut self) -> Option<S> {
        if let Some(state) = self.pending.take() {
            return Some(state);
        }
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(state) => return Some(state),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("state subscriber lagged, skipped {} states", skipped);
                }
                Err(RecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Returns the next state if one is already available.
    pub fn try_next(&mut self) -> Option<S> {
        if let Some(state) = self.pending.take() {
            return Some(state);
        }
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.try_recv() {
                Ok(state) => return Some(state),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!("state subscriber lagged, skipped {} states", skipped);
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Returns true once the stream can yield nothing more.
    pub fn is_terminated(&self) -> bool {
        self.pending.is_none() && self.receiver.is_none()
    }
}

/// Fire-and-forget broadcast of side effects.
pub struct SideEffectBus<F> {
    sender: RwLock<Option<broadcast::Sender<F>>>,
}

impl<F: Clone + Send + 'static> SideEffectBus<F> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: RwLock::new(Some(sender)),
        }
    }

    /// Emits a side effect to current subscribers only.
    ///
    /// Returns false if the bus is closed.
    pub fn emit(&self, effect: F) -> bool {
        match self.sender.read().as_ref() {
            Some(sender) => {
                // Effects without subscribers are intentionally lost.
                let _ = sender.send(effect);
                true
            }
            None => false,
        }
    }

    /// Subscribes to side effects emitted from now on.
    pub fn subscribe(&self) -> SideEffectStream<F> {
        SideEffectStream {
            receiver: self.sender.read().as_ref().map(|s| s.subscribe()),
        }
    }

    /// Returns false if already closed.
    pub fn close(&self) -> bool {
        self.sender.write().take().is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender
            .read()
            .as_ref()
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}

/// A subscription to a machine's side effects.
pub struct SideEffectStream<F> {
    receiver: Option<broadcast::Receiver<F>>,
}

impl<F: Clone> SideEffectStream<F> {
    /// Waits for the next side effect. Returns `None` once the machine is
    /// destroyed.
    pub async fn next(&mut self) -> Option<F> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(effect) => return Some(effect),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("side-effect subscriber lagged, lost {} effects", skipped);
                }
                Err(RecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Returns the next side effect if one is already available.
    pub fn try_next(&mut self) -> Option<F> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.try_recv() {
                Ok(effect) => return Some(effect),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!("side-effect subscriber lagged, lost {} effects", skipped);
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.receiver.is_none()
    }
}
