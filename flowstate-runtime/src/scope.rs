//! Supervised task scope owned by each machine.
//!
//! Every dispatched transition runs as its own tokio task, watched by a
//! lightweight supervisor task. A failing or panicking body is reported on
//! the failure channel and never affects its siblings. Cancelling the scope
//! aborts every task at its next suspension point.

use flowstate_core::TransitionResult;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::AbortHandle;

/// Why a task failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The body returned an error.
    Error(String),
    /// The body panicked.
    Panicked(String),
}

/// Report sent on the failure channel.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub task_id: u64,
    pub label: String,
    pub reason: FailureReason,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            FailureReason::Error(e) => {
                write!(f, "task {} ({}) failed: {}", self.task_id, self.label, e)
            }
            FailureReason::Panicked(msg) => {
                write!(f, "task {} ({}) panicked: {}", self.task_id, self.label, msg)
            }
        }
    }
}

/// Scope statistics.
#[derive(Debug, Default)]
pub struct ScopeStats {
    pub spawned_total: AtomicU64,
    pub completed_total: AtomicU64,
    pub failed_total: AtomicU64,
    pub cancelled_total: AtomicU64,
    pub in_flight: AtomicUsize,
}

struct ScopeShared {
    name: String,
    handle: Handle,
    cancel: watch::Sender<bool>,
    /// Most recently spawned task.
    latest: Mutex<Option<AbortHandle>>,
    failures: broadcast::Sender<TaskFailure>,
    stats: ScopeStats,
    idle: Notify,
    next_id: AtomicU64,
}

impl ScopeShared {
    fn report(&self, failure: TaskFailure) {
        self.stats.failed_total.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(scope = %self.name, "{}", failure);
        // No receivers is fine: the failure is still logged.
        let _ = self.failures.send(failure);
    }

    fn finish(&self) {
        if self.stats.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Owns every task a machine spawns.
pub struct TaskScope {
    shared: Arc<ScopeShared>,
}

impl TaskScope {
    /// Creates a scope spawning onto `handle`.
    pub fn new(name: impl Into<String>, handle: Handle, failure_capacity: usize) -> Self {
        let (cancel, _) = watch::channel(false);
        let (failures, _) = broadcast::channel(failure_capacity);
        Self {
            shared: Arc::new(ScopeShared {
                name: name.into(),
                handle,
                cancel,
                latest: Mutex::new(None),
                failures,
                stats: ScopeStats::default(),
                idle: Notify::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Spawns a supervised task. Returns its id, or `None` if the scope is
    /// already cancelled.
    pub fn spawn<Fut>(&self, label: impl Into<String>, task: Fut) -> Option<u64>
    where
        Fut: Future<Output = TransitionResult> + Send + 'static,
    {
        if self.is_cancelled() {
            return None;
        }

        let shared = self.shared.clone();
        let task_id = shared.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let label = label.into();
        let mut cancel_rx = shared.cancel.subscribe();

        shared.stats.spawned_total.fetch_add(1, Ordering::Relaxed);
        shared.stats.in_flight.fetch_add(1, Ordering::SeqCst);

        let mut inner = shared.handle.spawn(task);
        *shared.latest.lock() = Some(inner.abort_handle());

        let supervisor = shared.clone();
        shared.handle.spawn(async move {
            let finished = tokio::select! {
                result = &mut inner => Some(result),
                _ = cancel_rx.wait_for(|cancelled| *cancelled) => None,
            };
            let result = match finished {
                Some(result) => result,
                None => {
                    inner.abort();
                    inner.await
                }
            };

            match result {
                Ok(Ok(())) => {
                    supervisor.stats.completed_total.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(scope = %supervisor.name, task_id, "task completed");
                }
                Ok(Err(e)) => supervisor.report(TaskFailure {
                    task_id,
                    label,
                    reason: FailureReason::Error(e.to_string()),
                }),
                Err(e) if e.is_panic() => supervisor.report(TaskFailure {
                    task_id,
                    label,
                    reason: FailureReason::Panicked(panic_message(e.into_panic())),
                }),
                Err(_) => {
                    supervisor.stats.cancelled_total.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(scope = %supervisor.name, task_id, "task cancelled");
                }
            }
            supervisor.finish();
        });

        Some(task_id)
    }

    /// Cancels every task and refuses new ones. Returns false if the scope
    /// was already cancelled.
    pub fn cancel(&self) -> bool {
        let first = self.shared.cancel.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        });
        if let Some(latest) = self.shared.latest.lock().take() {
            latest.abort();
        }
        first
    }

    pub fn is_cancelled(&self) -> bool {
        *self.shared.cancel.borrow()
    }

    /// Number of tasks still running.
    pub fn in_flight(&self) -> usize {
        self.shared.stats.in_flight.load(Ordering::SeqCst)
    }

    /// Waits until no task is running.
    pub async fn idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Subscribes to failure reports from now on.
    pub fn failures(&self) -> broadcast::Receiver<TaskFailure> {
        self.shared.failures.subscribe()
    }

    pub fn stats(&self) -> &ScopeStats {
        &self.shared.stats
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }
}

impl fmt::Debug for TaskScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskScope")
            .field("name", &self.shared.name)
            .field("cancelled", &self.is_cancelled())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
