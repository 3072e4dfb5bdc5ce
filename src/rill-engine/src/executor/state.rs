//! Query lifecycle state shared by the executor, workers and result streams.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use log::{debug, warn};
use tokio::sync::watch;

use common_error::RillError;

/// Lifecycle of one query execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Validating,
    Building,
    Running,
    Succeeded,
    Failed,
}

impl QueryState {
    /// Whether the query has reached a final state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validating => "validating",
            Self::Building => "building",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Handle for cancelling query execution from outside the operator graph.
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    cancel_tx: watch::Sender<bool>,
}

impl CancellationHandle {
    /// Create a new handle and a receiver observing it.
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { cancel_tx: tx }, rx)
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    /// Whether cancellation was signalled.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Another receiver for this handle.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.cancel_tx.subscribe()
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new().0
    }
}

/// Resolve once `rx` observes cancellation. Never resolves if the handle is
/// dropped without cancelling.
pub async fn wait_cancelled(rx: &watch::Receiver<bool>) {
    let mut rx = rx.clone();
    let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

/// Phase, terminal error and cancellation of one query.
///
/// The first error recorded wins; recording it also cancels the query so
/// workers that are still running stop at their next check and finish their
/// outputs with that error.
#[derive(Debug)]
pub struct ExecutionState {
    phase: Mutex<QueryState>,
    error: Mutex<Option<RillError>>,
    cancel: CancellationHandle,
}

impl ExecutionState {
    /// A query in the `Validating` phase.
    pub fn new() -> Self {
        Self {
            phase: Mutex::new(QueryState::Validating),
            error: Mutex::new(None),
            cancel: CancellationHandle::default(),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> QueryState {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn transition(&self, to: QueryState) {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if phase.is_terminal() {
            return;
        }
        debug!("query {} -> {}", *phase, to);
        *phase = to;
    }

    /// Record an error. Returns `true` if it became the terminal error.
    pub fn fail(&self, err: RillError) -> bool {
        {
            let mut slot = self.error.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_some() {
                debug!("dropping secondary error: {err}");
                return false;
            }
            warn!("query failed: {err}");
            *slot = Some(err);
        }
        self.cancel.cancel();
        true
    }

    /// The terminal error, if any.
    pub fn error(&self) -> Option<RillError> {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The terminal error, or a cancellation error if none was recorded.
    pub fn terminal_error(&self) -> RillError {
        self.error()
            .unwrap_or_else(|| RillError::cancelled("query cancelled"))
    }

    /// The query's cancellation handle.
    pub fn cancel_handle(&self) -> &CancellationHandle {
        &self.cancel
    }

    /// Whether cancellation was signalled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self::new()
    }
}
