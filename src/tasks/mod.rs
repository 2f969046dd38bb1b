pub mod types;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use types::{TaskId, TaskKind, TaskState};

/// Shared view of one background task.
///
/// The supervisor keeps one clone, the worker thread the other. State
/// changes go through [`TaskHandle::transition`] so illegal moves are
/// refused instead of silently applied.
#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<Inner>,
}

struct Inner {
    id: TaskId,
    kind: TaskKind,
    state: Mutex<TaskState>,
    token: CancellationToken,
}

impl TaskHandle {
    pub fn new(kind: TaskKind) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: TaskId::new(),
                kind,
                state: Mutex::new(TaskState::Pending),
                token: CancellationToken::new(),
            }),
        }
    }

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn kind(&self) -> TaskKind {
        self.inner.kind
    }

    pub fn state(&self) -> TaskState {
        *self.inner.state.lock()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    pub fn transition(&self, next: TaskState) -> bool {
        let mut state = self.inner.state.lock();
        let current = *state;
        if !current.can_transition_to(next) {
            tracing::debug!(
                task = %self.inner.id,
                from = ?current,
                to = ?next,
                "ignored task state transition"
            );
            return false;
        }
        tracing::debug!(task = %self.inner.id, kind = %self.inner.kind, from = ?current, to = ?next, "task state");
        *state = next;
        true
    }

    /// Request cancellation. Returns true if the task was still active.
    pub fn cancel(&self) -> bool {
        let mut state = self.inner.state.lock();
        self.inner.token.cancel();
        match *state {
            TaskState::Pending | TaskState::Running => {
                *state = TaskState::Canceling;
                true
            }
            TaskState::Canceling => true,
            _ => false,
        }
    }

    /// Run `publish` and mark the task completed, unless cancellation won.
    ///
    /// The check and the hand-off happen under the state lock, so once
    /// `cancel` has returned nothing can be published any more.
    pub fn complete_with<F: FnOnce()>(&self, publish: F) -> bool {
        let mut state = self.inner.state.lock();
        if self.inner.token.is_cancelled() || *state != TaskState::Running {
            return false;
        }
        publish();
        *state = TaskState::Completed;
        true
    }
}
