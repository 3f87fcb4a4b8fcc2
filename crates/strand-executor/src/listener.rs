//! Task lifecycle listeners
//!
//! A [`TaskListener`] attached to an executor is told when each task is
//! submitted, starts, finishes or is aborted without running. Listeners run
//! on whichever thread drives the transition and must not block.

use std::fmt;
use std::sync::Arc;

use crate::errors::TaskError;
use crate::task::TaskId;

/// Observer of task lifecycle transitions; every method defaults to a no-op
pub trait TaskListener: Send + Sync + 'static {
    /// The task was accepted by the executor
    fn submitted(&self, _executor: &str, _task: TaskId) {}

    /// The task is about to apply its context and run
    fn starting(&self, _executor: &str, _task: TaskId) {}

    /// The task ran; `failure` is set if it did not produce a value
    fn done(&self, _executor: &str, _task: TaskId, _failure: Option<&TaskError>) {}

    /// The task will never run (cancelled before start, rejected, or dropped at shutdown)
    fn aborted(&self, _executor: &str, _task: TaskId, _reason: &TaskError) {}
}

/// The listeners of one executor
#[derive(Clone)]
pub(crate) struct Listeners {
    executor: Arc<str>,
    listeners: Arc<[Arc<dyn TaskListener>]>,
}

impl Listeners {
    pub(crate) fn new(executor: &str, listeners: Vec<Arc<dyn TaskListener>>) -> Self {
        Self {
            executor: Arc::from(executor),
            listeners: listeners.into(),
        }
    }

    pub(crate) fn submitted(&self, task: TaskId) {
        for l in self.listeners.iter() {
            l.submitted(&self.executor, task);
        }
    }

    pub(crate) fn starting(&self, task: TaskId) {
        for l in self.listeners.iter() {
            l.starting(&self.executor, task);
        }
    }

    pub(crate) fn done(&self, task: TaskId, failure: Option<&TaskError>) {
        for l in self.listeners.iter() {
            l.done(&self.executor, task, failure);
        }
    }

    pub(crate) fn aborted(&self, task: TaskId, reason: &TaskError) {
        for l in self.listeners.iter() {
            l.aborted(&self.executor, task, reason);
        }
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("executor", &self.executor)
            .field("count", &self.listeners.len())
            .finish()
    }
}
