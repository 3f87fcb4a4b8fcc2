//! Task identity, completion and handles
//!
//! A submission is split in two: the job keeps a [`Completion`] and the
//! submitter gets a [`TaskHandle`], joined by a oneshot channel. Both share a
//! [`TaskState`] that moves `Pending -> Running -> Finished`; cancellation may
//! move it to `Cancelled` from either of the first two states, after which the
//! outcome is never delivered.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::cancellation::CancellationToken;
use crate::driver::Driver;
use crate::errors::TaskError;

/// Unique identifier of a submitted task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Create a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0.simple())
    }
}

/// Outcome of a task as seen through its handle
pub type TaskResult<R> = std::result::Result<R, TaskError>;

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const FINISHED: u8 = 2;
const CANCELLED: u8 = 3;

/// Lifecycle shared by a job, its handle and the pool's running set
#[derive(Debug)]
pub(crate) struct TaskState {
    id: TaskId,
    token: CancellationToken,
    phase: AtomicU8,
}

impl TaskState {
    pub(crate) fn new(id: TaskId) -> Arc<Self> {
        Arc::new(Self {
            id,
            token: CancellationToken::new(),
            phase: AtomicU8::new(PENDING),
        })
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.phase
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claim the task for running; fails once cancelled
    pub(crate) fn try_start(&self) -> bool {
        self.transition(PENDING, RUNNING)
    }

    fn try_finish(&self) -> bool {
        self.transition(RUNNING, FINISHED) || self.transition(PENDING, FINISHED)
    }

    /// Returns `true` if this call cancelled the task
    pub(crate) fn cancel(&self) -> bool {
        let won = self.transition(PENDING, CANCELLED) || self.transition(RUNNING, CANCELLED);
        if won {
            self.token.cancel();
        }
        won
    }

    pub(crate) fn is_done(&self) -> bool {
        self.phase.load(Ordering::Acquire) >= FINISHED
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.phase.load(Ordering::Acquire) == CANCELLED
    }
}

/// Sending side of a task's outcome
///
/// Dropping it unsent cancels the task.
pub(crate) struct Completion<R> {
    state: Arc<TaskState>,
    sender: Option<oneshot::Sender<TaskResult<R>>>,
}

impl<R> Completion<R> {
    pub(crate) fn state(&self) -> &Arc<TaskState> {
        &self.state
    }

    /// Deliver `outcome` unless the task was cancelled first
    pub(crate) fn complete(mut self, outcome: TaskResult<R>) -> bool {
        let Some(sender) = self.sender.take() else {
            return false;
        };
        if !self.state.try_finish() {
            return false;
        }
        // The handle may already be gone.
        let _ = sender.send(outcome);
        true
    }

    /// Settle without a value
    pub(crate) fn fail(self, reason: TaskError) -> bool {
        if reason.is_cancelled() {
            self.state.cancel()
        } else {
            self.complete(Err(reason))
        }
    }
}

impl<R> Drop for Completion<R> {
    fn drop(&mut self) {
        if self.sender.take().is_some() {
            self.state.cancel();
        }
    }
}

/// Create the two ends of a fresh task
pub(crate) fn channel<R>(driver: &Arc<Driver>) -> (Completion<R>, TaskHandle<R>) {
    let state = TaskState::new(TaskId::new());
    let (sender, outcome) = oneshot::channel();
    let completion = Completion {
        state: Arc::clone(&state),
        sender: Some(sender),
    };
    let handle = TaskHandle {
        state,
        outcome,
        driver: Arc::clone(driver),
    };
    (completion, handle)
}

/// Handle to a submitted task
pub struct TaskHandle<R> {
    state: Arc<TaskState>,
    outcome: oneshot::Receiver<TaskResult<R>>,
    driver: Arc<Driver>,
}

impl<R: Send> TaskHandle<R> {
    /// Task id
    pub fn id(&self) -> TaskId {
        self.state.id()
    }

    /// Cancel the task
    ///
    /// A task that has not started will never run, apply or restore context.
    /// A running task has its token cancelled and its handle settles as
    /// cancelled at once; the body keeps running until it returns and context
    /// is still restored on the worker. Returns `false` if the task already
    /// finished.
    pub fn cancel(&self) -> bool {
        self.state.cancel()
    }

    /// Whether the task settled as cancelled
    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    /// Whether the task settled
    pub fn is_done(&self) -> bool {
        self.state.is_done()
    }

    /// Wait for the task's outcome
    ///
    /// Blocks the calling thread; must not be called from async code.
    pub fn join(mut self) -> TaskResult<R> {
        let driver = Arc::clone(&self.driver);
        driver.block_on(self.settled())
    }

    /// Wait at most `timeout`; on timeout the handle is given back
    pub fn join_timeout(mut self, timeout: Duration) -> std::result::Result<TaskResult<R>, Self> {
        let driver = Arc::clone(&self.driver);
        let outcome = driver.block_on(tokio::time::timeout(timeout, self.settled()));
        outcome.map_err(|_elapsed| self)
    }

    async fn settled(&mut self) -> TaskResult<R> {
        let state = Arc::clone(&self.state);
        tokio::select! {
            biased;
            outcome = &mut self.outcome => outcome.unwrap_or(Err(TaskError::Cancelled)),
            () = state.token().cancelled() => Err(TaskError::Cancelled),
        }
    }
}

impl<R> fmt::Debug for TaskHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.state.id())
            .field("done", &self.state.is_done())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> Arc<Driver> {
        Driver::start("task-test", 1).unwrap()
    }

    #[test]
    fn test_completed_task_joins_with_value() {
        let (completion, handle) = channel(&driver());
        assert!(completion.state().try_start());
        assert!(!handle.is_done());
        assert!(completion.complete(Ok(5)));
        assert!(handle.is_done());
        assert_eq!(handle.join().unwrap(), 5);
    }

    #[test]
    fn test_cancel_before_start_prevents_start() {
        let (completion, handle) = channel::<()>(&driver());
        assert!(handle.cancel());
        assert!(!completion.state().try_start());
        assert!(handle.is_cancelled());
        assert!(matches!(handle.join(), Err(TaskError::Cancelled)));
    }

    #[test]
    fn test_cancel_while_running_wins_over_completion() {
        let (completion, handle) = channel(&driver());
        assert!(completion.state().try_start());
        assert!(handle.cancel());
        assert!(completion.state().token().is_cancelled());
        assert!(!handle.cancel());
        assert!(matches!(handle.join(), Err(TaskError::Cancelled)));
        assert!(!completion.complete(Ok(1)));
    }

    #[test]
    fn test_dropped_completion_cancels() {
        let (completion, handle) = channel::<u8>(&driver());
        drop(completion);
        assert!(handle.is_cancelled());
        assert!(matches!(handle.join(), Err(TaskError::Cancelled)));
    }

    #[test]
    fn test_join_timeout_returns_handle() {
        let (completion, handle) = channel::<u8>(&driver());
        let handle = handle
            .join_timeout(Duration::from_millis(10))
            .expect_err("task has not finished");
        completion.complete(Ok(3));
        assert_eq!(handle.join_timeout(Duration::from_secs(1)).unwrap().unwrap(), 3);
    }

    #[test]
    fn test_join_timeout_accepts_unbounded_wait() {
        let (completion, handle) = channel::<u8>(&driver());
        completion.complete(Ok(9));
        assert_eq!(handle.join_timeout(Duration::MAX).unwrap().unwrap(), 9);
    }

    #[test]
    fn test_task_id_display() {
        let id = TaskId::new();
        assert!(id.to_string().starts_with("task-"));
        assert_ne!(id, TaskId::new());
    }
}
