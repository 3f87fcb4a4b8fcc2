//! Cancellation tokens and the current task's token
//!
//! Cancellation is cooperative. Cancelling a task that has not started
//! prevents it from ever applying context; cancelling a running task cancels
//! its token, which the body can poll through [`current_task::is_cancelled`]
//! or await through [`CancellationToken::cancelled`].

pub use tokio_util::sync::CancellationToken;

/// Token of the task running on the calling thread
pub mod current_task {
    use std::cell::RefCell;

    use super::CancellationToken;

    thread_local! {
        static CURRENT: RefCell<Option<CancellationToken>> = const { RefCell::new(None) };
    }

    /// Whether the task running on this thread has been asked to stop
    ///
    /// Returns `false` outside a managed task.
    pub fn is_cancelled() -> bool {
        CURRENT.with(|c| c.borrow().as_ref().is_some_and(CancellationToken::is_cancelled))
    }

    /// Token of the task running on this thread, if any
    pub fn token() -> Option<CancellationToken> {
        CURRENT.with(|c| c.borrow().clone())
    }

    /// Restores the enclosing task's token on drop
    pub(crate) struct CurrentTaskGuard {
        prior: Option<CancellationToken>,
    }

    impl Drop for CurrentTaskGuard {
        fn drop(&mut self) {
            let prior = self.prior.take();
            let _ = CURRENT.try_with(|c| *c.borrow_mut() = prior);
        }
    }

    /// Make `token` the current task's token until the guard drops
    pub(crate) fn enter(token: CancellationToken) -> CurrentTaskGuard {
        let prior = CURRENT.with(|c| c.borrow_mut().replace(token));
        CurrentTaskGuard { prior }
    }
}
