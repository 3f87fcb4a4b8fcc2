//! Tokio runtime owned by one pool
//!
//! Task bodies run on the runtime's blocking threads, so the thread-local
//! context a job applies stays on the thread that runs it. The single async
//! worker only dispatches jobs and drives timers.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::runtime::{Builder, Handle, Runtime};
use tracing::trace;

use crate::errors::{ExecutorError, Result};

pub(crate) struct Driver {
    handle: Handle,
    runtime: Option<Runtime>,
    threads: Arc<AtomicUsize>,
}

impl Driver {
    /// Start a runtime whose threads are named `<prefix>-<n>`
    pub(crate) fn start(thread_name_prefix: &str, max_blocking: usize) -> Result<Arc<Self>> {
        let threads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&threads);
        let prefix = thread_name_prefix.to_owned();
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(max_blocking.max(1))
            .thread_name_fn(move || {
                let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
                format!("{prefix}-{n}")
            })
            .enable_time()
            .build()
            .map_err(ExecutorError::spawn)?;
        Ok(Arc::new(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            threads,
        }))
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Drive `future` to completion on the calling thread
    ///
    /// Must not be called from inside an async task.
    pub(crate) fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }

    /// Threads the runtime has started so far
    pub(crate) fn threads_started(&self) -> usize {
        self.threads.load(Ordering::Relaxed)
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            // Never blocks, so the last handle may be dropped from any thread.
            runtime.shutdown_background();
            trace!("Pool runtime released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threads_carry_prefix() {
        let driver = Driver::start("drv", 2).unwrap();
        let name = driver.block_on(async {
            tokio::task::spawn_blocking(|| std::thread::current().name().map(str::to_owned))
                .await
                .unwrap()
        });
        assert!(name.is_some_and(|n| n.starts_with("drv-")));
        assert!(driver.threads_started() >= 2);
    }
}
