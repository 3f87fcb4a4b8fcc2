//! Managed thread factory
//!
//! Context is captured when [`ManagedThreadFactory::new_thread`] is called,
//! not when the thread starts. There is no pooling: every call yields one
//! thread, named `<prefix>-<n>`.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use strand_context::{ContextConfiguration, ContextPropagator, Contextualized, ProviderRegistry};
use tracing::debug;

use crate::cancellation::{current_task, CancellationToken};
use crate::errors::{ExecutorError, Result, TaskError};
use crate::executor::Runner;
use crate::task::TaskResult;

/// Produces threads that run their target under the creator's context
#[derive(Clone)]
pub struct ManagedThreadFactory {
    inner: Arc<FactoryInner>,
}

struct FactoryInner {
    name: String,
    propagator: ContextPropagator,
    thread_name_prefix: String,
    stack_size: Option<usize>,
    created: AtomicUsize,
    shutdown: CancellationToken,
}

impl ManagedThreadFactory {
    /// Start building a factory named `name`
    pub fn builder(
        name: impl Into<String>,
        registry: Arc<ProviderRegistry>,
    ) -> ManagedThreadFactoryBuilder {
        ManagedThreadFactoryBuilder {
            name: name.into(),
            registry,
            context: ContextConfiguration::default(),
            thread_name_prefix: None,
            stack_size: None,
        }
    }

    /// Factory with the default context configuration
    pub fn new(name: impl Into<String>, registry: Arc<ProviderRegistry>) -> Result<Self> {
        Self::builder(name, registry).build()
    }

    /// Capture the caller's context and prepare a thread running `target`
    ///
    /// The target's return value is opaque; see
    /// [`new_thread_fallible`](Self::new_thread_fallible) for targets that
    /// report their own failures.
    pub fn new_thread<F, R>(&self, target: F) -> Result<ManagedThread<F, R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.prepare(target, Contextualized::run)
    }

    /// Like [`new_thread`](Self::new_thread) for a target returning `Result`
    ///
    /// The target's own `Err` is joined as `Ok(Err(..))` even if restoring
    /// context fails afterward.
    pub fn new_thread_fallible<F, T, E>(
        &self,
        target: F,
    ) -> Result<ManagedThread<F, std::result::Result<T, E>>>
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.prepare(target, Contextualized::run_fallible)
    }

    fn prepare<F, R>(&self, target: F, runner: Runner<F, R>) -> Result<ManagedThread<F, R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(ExecutorError::Shutdown);
        }
        let work = inner.propagator.wrap(target)?;
        let n = inner.created.fetch_add(1, Ordering::Relaxed) + 1;
        let name = format!("{}-{}", inner.thread_name_prefix, n);
        debug!(factory = %inner.name, thread = %name, "Managed thread created");
        Ok(ManagedThread {
            name,
            stack_size: inner.stack_size,
            shutdown: inner.shutdown.clone(),
            work,
            runner,
        })
    }

    /// Refuse new threads and signal running ones through their task token
    pub fn shutdown(&self) {
        if !self.inner.shutdown.is_cancelled() {
            self.inner.shutdown.cancel();
            debug!(factory = %self.inner.name, "Thread factory shut down");
        }
    }

    /// Whether the factory was shut down
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Threads created so far
    pub fn created_count(&self) -> usize {
        self.inner.created.load(Ordering::Relaxed)
    }

    /// Factory name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The propagator every thread goes through
    pub fn propagator(&self) -> &ContextPropagator {
        &self.inner.propagator
    }
}

impl fmt::Debug for ManagedThreadFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedThreadFactory")
            .field("name", &self.inner.name)
            .field("created", &self.created_count())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// Builder for [`ManagedThreadFactory`]
pub struct ManagedThreadFactoryBuilder {
    name: String,
    registry: Arc<ProviderRegistry>,
    context: ContextConfiguration,
    thread_name_prefix: Option<String>,
    stack_size: Option<usize>,
}

impl ManagedThreadFactoryBuilder {
    /// Set the context configuration
    pub fn with_context(mut self, context: ContextConfiguration) -> Self {
        self.context = context;
        self
    }

    /// Threads are named `<prefix>-<n>`; the default prefix is the factory name
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = Some(prefix.into());
        self
    }

    /// Stack size of created threads, in bytes
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Build the factory
    pub fn build(self) -> Result<ManagedThreadFactory> {
        if self.stack_size == Some(0) {
            return Err(ExecutorError::config(format!(
                "thread factory '{}': stack_size must be positive",
                self.name
            )));
        }
        let propagator = ContextPropagator::new(self.registry, &self.context)?;
        let thread_name_prefix = self.thread_name_prefix.unwrap_or_else(|| self.name.clone());
        Ok(ManagedThreadFactory {
            inner: Arc::new(FactoryInner {
                name: self.name,
                propagator,
                thread_name_prefix,
                stack_size: self.stack_size,
                created: AtomicUsize::new(0),
                shutdown: CancellationToken::new(),
            }),
        })
    }
}

/// A created, not yet started thread
///
/// Dropping it without starting discards the captured context untouched.
pub struct ManagedThread<F, R> {
    name: String,
    stack_size: Option<usize>,
    shutdown: CancellationToken,
    work: Contextualized<F>,
    runner: Runner<F, R>,
}

impl<F, R> ManagedThread<F, R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    /// Thread name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start the thread
    ///
    /// Fails with [`ExecutorError::Shutdown`] if the factory was shut down
    /// since the thread was created.
    pub fn start(self) -> Result<ManagedJoinHandle<R>> {
        if self.shutdown.is_cancelled() {
            return Err(ExecutorError::Shutdown);
        }
        let mut builder = thread::Builder::new().name(self.name);
        if let Some(bytes) = self.stack_size {
            builder = builder.stack_size(bytes);
        }
        let token = self.shutdown;
        let work = self.work;
        let runner = self.runner;
        let handle = builder
            .spawn(move || {
                let _current = current_task::enter(token);
                match panic::catch_unwind(AssertUnwindSafe(|| runner(work))) {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(context)) => Err(TaskError::Context(context)),
                    Err(payload) => Err(TaskError::from_panic(payload)),
                }
            })
            .map_err(ExecutorError::spawn)?;
        Ok(ManagedJoinHandle { inner: handle })
    }
}

impl<F, R> fmt::Debug for ManagedThread<F, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedThread")
            .field("name", &self.name)
            .finish()
    }
}

/// Join handle of a started managed thread
#[derive(Debug)]
pub struct ManagedJoinHandle<R> {
    inner: thread::JoinHandle<TaskResult<R>>,
}

impl<R> ManagedJoinHandle<R> {
    /// Wait for the thread and return its target's outcome
    pub fn join(self) -> TaskResult<R> {
        self.inner
            .join()
            .unwrap_or_else(|payload| Err(TaskError::from_panic(payload)))
    }

    /// The underlying thread
    pub fn thread(&self) -> &thread::Thread {
        self.inner.thread()
    }

    /// Whether the thread has finished
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_context::facets::{security, Principal};

    fn factory() -> ManagedThreadFactory {
        ManagedThreadFactory::builder("workers", Arc::new(ProviderRegistry::with_builtin_facets()))
            .with_thread_name_prefix("managed")
            .build()
            .unwrap()
    }

    #[test]
    fn test_context_is_stamped_at_creation() {
        let factory = factory();
        security::set(Principal::new("creator"));
        let thread = factory
            .new_thread(|| security::current().map(|p| p.name().to_owned()))
            .unwrap();
        security::set(Principal::new("starter"));

        let observed = thread.start().unwrap().join().unwrap();
        assert_eq!(observed.as_deref(), Some("creator"));
        security::clear();
    }

    #[test]
    fn test_threads_are_named_in_sequence() {
        let factory = factory();
        let first = factory
            .new_thread(|| thread::current().name().map(str::to_owned))
            .unwrap();
        let second = factory.new_thread(|| ()).unwrap();
        assert_eq!(first.name(), "managed-1");
        assert_eq!(second.name(), "managed-2");
        assert_eq!(
            first.start().unwrap().join().unwrap().as_deref(),
            Some("managed-1")
        );
        assert_eq!(factory.created_count(), 2);
    }

    #[test]
    fn test_shutdown_refuses_new_and_unstarted_threads() {
        let factory = factory();
        let pending = factory.new_thread(|| ()).unwrap();
        factory.shutdown();
        assert!(factory.is_shutdown());
        assert_eq!(factory.new_thread(|| ()).unwrap_err(), ExecutorError::Shutdown);
        assert_eq!(pending.start().unwrap_err(), ExecutorError::Shutdown);
    }

    #[test]
    fn test_running_thread_observes_factory_shutdown() {
        let factory = factory();
        let handle = factory
            .new_thread(|| {
                while !current_task::is_cancelled() {
                    thread::yield_now();
                }
                "stopped"
            })
            .unwrap()
            .start()
            .unwrap();
        factory.shutdown();
        assert_eq!(handle.join().unwrap(), "stopped");
    }

    #[test]
    fn test_panicking_target_is_reported() {
        let handle = factory()
            .new_thread(|| -> u8 { panic!("thread body") })
            .unwrap()
            .start()
            .unwrap();
        assert!(matches!(handle.join(), Err(TaskError::Panicked { .. })));
    }
}
