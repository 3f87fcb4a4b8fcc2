//! Managed executor
//!
//! Every submission is captured through the executor's [`ContextPropagator`]
//! on the submitting thread and run on a pool worker under that snapshot.
//! Admission (shutdown, saturation) is decided before anything is captured and
//! the admitted slot is held until the task is queued, so a refused
//! submission never calls a context provider and an admitted one cannot be
//! refused after its context was captured. A `shutdown_now` landing in
//! between still cancels it.

use std::fmt;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use strand_context::{
    ContextConfiguration, ContextPropagator, Contextualized, ProviderRegistry,
    Result as ContextResult,
};
use tracing::{debug, trace, warn};

use crate::cancellation::current_task;
use crate::errors::{ExecutorError, Result, TaskError};
use crate::listener::{Listeners, TaskListener};
use crate::driver::Driver;
use crate::pool::{Job, PoolSettings, WorkerPool};
use crate::scheduled::ManagedScheduledExecutor;
use crate::task::{self, Completion, TaskHandle, TaskId, TaskResult, TaskState};

/// How a captured task is run under its snapshot
pub(crate) type Runner<F, R> = fn(Contextualized<F>) -> ContextResult<R>;

/// One worker per available CPU, or four if that cannot be determined
pub(crate) fn default_max_async() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(4)
}

/// A running task whose body has exceeded the hung task threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HungTask {
    /// The task
    pub id: TaskId,
    /// How long it has been running
    pub elapsed: Duration,
}

/// Context-propagating executor over a worker pool
///
/// Clones share the same pool. The pool is shut down (draining) when the last
/// clone is dropped.
#[derive(Clone)]
pub struct ManagedExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    name: String,
    propagator: ContextPropagator,
    pool: WorkerPool,
    listeners: Listeners,
    hung_task_threshold: Option<Duration>,
}

impl Drop for ExecutorInner {
    fn drop(&mut self) {
        self.pool.shutdown();
    }
}

impl ManagedExecutor {
    /// Start building an executor named `name`
    pub fn builder(name: impl Into<String>, registry: Arc<ProviderRegistry>) -> ManagedExecutorBuilder {
        ManagedExecutorBuilder::new(name, registry)
    }

    /// Executor with the default context configuration and sizing
    pub fn new(name: impl Into<String>, registry: Arc<ProviderRegistry>) -> Result<Self> {
        Self::builder(name, registry).build()
    }

    /// Submit `task`, capturing the caller's context now
    ///
    /// The task's return value is opaque: if restoring context fails after
    /// the task returned, the handle reports the restore failure. Use
    /// [`submit_fallible`](Self::submit_fallible) for tasks that report their
    /// own failures.
    pub fn submit<F, R>(&self, task: F) -> Result<TaskHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submit_with(task, Contextualized::run)
    }

    /// Submit a task that reports failure through `Result`
    ///
    /// When the task returns `Err`, that error reaches the handle as
    /// `Ok(Err(..))` even if restoring context fails afterward; the restore
    /// failure is logged.
    pub fn submit_fallible<F, T, E>(&self, task: F) -> Result<TaskHandle<std::result::Result<T, E>>>
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.submit_with(task, Contextualized::run_fallible)
    }

    fn submit_with<F, R>(&self, task: F, runner: Runner<F, R>) -> Result<TaskHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let inner = &self.inner;
        let reservation = inner.pool.reserve().map_err(|err| {
            warn!(executor = %inner.name, error = %err, "Submission refused");
            err
        })?;

        let work = inner.propagator.wrap(task)?;
        let (job, handle) =
            ManagedJob::new(work, runner, inner.listeners.clone(), inner.pool.driver());
        let id = handle.id();
        inner.listeners.submitted(id);
        reservation.execute(Box::new(job)).map_err(|err| {
            warn!(executor = %inner.name, task_id = %id, error = %err, "Task rejected");
            err
        })?;
        debug!(executor = %inner.name, task_id = %id, "Task submitted");
        Ok(handle)
    }

    /// Submit `task` without keeping its handle
    pub fn execute<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(task).map(drop)
    }

    /// Submit every task, then wait for all of them
    ///
    /// Outcomes are returned in submission order. If any submission fails,
    /// the tasks already submitted are cancelled and the error is returned.
    pub fn invoke_all<I, F, R>(&self, tasks: I) -> Result<Vec<TaskResult<R>>>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let mut handles = Vec::new();
        for task in tasks {
            match self.submit(task) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    for handle in &handles {
                        handle.cancel();
                    }
                    return Err(err);
                }
            }
        }
        Ok(handles.into_iter().map(TaskHandle::join).collect())
    }

    /// Stop accepting work; queued and running tasks complete
    pub fn shutdown(&self) {
        debug!(executor = %self.inner.name, "Shutdown requested");
        self.inner.pool.shutdown();
    }

    /// Stop accepting work, cancel running tasks and return queued ones
    ///
    /// Running tasks see [`current_task::is_cancelled`] turn true and their
    /// handles settle as cancelled. Each returned [`PendingTask`] can be run
    /// inline or dropped, which cancels it.
    pub fn shutdown_now(&self) -> Vec<PendingTask> {
        debug!(executor = %self.inner.name, "Immediate shutdown requested");
        self.inner
            .pool
            .shutdown_now()
            .into_iter()
            .map(|job| PendingTask { job: Some(job) })
            .collect()
    }

    /// Whether shutdown has begun
    pub fn is_shutdown(&self) -> bool {
        self.inner.pool.is_shutdown()
    }

    /// Whether shutdown finished and every worker exited
    pub fn is_terminated(&self) -> bool {
        self.inner.pool.is_terminated()
    }

    /// Wait up to `timeout` for termination
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.inner.pool.await_termination(timeout)
    }

    /// Running tasks over the hung task threshold, longest first
    ///
    /// Always empty when no threshold is configured.
    pub fn hung_tasks(&self) -> Vec<HungTask> {
        let Some(threshold) = self.inner.hung_task_threshold else {
            return Vec::new();
        };
        self.inner
            .pool
            .running_longer_than(threshold)
            .into_iter()
            .map(|(id, elapsed)| HungTask { id, elapsed })
            .collect()
    }

    /// Executor name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The propagator every submission goes through
    pub fn propagator(&self) -> &ContextPropagator {
        &self.inner.propagator
    }

    /// Maximum number of concurrently running tasks
    pub fn max_async(&self) -> usize {
        self.inner.pool.settings().max_workers
    }

    /// Tasks currently running
    pub fn active_count(&self) -> usize {
        self.inner.pool.active_count()
    }

    /// Runtime threads started so far
    pub fn pool_size(&self) -> usize {
        self.inner.pool.worker_count()
    }

    /// Tasks waiting for a worker
    pub fn queued_count(&self) -> usize {
        self.inner.pool.queued_count()
    }

    pub(crate) fn pool(&self) -> &WorkerPool {
        &self.inner.pool
    }

    pub(crate) fn listeners(&self) -> &Listeners {
        &self.inner.listeners
    }
}

impl fmt::Debug for ManagedExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedExecutor")
            .field("name", &self.inner.name)
            .field("max_async", &self.max_async())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// Builder for [`ManagedExecutor`] and [`ManagedScheduledExecutor`]
pub struct ManagedExecutorBuilder {
    name: String,
    registry: Arc<ProviderRegistry>,
    context: ContextConfiguration,
    max_async: usize,
    queue_capacity: Option<usize>,
    hung_task_threshold: Option<Duration>,
    thread_name_prefix: Option<String>,
    listeners: Vec<Arc<dyn TaskListener>>,
}

impl ManagedExecutorBuilder {
    /// Builder with the default context configuration, one worker per CPU
    /// and an unbounded queue
    pub fn new(name: impl Into<String>, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            name: name.into(),
            registry,
            context: ContextConfiguration::default(),
            max_async: default_max_async(),
            queue_capacity: None,
            hung_task_threshold: None,
            thread_name_prefix: None,
            listeners: Vec::new(),
        }
    }

    /// Set the context configuration
    pub fn with_context(mut self, context: ContextConfiguration) -> Self {
        self.context = context;
        self
    }

    /// Set the maximum number of concurrently running tasks
    pub fn with_max_async(mut self, max_async: usize) -> Self {
        self.max_async = max_async;
        self
    }

    /// Bound the queue; `None` leaves it unbounded
    pub fn with_queue_capacity(mut self, capacity: Option<usize>) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Report tasks running longer than `threshold` from `hung_tasks`
    pub fn with_hung_task_threshold(mut self, threshold: Duration) -> Self {
        self.hung_task_threshold = Some(threshold);
        self
    }

    /// Runtime threads are named `<prefix>-<n>`; the default prefix is the executor name
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = Some(prefix.into());
        self
    }

    /// Attach a lifecycle listener
    pub fn with_listener(mut self, listener: Arc<dyn TaskListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_async == 0 {
            return Err(ExecutorError::config(format!(
                "executor '{}': max_async must be at least 1",
                self.name
            )));
        }
        if self.queue_capacity == Some(0) {
            return Err(ExecutorError::config(format!(
                "executor '{}': queue_capacity must be at least 1 when set",
                self.name
            )));
        }
        Ok(())
    }

    /// Build the executor
    ///
    /// Unknown or overlapping facet keys in the context configuration fail
    /// here.
    pub fn build(self) -> Result<ManagedExecutor> {
        self.validate()?;
        let propagator = ContextPropagator::new(self.registry, &self.context)?;
        let thread_name_prefix = self.thread_name_prefix.unwrap_or_else(|| self.name.clone());
        let pool = WorkerPool::start(PoolSettings {
            name: self.name.clone(),
            thread_name_prefix,
            max_workers: self.max_async,
            queue_capacity: self.queue_capacity,
        })?;
        debug!(
            executor = %self.name,
            max_async = self.max_async,
            queue_capacity = ?self.queue_capacity,
            "Managed executor created"
        );
        Ok(ManagedExecutor {
            inner: Arc::new(ExecutorInner {
                listeners: Listeners::new(&self.name, self.listeners),
                name: self.name,
                propagator,
                pool,
                hung_task_threshold: self.hung_task_threshold,
            }),
        })
    }

    /// Build a scheduled executor over the same settings
    pub fn build_scheduled(self) -> Result<ManagedScheduledExecutor> {
        ManagedScheduledExecutor::from_executor(self.build()?)
    }
}

/// A queued task handed back by [`ManagedExecutor::shutdown_now`]
///
/// Dropping it cancels the task.
pub struct PendingTask {
    job: Option<Box<dyn Job>>,
}

impl PendingTask {
    /// Id of the task
    pub fn id(&self) -> Option<TaskId> {
        self.job.as_ref().map(|job| job.id())
    }

    /// Run the task on the calling thread under its captured context
    pub fn run(mut self) {
        if let Some(job) = self.job.take() {
            job.run();
        }
    }
}

impl Drop for PendingTask {
    fn drop(&mut self) {
        if let Some(job) = self.job.take() {
            job.abort(TaskError::Cancelled);
        }
    }
}

impl fmt::Debug for PendingTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTask").field("id", &self.id()).finish()
    }
}

/// A captured task and the completion its outcome settles
pub(crate) struct ManagedJob<F, R> {
    state: Arc<TaskState>,
    completion: Option<Completion<R>>,
    work: Option<Contextualized<F>>,
    runner: Runner<F, R>,
    listeners: Listeners,
}

impl<F, R> ManagedJob<F, R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    pub(crate) fn new(
        work: Contextualized<F>,
        runner: Runner<F, R>,
        listeners: Listeners,
        driver: &Arc<Driver>,
    ) -> (Self, TaskHandle<R>) {
        let (completion, handle) = task::channel(driver);
        let job = Self {
            state: Arc::clone(completion.state()),
            completion: Some(completion),
            work: Some(work),
            runner,
            listeners,
        };
        (job, handle)
    }
}

impl<F, R> Job for ManagedJob<F, R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    fn id(&self) -> TaskId {
        self.state.id()
    }

    fn state(&self) -> Arc<TaskState> {
        Arc::clone(&self.state)
    }

    fn run(mut self: Box<Self>) {
        let (Some(work), Some(completion)) = (self.work.take(), self.completion.take()) else {
            return;
        };
        let id = self.state.id();
        if !self.state.try_start() {
            // Dropping `work` releases the snapshot without applying it.
            trace!(task_id = %id, "Task cancelled before start");
            self.listeners.aborted(id, &TaskError::Cancelled);
            return;
        }

        self.listeners.starting(id);
        let runner = self.runner;
        let outcome = {
            let _current = current_task::enter(self.state.token().clone());
            match panic::catch_unwind(AssertUnwindSafe(|| runner(work))) {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(context)) => Err(TaskError::Context(context)),
                Err(payload) => Err(TaskError::from_panic(payload)),
            }
        };
        if let Err(err) = &outcome {
            debug!(task_id = %id, error = %err, "Task finished without a value");
        }
        self.listeners.done(id, outcome.as_ref().err());
        completion.complete(outcome);
    }

    fn abort(mut self: Box<Self>, reason: TaskError) {
        if let Some(completion) = self.completion.take() {
            self.work = None;
            completion.fail(reason.clone());
            self.listeners.aborted(self.state.id(), &reason);
        }
    }
}
