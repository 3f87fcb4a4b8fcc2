//! Managed scheduled executor
//!
//! Delayed and periodic work on top of a [`ManagedExecutor`]. Each schedule is
//! a task on the executor's runtime that sleeps until its due time and then
//! hands the work to the executor's pool.
//!
//! A one-shot schedule captures context when it is scheduled. A periodic
//! schedule binds a [`LiveCapture`] on the registering thread and takes a
//! fresh snapshot at the start of every firing, so each firing sees the
//! registering thread's context as it is at that moment. A firing that fails
//! ends its series, and the failure settles the [`ScheduledHandle`].

use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use strand_context::{Contextualized, LiveCapture};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::cancellation::{current_task, CancellationToken};
use crate::errors::{ExecutorError, Result, TaskError};
use crate::executor::{ManagedExecutor, ManagedJob, PendingTask};
use crate::listener::Listeners;
use crate::pool::{Job, WorkerPool};
use crate::task::{self, Completion, TaskHandle, TaskId, TaskResult, TaskState};

/// Stand-in horizon for delays too large to represent as an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// `start + delay`, saturating at a far-future instant
fn deadline(start: Instant, delay: Duration) -> Instant {
    start
        .checked_add(delay)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}

/// Counts a schedule as pending until dropped
struct PendingGuard(Arc<AtomicUsize>);

impl PendingGuard {
    fn new(count: &Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(count))
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug, Clone, Copy)]
enum Cadence {
    FixedRate(Duration),
    FixedDelay(Duration),
}

impl Cadence {
    /// Due time of the firing after one that was due at `previous`
    fn following(self, previous: Instant) -> Instant {
        let now = Instant::now();
        match self {
            // No catch-up: a late firing is followed by the next one at once.
            Cadence::FixedRate(period) => deadline(previous, period).max(now),
            Cadence::FixedDelay(delay) => deadline(now, delay),
        }
    }
}

#[derive(Default)]
struct SeriesStats {
    fire_count: AtomicU64,
    next_due: Mutex<Option<Instant>>,
}

/// A periodic schedule and everything a firing needs
struct Series<T, E> {
    state: Arc<TaskState>,
    task: Mutex<T>,
    live: LiveCapture,
    cadence: Cadence,
    stats: Arc<SeriesStats>,
    listeners: Listeners,
    _error: PhantomData<fn() -> E>,
}

impl<T, E> Series<T, E>
where
    T: FnMut() -> std::result::Result<(), E> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    /// Snapshot, apply, run, restore
    fn fire_once(&self) -> TaskResult<()> {
        let snapshot = self.live.snapshot()?;
        let _current = current_task::enter(self.state.token().clone());
        snapshot.run_fallible(|| {
            let mut task = self.task.lock();
            match panic::catch_unwind(AssertUnwindSafe(|| (*task)())) {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(TaskError::failed(err)),
                Err(payload) => Err(TaskError::from_panic(payload)),
            }
        })?
    }

    fn end(&self, completion: Completion<()>, reason: TaskError) {
        *self.stats.next_due.lock() = None;
        if completion.fail(reason.clone()) && !reason.is_cancelled() {
            warn!(task_id = %self.state.id(), error = %reason, "Periodic task failed, series ended");
        }
    }
}

/// One firing of a series, run on the pool
struct Firing<T, E> {
    series: Arc<Series<T, E>>,
    fired: oneshot::Sender<TaskResult<()>>,
}

impl<T, E> Job for Firing<T, E>
where
    T: FnMut() -> std::result::Result<(), E> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    fn id(&self) -> TaskId {
        self.series.state.id()
    }

    fn state(&self) -> Arc<TaskState> {
        Arc::clone(&self.series.state)
    }

    fn run(self: Box<Self>) {
        let Firing { series, fired } = *self;
        if series.state.is_done() {
            return;
        }
        let id = series.state.id();
        series.listeners.starting(id);
        let outcome = series.fire_once();
        let count = series.stats.fire_count.fetch_add(1, Ordering::AcqRel) + 1;
        series.listeners.done(id, outcome.as_ref().err());
        if outcome.is_ok() {
            debug!(task_id = %id, fired = count, "Periodic firing completed");
        }
        let _ = fired.send(outcome);
    }

    fn abort(self: Box<Self>, reason: TaskError) {
        let _ = self.fired.send(Err(reason));
    }
}

/// Sleep, fire on the pool, repeat until something ends the series
async fn drive_series<T, E>(
    series: Arc<Series<T, E>>,
    completion: Completion<()>,
    pool: WorkerPool,
    stop: CancellationToken,
    first_due: Instant,
    _pending: PendingGuard,
) where
    T: FnMut() -> std::result::Result<(), E> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let token = series.state.token().clone();
    let mut due = first_due;
    let reason = loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => break TaskError::Cancelled,
            () = token.cancelled() => break TaskError::Cancelled,
            () = tokio::time::sleep_until(due.into()) => {}
        }

        let (fired, outcome) = oneshot::channel();
        let firing = Firing {
            series: Arc::clone(&series),
            fired,
        };
        // A refused firing is aborted and reports why through `outcome`.
        let _ = pool.execute(Box::new(firing));
        let outcome = tokio::select! {
            biased;
            outcome = outcome => outcome.unwrap_or(Err(TaskError::Cancelled)),
            () = token.cancelled() => Err(TaskError::Cancelled),
        };
        if let Err(err) = outcome {
            break err;
        }

        due = series.cadence.following(due);
        *series.stats.next_due.lock() = Some(due);
    };
    series.end(completion, reason);
}

/// Context-propagating executor with delayed and periodic scheduling
///
/// Clones share the executor and its pending schedules.
#[derive(Clone)]
pub struct ManagedScheduledExecutor {
    inner: Arc<ScheduledInner>,
}

struct ScheduledInner {
    executor: ManagedExecutor,
    stop: CancellationToken,
    pending: Arc<AtomicUsize>,
}

impl Drop for ScheduledInner {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

impl ManagedScheduledExecutor {
    /// Add scheduling to `executor`
    pub fn from_executor(executor: ManagedExecutor) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(ScheduledInner {
                executor,
                stop: CancellationToken::new(),
                pending: Arc::new(AtomicUsize::new(0)),
            }),
        })
    }

    /// The underlying executor
    pub fn executor(&self) -> &ManagedExecutor {
        &self.inner.executor
    }

    /// Executor name
    pub fn name(&self) -> &str {
        self.inner.executor.name()
    }

    /// Submit for immediate execution; see [`ManagedExecutor::submit`]
    pub fn submit<F, R>(&self, task: F) -> Result<TaskHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.inner.executor.submit(task)
    }

    /// Submit for immediate execution without keeping the handle
    pub fn execute<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.executor.execute(task)
    }

    /// Run `task` once after `delay`, under the context captured now
    pub fn schedule<F, R>(&self, task: F, delay: Duration) -> Result<ScheduledTask<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let executor = &self.inner.executor;
        let pool = executor.pool().clone();
        pool.ensure_open()?;

        let work = executor.propagator().wrap(task)?;
        let (job, handle) = ManagedJob::new(
            work,
            Contextualized::run,
            executor.listeners().clone(),
            pool.driver(),
        );
        let id = handle.id();
        let due = deadline(Instant::now(), delay);
        executor.listeners().submitted(id);

        let state = job.state();
        let stop = self.inner.stop.clone();
        let pending = PendingGuard::new(&self.inner.pending);
        let driver = Arc::clone(pool.driver());
        driver.handle().spawn(async move {
            let _pending = pending;
            let job: Box<dyn Job> = Box::new(job);
            tokio::select! {
                biased;
                () = stop.cancelled() => job.abort(TaskError::Cancelled),
                // Cancelled through its handle; dropping the job is enough.
                () = state.token().cancelled() => drop(job),
                () = tokio::time::sleep_until(due.into()) => {
                    // A refused job is aborted by the pool and its handle settles.
                    let _ = pool.execute(job);
                }
            }
        });
        debug!(executor = %executor.name(), task_id = %id, ?delay, "Task scheduled");
        Ok(ScheduledTask { handle, due })
    }

    /// Run `task` every `period`, first after `initial_delay`
    ///
    /// Firings never overlap. A firing that starts late is followed by the
    /// next one as soon as it finishes; missed periods are not made up.
    pub fn schedule_at_fixed_rate<T, E>(
        &self,
        task: T,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<ScheduledHandle>
    where
        T: FnMut() -> std::result::Result<(), E> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.schedule_periodic(task, initial_delay, Cadence::FixedRate(period))
    }

    /// Run `task` repeatedly with `delay` between the end of one firing and
    /// the start of the next, first after `initial_delay`
    pub fn schedule_with_fixed_delay<T, E>(
        &self,
        task: T,
        initial_delay: Duration,
        delay: Duration,
    ) -> Result<ScheduledHandle>
    where
        T: FnMut() -> std::result::Result<(), E> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.schedule_periodic(task, initial_delay, Cadence::FixedDelay(delay))
    }

    fn schedule_periodic<T, E>(
        &self,
        task: T,
        initial_delay: Duration,
        cadence: Cadence,
    ) -> Result<ScheduledHandle>
    where
        T: FnMut() -> std::result::Result<(), E> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let (Cadence::FixedRate(interval) | Cadence::FixedDelay(interval)) = cadence;
        if interval.is_zero() {
            return Err(ExecutorError::config("periodic interval must be greater than zero"));
        }
        let executor = &self.inner.executor;
        let pool = executor.pool().clone();
        pool.ensure_open()?;

        let live = executor.propagator().capture_live()?;
        let (completion, handle) = task::channel(pool.driver());
        let stats = Arc::new(SeriesStats::default());
        let due = deadline(Instant::now(), initial_delay);
        *stats.next_due.lock() = Some(due);

        let series = Arc::new(Series {
            state: Arc::clone(completion.state()),
            task: Mutex::new(task),
            live,
            cadence,
            stats: Arc::clone(&stats),
            listeners: executor.listeners().clone(),
            _error: PhantomData,
        });
        let id = handle.id();
        executor.listeners().submitted(id);
        let pending = PendingGuard::new(&self.inner.pending);
        let stop = self.inner.stop.clone();
        pool.driver().handle().spawn(drive_series(
            series,
            completion,
            pool.clone(),
            stop,
            due,
            pending,
        ));
        debug!(executor = %executor.name(), task_id = %id, ?cadence, "Periodic task scheduled");
        Ok(ScheduledHandle { handle, stats })
    }

    /// Cancel every pending schedule and stop accepting work
    ///
    /// Work already handed to the pool drains.
    pub fn shutdown(&self) {
        self.inner.stop.cancel();
        debug!(executor = %self.name(), pending = self.pending_schedules(), "Scheduled executor shutdown");
        self.inner.executor.shutdown();
    }

    /// Cancel pending schedules and running work; return queued work
    pub fn shutdown_now(&self) -> Vec<PendingTask> {
        self.inner.stop.cancel();
        self.inner.executor.shutdown_now()
    }

    /// Whether shutdown has begun
    pub fn is_shutdown(&self) -> bool {
        self.inner.executor.is_shutdown()
    }

    /// Whether shutdown finished and every worker exited
    pub fn is_terminated(&self) -> bool {
        self.inner.executor.is_terminated()
    }

    /// Wait up to `timeout` for termination
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.inner.executor.await_termination(timeout)
    }

    /// One-shot schedules not yet handed to the pool plus live periodic series
    pub fn pending_schedules(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ManagedScheduledExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedScheduledExecutor")
            .field("executor", &self.inner.executor)
            .field("pending_schedules", &self.pending_schedules())
            .finish()
    }
}

/// Handle to a one-shot scheduled task
pub struct ScheduledTask<R> {
    handle: TaskHandle<R>,
    due: Instant,
}

impl<R: Send> ScheduledTask<R> {
    /// Task id
    pub fn id(&self) -> TaskId {
        self.handle.id()
    }

    /// Time left until the task becomes due; zero once due
    pub fn remaining_delay(&self) -> Duration {
        self.due.saturating_duration_since(Instant::now())
    }

    /// Cancel; see [`TaskHandle::cancel`]
    pub fn cancel(&self) -> bool {
        self.handle.cancel()
    }

    /// Whether the task settled as cancelled
    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }

    /// Whether the task settled
    pub fn is_done(&self) -> bool {
        self.handle.is_done()
    }

    /// Wait for the outcome
    pub fn join(self) -> TaskResult<R> {
        self.handle.join()
    }

    /// Wait at most `timeout`; on timeout the handle is given back
    pub fn join_timeout(self, timeout: Duration) -> std::result::Result<TaskResult<R>, Self> {
        let due = self.due;
        self.handle
            .join_timeout(timeout)
            .map_err(|handle| Self { handle, due })
    }
}

impl<R> fmt::Debug for ScheduledTask<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("handle", &self.handle)
            .field("due", &self.due)
            .finish()
    }
}

/// Handle to a periodic schedule
///
/// The series runs until cancelled, until a firing fails, or until the
/// executor shuts down. [`join`](Self::join) waits for that end and reports
/// why it happened.
pub struct ScheduledHandle {
    handle: TaskHandle<()>,
    stats: Arc<SeriesStats>,
}

impl ScheduledHandle {
    /// Schedule id
    pub fn id(&self) -> TaskId {
        self.handle.id()
    }

    /// Stop the series; a firing already running completes
    pub fn cancel(&self) -> bool {
        self.handle.cancel()
    }

    /// Whether the series was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }

    /// Whether the series ended
    pub fn is_done(&self) -> bool {
        self.handle.is_done()
    }

    /// Firings run so far, failed ones included
    pub fn fire_count(&self) -> u64 {
        self.stats.fire_count.load(Ordering::Acquire)
    }

    /// Time until the next firing, if one is scheduled
    pub fn next_fire_in(&self) -> Option<Duration> {
        if self.handle.is_done() {
            return None;
        }
        let due = (*self.stats.next_due.lock())?;
        Some(due.saturating_duration_since(Instant::now()))
    }

    /// Wait for the series to end
    pub fn join(self) -> TaskResult<()> {
        self.handle.join()
    }

    /// Wait at most `timeout`; on timeout the handle is given back
    pub fn join_timeout(self, timeout: Duration) -> std::result::Result<TaskResult<()>, Self> {
        let stats = self.stats;
        self.handle
            .join_timeout(timeout)
            .map_err(|handle| Self { handle, stats })
    }
}

impl fmt::Debug for ScheduledHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledHandle")
            .field("id", &self.handle.id())
            .field("fire_count", &self.fire_count())
            .field("done", &self.handle.is_done())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::thread;
    use strand_context::ProviderRegistry;

    fn scheduler() -> ManagedScheduledExecutor {
        ManagedExecutor::builder("sched", Arc::new(ProviderRegistry::with_builtin_facets()))
            .with_max_async(2)
            .build_scheduled()
            .unwrap()
    }

    #[test]
    fn test_deadline_saturates() {
        let now = Instant::now();
        assert_eq!(deadline(now, Duration::from_millis(5)), now + Duration::from_millis(5));
        assert!(deadline(now, Duration::MAX) > now);
        let late = Cadence::FixedRate(Duration::MAX).following(now);
        assert!(late >= now);
    }

    #[test]
    fn test_fixed_rate_does_not_catch_up() {
        let long_ago = Instant::now();
        thread::sleep(Duration::from_millis(20));
        let next = Cadence::FixedRate(Duration::from_millis(5)).following(long_ago);
        assert!(next >= long_ago + Duration::from_millis(20));
    }

    #[test]
    fn test_one_shot_runs_after_delay() {
        let scheduler = scheduler();
        let scheduled_at = Instant::now();
        let task = scheduler
            .schedule(Instant::now, Duration::from_millis(30))
            .unwrap();
        assert!(task.remaining_delay() <= Duration::from_millis(30));
        let ran_at = task.join().unwrap();
        assert!(ran_at.duration_since(scheduled_at) >= Duration::from_millis(30));
    }

    #[test]
    fn test_cancelled_one_shot_never_runs() {
        let scheduler = scheduler();
        let task = scheduler
            .schedule(|| panic!("must not run"), Duration::from_millis(20))
            .unwrap();
        assert!(task.cancel());
        assert!(matches!(task.join(), Err(TaskError::Cancelled)));
        thread::sleep(Duration::from_millis(40));
        assert_eq!(scheduler.pending_schedules(), 0);
    }

    #[test]
    fn test_unbounded_delays_are_accepted() {
        let scheduler = scheduler();
        let task = scheduler.schedule(|| (), Duration::MAX).unwrap();
        assert!(task.remaining_delay() > Duration::from_secs(3600));
        let periodic = scheduler
            .schedule_at_fixed_rate(|| Ok::<(), Infallible>(()), Duration::MAX, Duration::MAX)
            .unwrap();
        assert!(periodic.next_fire_in().is_some());

        let task = task.join_timeout(Duration::from_millis(10)).unwrap_err();
        scheduler.shutdown();
        assert!(matches!(task.join_timeout(Duration::MAX), Ok(Err(TaskError::Cancelled))));
        assert!(matches!(periodic.join(), Err(TaskError::Cancelled)));
        assert!(scheduler.await_termination(Duration::MAX));
    }

    #[test]
    fn test_fixed_delay_counts_firings_until_cancelled() {
        let scheduler = scheduler();
        let handle = scheduler
            .schedule_with_fixed_delay(
                || Ok::<(), Infallible>(()),
                Duration::ZERO,
                Duration::from_millis(5),
            )
            .unwrap();
        while handle.fire_count() < 3 {
            thread::sleep(Duration::from_millis(2));
        }
        assert!(handle.cancel());
        assert!(handle.next_fire_in().is_none());
        assert!(matches!(handle.join(), Err(TaskError::Cancelled)));
    }

    #[test]
    fn test_zero_period_is_rejected() {
        let err = scheduler()
            .schedule_at_fixed_rate(|| Ok::<(), Infallible>(()), Duration::ZERO, Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Config { .. }));
    }

    #[test]
    fn test_shutdown_cancels_pending_schedules() {
        let scheduler = scheduler();
        let once = scheduler
            .schedule(|| (), Duration::from_secs(60))
            .unwrap();
        let periodic = scheduler
            .schedule_at_fixed_rate(
                || Ok::<(), Infallible>(()),
                Duration::from_secs(60),
                Duration::from_secs(60),
            )
            .unwrap();
        assert_eq!(scheduler.pending_schedules(), 2);

        scheduler.shutdown();
        assert!(matches!(once.join(), Err(TaskError::Cancelled)));
        assert!(matches!(periodic.join(), Err(TaskError::Cancelled)));
        assert_eq!(
            scheduler.schedule(|| (), Duration::ZERO).unwrap_err(),
            ExecutorError::Shutdown
        );
        assert!(scheduler.await_termination(Duration::from_secs(5)));
    }
}
