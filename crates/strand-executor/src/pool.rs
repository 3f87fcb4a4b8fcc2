//! Worker pool backing managed executors
//!
//! Each pool owns a tokio runtime (see [`Driver`]). A dispatcher task takes a
//! semaphore permit, pops the next queued job and runs it on a blocking
//! thread, so at most `max_workers` jobs run at once. A bounded queue rejects
//! work once every permit is taken and `queue_capacity` jobs are waiting.
//!
//! Admission is a [`Reservation`]: the slot is held from the admission check
//! until the job is queued, so a caller can do work between the two (such as
//! capturing context) without racing saturation or shutdown.
//!
//! Shutdown is two-phase. `shutdown` stops admission and lets queued and
//! running jobs drain; `shutdown_now` additionally hands back queued jobs and
//! cancels running ones. The pool is terminated once the dispatcher has
//! exited and every permit is back.

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{watch, Notify, Semaphore};
use tracing::{debug, error};

use crate::driver::Driver;
use crate::errors::{ExecutorError, Result, TaskError};
use crate::task::{TaskId, TaskState};

/// A unit of work queued on the pool
pub(crate) trait Job: Send + 'static {
    fn id(&self) -> TaskId;

    /// Lifecycle registered while the job runs, cancelled by `shutdown_now`
    fn state(&self) -> Arc<TaskState>;

    /// Run on the calling thread
    fn run(self: Box<Self>);

    /// Settle without running
    fn abort(self: Box<Self>, reason: TaskError);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Accepting,
    Draining,
    Stopping,
    Terminated,
}

struct RunningJob {
    started: Instant,
    state: Arc<TaskState>,
}

struct PoolState {
    queue: VecDeque<Box<dyn Job>>,
    reserved: usize,
    running: HashMap<TaskId, RunningJob>,
    phase: Phase,
}

/// Sizing and naming of a pool
#[derive(Debug, Clone)]
pub(crate) struct PoolSettings {
    pub(crate) name: String,
    pub(crate) thread_name_prefix: String,
    pub(crate) max_workers: usize,
    pub(crate) queue_capacity: Option<usize>,
}

struct Shared {
    settings: PoolSettings,
    driver: Arc<Driver>,
    state: Mutex<PoolState>,
    work: Notify,
    permits: Arc<Semaphore>,
    phase: watch::Sender<Phase>,
}

/// Bounded pool of blocking workers on a private tokio runtime
#[derive(Clone)]
pub(crate) struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    pub(crate) fn start(settings: PoolSettings) -> Result<Self> {
        let driver = Driver::start(&settings.thread_name_prefix, settings.max_workers)?;
        let (phase, _) = watch::channel(Phase::Accepting);
        let shared = Arc::new(Shared {
            permits: Arc::new(Semaphore::new(settings.max_workers)),
            settings,
            driver,
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                reserved: 0,
                running: HashMap::new(),
                phase: Phase::Accepting,
            }),
            work: Notify::new(),
            phase,
        });
        shared.driver.handle().spawn(dispatch(Arc::clone(&shared)));
        Ok(Self { shared })
    }

    /// Hold a slot for one job, or refuse it now
    pub(crate) fn reserve(&self) -> Result<Reservation> {
        let mut state = self.shared.state.lock();
        self.admission(&state)?;
        state.reserved += 1;
        Ok(Reservation {
            pool: self.clone(),
            armed: true,
        })
    }

    /// Whether the pool still admits work, ignoring saturation
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_shutdown() {
            return Err(ExecutorError::Shutdown);
        }
        Ok(())
    }

    fn admission(&self, state: &PoolState) -> Result<()> {
        if state.phase != Phase::Accepting {
            return Err(ExecutorError::Shutdown);
        }
        let settings = &self.shared.settings;
        let Some(capacity) = settings.queue_capacity else {
            return Ok(());
        };
        let free = settings.max_workers.saturating_sub(state.running.len());
        let waiting = (state.queue.len() + state.reserved).saturating_sub(free);
        if waiting >= capacity {
            return Err(ExecutorError::rejected(format!(
                "{} is saturated: {} workers busy and {} tasks queued",
                settings.name, settings.max_workers, waiting
            )));
        }
        Ok(())
    }

    /// Queue `job`
    ///
    /// On failure the job is aborted with the corresponding task error.
    pub(crate) fn execute(&self, job: Box<dyn Job>) -> Result<()> {
        match self.reserve() {
            Ok(reservation) => reservation.execute(job),
            Err(err) => {
                job.abort(TaskError::from(err.clone()));
                Err(err)
            }
        }
    }

    /// Stop admitting work; queued and running jobs drain
    pub(crate) fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        if state.phase != Phase::Accepting {
            return;
        }
        state.phase = Phase::Draining;
        self.shared.phase.send_replace(Phase::Draining);
        debug!(executor = %self.shared.settings.name, queued = state.queue.len(), "Pool draining");
        drop(state);
        self.shared.work.notify_one();
    }

    /// Stop admitting work, cancel running jobs and return queued ones
    pub(crate) fn shutdown_now(&self) -> Vec<Box<dyn Job>> {
        let (pending, running): (Vec<_>, Vec<_>) = {
            let mut state = self.shared.state.lock();
            if matches!(state.phase, Phase::Accepting | Phase::Draining) {
                state.phase = Phase::Stopping;
                self.shared.phase.send_replace(Phase::Stopping);
            }
            let pending = state.queue.drain(..).collect();
            let running = state
                .running
                .values()
                .map(|r| Arc::clone(&r.state))
                .collect();
            (pending, running)
        };
        for task in &running {
            task.cancel();
        }
        self.shared.work.notify_one();
        debug!(
            executor = %self.shared.settings.name,
            pending = pending.len(),
            cancelled = running.len(),
            "Pool stopped"
        );
        pending
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shared.state.lock().phase != Phase::Accepting
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.shared.state.lock().phase == Phase::Terminated
    }

    /// Block until terminated or `timeout` elapses
    pub(crate) fn await_termination(&self, timeout: Duration) -> bool {
        let mut phase = self.shared.phase.subscribe();
        self.shared.driver.block_on(async move {
            let terminated =
                tokio::time::timeout(timeout, phase.wait_for(|p| *p == Phase::Terminated)).await;
            matches!(terminated, Ok(Ok(_)))
        })
    }

    /// Running jobs whose run time exceeds `threshold`
    pub(crate) fn running_longer_than(&self, threshold: Duration) -> Vec<(TaskId, Duration)> {
        let state = self.shared.state.lock();
        let mut hung: Vec<_> = state
            .running
            .iter()
            .map(|(id, job)| (*id, job.started.elapsed()))
            .filter(|(_, elapsed)| *elapsed > threshold)
            .collect();
        hung.sort_by(|a, b| b.1.cmp(&a.1));
        hung
    }

    pub(crate) fn active_count(&self) -> usize {
        self.shared.state.lock().running.len()
    }

    pub(crate) fn queued_count(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.shared.driver.threads_started()
    }

    pub(crate) fn settings(&self) -> &PoolSettings {
        &self.shared.settings
    }

    pub(crate) fn driver(&self) -> &Arc<Driver> {
        &self.shared.driver
    }
}

/// An admitted slot not yet filled with a job
///
/// Dropping it releases the slot.
pub(crate) struct Reservation {
    pool: WorkerPool,
    armed: bool,
}

impl Reservation {
    /// Queue `job` in the reserved slot
    ///
    /// A `shutdown` since the reservation still lets the job drain; a
    /// `shutdown_now` aborts it as cancelled.
    pub(crate) fn execute(mut self, job: Box<dyn Job>) -> Result<()> {
        self.armed = false;
        let shared = &self.pool.shared;
        let mut state = shared.state.lock();
        state.reserved -= 1;
        let accepted = matches!(state.phase, Phase::Accepting | Phase::Draining);
        if accepted {
            state.queue.push_back(job);
            drop(state);
            shared.work.notify_one();
            return Ok(());
        }
        drop(state);
        shared.work.notify_one();
        job.abort(TaskError::Cancelled);
        Err(ExecutorError::Shutdown)
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.armed {
            self.pool.shared.state.lock().reserved -= 1;
            self.pool.shared.work.notify_one();
        }
    }
}

impl Shared {
    /// Next queued job, or `None` once shut down with nothing left to come
    async fn next_job(&self) -> Option<Box<dyn Job>> {
        loop {
            let notified = self.work.notified();
            {
                let mut state = self.state.lock();
                if let Some(job) = state.queue.pop_front() {
                    state.running.insert(
                        job.id(),
                        RunningJob {
                            started: Instant::now(),
                            state: job.state(),
                        },
                    );
                    return Some(job);
                }
                if state.phase != Phase::Accepting && state.reserved == 0 {
                    return None;
                }
            }
            notified.await;
        }
    }

    fn run_job(&self, job: Box<dyn Job>) {
        let id = job.id();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job.run())) {
            error!(
                executor = %self.settings.name,
                task_id = %id,
                error = %TaskError::from_panic(payload),
                "Panic escaped task execution"
            );
        }
        self.state.lock().running.remove(&id);
    }

    fn terminate(&self) {
        let mut state = self.state.lock();
        state.phase = Phase::Terminated;
        self.phase.send_replace(Phase::Terminated);
        debug!(executor = %self.settings.name, "Pool terminated");
    }
}

async fn dispatch(shared: Arc<Shared>) {
    loop {
        let Ok(permit) = Arc::clone(&shared.permits).acquire_owned().await else {
            break;
        };
        let Some(job) = shared.next_job().await else {
            break;
        };
        let worker = Arc::clone(&shared);
        shared.driver.handle().spawn_blocking(move || {
            worker.run_job(job);
            drop(permit);
        });
    }

    // Every permit back means nothing is running.
    let all = u32::try_from(shared.settings.max_workers).unwrap_or(u32::MAX);
    let _idle = shared.permits.acquire_many(all).await;
    shared.terminate();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{self, Completion, TaskHandle};
    use std::sync::mpsc;
    use std::thread;

    struct Sample {
        completion: Completion<()>,
        body: Box<dyn FnOnce() + Send>,
    }

    impl Sample {
        fn boxed(
            pool: &WorkerPool,
            body: impl FnOnce() + Send + 'static,
        ) -> (Box<dyn Job>, TaskHandle<()>) {
            let (completion, handle) = task::channel(pool.driver());
            let job = Box::new(Sample {
                completion,
                body: Box::new(body),
            });
            (job, handle)
        }
    }

    impl Job for Sample {
        fn id(&self) -> TaskId {
            self.completion.state().id()
        }

        fn state(&self) -> Arc<TaskState> {
            Arc::clone(self.completion.state())
        }

        fn run(self: Box<Self>) {
            let Sample { completion, body } = *self;
            if completion.state().try_start() {
                body();
                completion.complete(Ok(()));
            }
        }

        fn abort(self: Box<Self>, reason: TaskError) {
            self.completion.fail(reason);
        }
    }

    fn pool(max_workers: usize, queue_capacity: Option<usize>) -> WorkerPool {
        WorkerPool::start(PoolSettings {
            name: "test-pool".into(),
            thread_name_prefix: "test-pool".into(),
            max_workers,
            queue_capacity,
        })
        .unwrap()
    }

    #[test]
    fn test_runs_at_most_max_workers_at_once() {
        let pool = pool(2, None);
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Arc::new(parking_lot::Mutex::new(release_rx));
        let mut handles = Vec::new();
        for _ in 0..3 {
            let rx = Arc::clone(&release_rx);
            let started = started_tx.clone();
            let (job, handle) = Sample::boxed(&pool, move || {
                started.send(()).unwrap();
                let _ = rx.lock().recv();
            });
            pool.execute(job).unwrap();
            handles.push(handle);
        }
        started_rx.recv().unwrap();
        started_rx.recv().unwrap();
        assert!(started_rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(pool.active_count(), 2);
        assert_eq!(pool.queued_count(), 1);

        for _ in 0..3 {
            release_tx.send(()).unwrap();
        }
        for handle in handles {
            assert!(handle.join().is_ok());
        }
        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn test_bounded_queue_rejects_when_saturated() {
        let pool = pool(1, Some(1));
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let (busy, busy_handle) = Sample::boxed(&pool, move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
        });
        pool.execute(busy).unwrap();
        started_rx.recv().unwrap();

        let (queued, queued_handle) = Sample::boxed(&pool, || {});
        pool.execute(queued).unwrap();

        let (rejected, rejected_handle) = Sample::boxed(&pool, || {});
        assert!(matches!(
            pool.execute(rejected),
            Err(ExecutorError::Rejected { .. })
        ));
        assert!(matches!(
            rejected_handle.join(),
            Err(TaskError::Rejected { .. })
        ));

        release_tx.send(()).unwrap();
        assert!(busy_handle.join().is_ok());
        assert!(queued_handle.join().is_ok());
    }

    #[test]
    fn test_reservation_counts_against_capacity() {
        let pool = pool(1, Some(1));
        let first = pool.reserve().unwrap();
        let second = pool.reserve().unwrap();
        assert!(matches!(pool.reserve(), Err(ExecutorError::Rejected { .. })));
        drop(second);
        let (job, handle) = Sample::boxed(&pool, || {});
        first.execute(job).unwrap();
        assert!(handle.join().is_ok());
    }

    #[test]
    fn test_reservation_survives_graceful_shutdown() {
        let pool = pool(1, None);
        let reservation = pool.reserve().unwrap();
        pool.shutdown();
        assert!(!pool.is_terminated());

        let (job, handle) = Sample::boxed(&pool, || {});
        reservation.execute(job).unwrap();
        assert!(handle.join().is_ok());
        assert!(pool.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn test_reservation_after_shutdown_now_cancels_job() {
        let pool = pool(1, None);
        let reservation = pool.reserve().unwrap();
        assert!(pool.shutdown_now().is_empty());

        let (job, handle) = Sample::boxed(&pool, || panic!("must not run"));
        assert_eq!(reservation.execute(job), Err(ExecutorError::Shutdown));
        assert!(matches!(handle.join(), Err(TaskError::Cancelled)));
        assert!(pool.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn test_shutdown_drains_then_terminates() {
        let pool = pool(1, None);
        let (job, handle) = Sample::boxed(&pool, || thread::sleep(Duration::from_millis(20)));
        pool.execute(job).unwrap();
        pool.shutdown();

        assert!(pool.is_shutdown());
        let (late, late_handle) = Sample::boxed(&pool, || {});
        assert_eq!(pool.execute(late), Err(ExecutorError::Shutdown));
        assert!(matches!(late_handle.join(), Err(TaskError::Cancelled)));
        assert!(pool.await_termination(Duration::from_secs(5)));
        assert!(handle.join().is_ok());
        assert!(pool.is_terminated());
    }

    #[test]
    fn test_idle_pool_terminates_after_shutdown() {
        let pool = pool(4, None);
        pool.shutdown();
        assert!(pool.await_termination(Duration::MAX));
        assert!(pool.is_terminated());
    }

    #[test]
    fn test_await_termination_times_out_while_running() {
        let pool = pool(1, None);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (job, handle) = Sample::boxed(&pool, move || {
            let _ = release_rx.recv();
        });
        pool.execute(job).unwrap();
        pool.shutdown();
        assert!(!pool.await_termination(Duration::from_millis(20)));
        release_tx.send(()).unwrap();
        assert!(handle.join().is_ok());
        assert!(pool.await_termination(Duration::from_secs(5)));
    }
}
