//! Context propagator
//!
//! The propagator is the single place capture/apply/restore logic lives.
//! Executors, thread factories and the context service are thin adapters that
//! decide *when* to capture and *where* to run; the propagator decides *what*
//! is captured and *how* it is applied.
//!
//! On the submitting thread, [`ContextPropagator::wrap`] captures a
//! [`ContextSnapshot`] and pairs it with the task. On the worker thread,
//! [`Contextualized::run`] applies the snapshot in registration order, runs
//! the task, and restores in exact reverse order on every exit path.

use std::fmt;
use std::sync::Arc;

use crate::config::{ContextConfiguration, ResolvedConfiguration};
use crate::errors::Result;
use crate::registry::ProviderRegistry;
use crate::snapshot::{ContextSnapshot, LiveCapture};

/// Captures context under a fixed configuration
#[derive(Clone)]
pub struct ContextPropagator {
    registry: Arc<ProviderRegistry>,
    resolved: Arc<ResolvedConfiguration>,
}

impl ContextPropagator {
    /// Resolve `config` against `registry`
    ///
    /// Unknown or overlapping keys fail here, at construction, never later.
    pub fn new(registry: Arc<ProviderRegistry>, config: &ContextConfiguration) -> Result<Self> {
        let resolved = config.resolve(&registry)?;
        Ok(Self {
            registry,
            resolved: Arc::new(resolved),
        })
    }

    /// Propagator using the default configuration
    pub fn with_defaults(registry: Arc<ProviderRegistry>) -> Result<Self> {
        Self::new(registry, &ContextConfiguration::default())
    }

    /// The registry this propagator resolved against
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// The resolved configuration
    pub fn configuration(&self) -> &ResolvedConfiguration {
        &self.resolved
    }

    /// Capture a snapshot on the calling thread
    pub fn capture(&self) -> Result<ContextSnapshot> {
        ContextSnapshot::capture(&self.resolved)
    }

    /// Bind a live capture to the calling thread
    pub fn capture_live(&self) -> Result<LiveCapture> {
        LiveCapture::begin(&self.resolved)
    }

    /// Capture now and pair the snapshot with `task`
    pub fn wrap<F>(&self, task: F) -> Result<Contextualized<F>> {
        Ok(Contextualized {
            snapshot: self.capture()?,
            task,
        })
    }
}

impl fmt::Debug for ContextPropagator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextPropagator")
            .field("propagated", &self.resolved.propagated())
            .field("cleared", &self.resolved.cleared())
            .finish()
    }
}

/// A task together with the snapshot it will run under
pub struct Contextualized<F> {
    snapshot: ContextSnapshot,
    task: F,
}

impl<F> fmt::Debug for Contextualized<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contextualized")
            .field("snapshot", &self.snapshot)
            .finish_non_exhaustive()
    }
}

impl<F> Contextualized<F> {
    /// Pair an existing snapshot with a task
    pub fn new(snapshot: ContextSnapshot, task: F) -> Self {
        Self { snapshot, task }
    }

    /// The captured snapshot
    pub fn snapshot(&self) -> &ContextSnapshot {
        &self.snapshot
    }

    /// Split into snapshot and task
    pub fn into_parts(self) -> (ContextSnapshot, F) {
        (self.snapshot, self.task)
    }
}

impl<F, R> Contextualized<F>
where
    F: FnOnce() -> R,
{
    /// Run the task on the calling thread under the captured context
    pub fn run(self) -> Result<R> {
        self.snapshot.run(self.task)
    }
}

impl<F, T, E> Contextualized<F>
where
    F: FnOnce() -> std::result::Result<T, E>,
{
    /// Run a task that reports failure through `Result`
    ///
    /// The task's own `Err` takes precedence over a failed restore; see
    /// [`ContextSnapshot::run_fallible`].
    pub fn run_fallible(self) -> Result<std::result::Result<T, E>> {
        self.snapshot.run_fallible(self.task)
    }
}
