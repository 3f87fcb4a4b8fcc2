//! Context snapshots and live captures
//!
//! A [`ContextSnapshot`] is taken on the submitting thread and consumed once
//! on the worker thread. A [`LiveCapture`] is bound on the registering thread
//! and yields a fresh snapshot every time one is needed, which is what
//! periodic schedules and contextual proxies use.

use std::fmt;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::config::{Disposition, ResolvedConfiguration};
use crate::errors::Result;
use crate::facet::FacetKey;
use crate::handle::PropagationHandle;
use crate::provider::{ContextProvider, FacetSnapshot, FacetTracker};

#[derive(Debug)]
struct SnapshotEntry {
    key: FacetKey,
    disposition: Disposition,
    state: Arc<dyn FacetSnapshot>,
}

/// Captured or neutral values of every touched facet, in registration order
#[derive(Debug)]
pub struct ContextSnapshot {
    entries: Vec<SnapshotEntry>,
}

impl ContextSnapshot {
    /// Capture on the calling thread according to `resolved`
    pub fn capture(resolved: &ResolvedConfiguration) -> Result<Self> {
        let mut entries = Vec::new();
        for (registered, disposition) in resolved.touched() {
            let provider = registered.provider();
            let state = match disposition {
                Disposition::Propagate => provider.capture()?,
                Disposition::Clear => provider.cleared()?,
                Disposition::Unchanged => continue,
            };
            entries.push(SnapshotEntry {
                key: registered.key().clone(),
                disposition,
                state,
            });
        }
        Ok(Self { entries })
    }

    /// Snapshot touching nothing
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Number of facets in the snapshot
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot touches nothing
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in apply order
    pub fn keys(&self) -> impl Iterator<Item = &FacetKey> {
        self.entries.iter().map(|e| &e.key)
    }

    /// How `key` is treated by this snapshot
    pub fn disposition(&self, key: &str) -> Option<Disposition> {
        self.entries
            .iter()
            .find(|e| e.key.as_str() == key)
            .map(|e| e.disposition)
    }

    /// Apply every entry to the calling thread
    ///
    /// If facet *k* fails to apply, facets applied before it are restored in
    /// reverse and the apply error is returned.
    pub fn apply(self) -> Result<PropagationHandle> {
        let mut handle = PropagationHandle::new();
        for entry in self.entries {
            match entry.state.apply() {
                Ok(restorer) => {
                    trace!(facet = %entry.key, disposition = ?entry.disposition, "Applied facet");
                    handle.push(entry.key, restorer);
                }
                Err(err) => {
                    warn!(facet = %entry.key, error = %err, "Facet apply failed, unwinding partial context");
                    // Restore failures here are logged by the handle; the
                    // apply failure is what the caller sees.
                    let _ = handle.release();
                    return Err(err);
                }
            }
        }
        Ok(handle)
    }

    /// Apply, run `task`, restore
    ///
    /// The task's value is returned unchanged. If the task returns and a
    /// restore fails, the outcome is the restore error. If the task unwinds,
    /// restoration still runs, failures are logged, and the unwind continues.
    pub fn run<R>(self, task: impl FnOnce() -> R) -> Result<R> {
        let handle = self.apply()?;
        let value = task();
        handle.release()?;
        Ok(value)
    }

    /// Like [`run`](Self::run) for tasks reporting failure through `Result`
    ///
    /// When the task returns `Err`, restore failures are logged only and the
    /// task's own error is surfaced.
    pub fn run_fallible<T, E>(
        self,
        task: impl FnOnce() -> std::result::Result<T, E>,
    ) -> Result<std::result::Result<T, E>> {
        let handle = self.apply()?;
        let outcome = task();
        match handle.release() {
            Err(restore) if outcome.is_ok() => Err(restore),
            _ => Ok(outcome),
        }
    }
}

enum LiveSource {
    Tracked {
        key: FacetKey,
        tracker: Arc<dyn FacetTracker>,
    },
    Cleared {
        key: FacetKey,
        provider: Arc<dyn ContextProvider>,
    },
}

/// Snapshot source bound to the thread that created it
pub struct LiveCapture {
    sources: Vec<LiveSource>,
}

impl LiveCapture {
    /// Bind trackers for propagated facets on the calling thread
    pub fn begin(resolved: &ResolvedConfiguration) -> Result<Self> {
        let mut sources = Vec::new();
        for (registered, disposition) in resolved.touched() {
            let key = registered.key().clone();
            let provider = registered.provider();
            match disposition {
                Disposition::Propagate => sources.push(LiveSource::Tracked {
                    key,
                    tracker: provider.track()?,
                }),
                Disposition::Clear => sources.push(LiveSource::Cleared {
                    key,
                    provider: Arc::clone(provider),
                }),
                Disposition::Unchanged => {}
            }
        }
        Ok(Self { sources })
    }

    /// Take a fresh snapshot of the bound context
    pub fn snapshot(&self) -> Result<ContextSnapshot> {
        let mut entries = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let entry = match source {
                LiveSource::Tracked { key, tracker } => SnapshotEntry {
                    key: key.clone(),
                    disposition: Disposition::Propagate,
                    state: tracker.capture()?,
                },
                LiveSource::Cleared { key, provider } => SnapshotEntry {
                    key: key.clone(),
                    disposition: Disposition::Clear,
                    state: provider.cleared()?,
                },
            };
            entries.push(entry);
        }
        Ok(ContextSnapshot { entries })
    }

    /// Number of facets each snapshot will touch
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether snapshots touch nothing
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl fmt::Debug for LiveCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&FacetKey> = self
            .sources
            .iter()
            .map(|s| match s {
                LiveSource::Tracked { key, .. } | LiveSource::Cleared { key, .. } => key,
            })
            .collect();
        f.debug_struct("LiveCapture").field("facets", &keys).finish()
    }
}
