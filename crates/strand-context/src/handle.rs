//! Propagation handle: the restoration obligation for an applied snapshot

use tracing::{trace, warn};

use crate::errors::Result;
use crate::facet::FacetKey;
use crate::provider::FacetRestorer;

/// Prior worker-thread state for every facet applied so far
///
/// Restoration runs in exact reverse apply order, once. Call
/// [`release`](Self::release) to observe restore failures; if the handle is
/// dropped instead (for example while a task body unwinds) restoration still
/// runs and failures are logged.
#[must_use = "dropping the handle restores the worker context immediately"]
pub struct PropagationHandle {
    applied: Vec<(FacetKey, Box<dyn FacetRestorer>)>,
}

impl PropagationHandle {
    pub(crate) fn new() -> Self {
        Self {
            applied: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, key: FacetKey, restorer: Box<dyn FacetRestorer>) {
        self.applied.push((key, restorer));
    }

    /// Number of facets awaiting restoration
    pub fn len(&self) -> usize {
        self.applied.len()
    }

    /// Whether nothing was applied
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }

    /// Keys awaiting restoration, in apply order
    pub fn keys(&self) -> impl Iterator<Item = &FacetKey> {
        self.applied.iter().map(|(key, _)| key)
    }

    /// Restore every applied facet in reverse order
    ///
    /// A failing restore does not stop the remaining ones. Every failure is
    /// logged; the first is returned.
    pub fn release(mut self) -> Result<()> {
        self.unwind()
    }

    fn unwind(&mut self) -> Result<()> {
        let mut first_failure = None;
        while let Some((key, restorer)) = self.applied.pop() {
            match restorer.restore() {
                Ok(()) => trace!(facet = %key, "Restored facet"),
                Err(err) => {
                    warn!(facet = %key, error = %err, "Facet restore failed");
                    first_failure.get_or_insert(err);
                }
            }
        }
        first_failure.map_or(Ok(()), Err)
    }
}

impl Drop for PropagationHandle {
    fn drop(&mut self) {
        if self.applied.is_empty() {
            return;
        }
        // Reached only when the owner never released, i.e. the task unwound.
        let _ = self.unwind();
    }
}

impl std::fmt::Debug for PropagationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropagationHandle")
            .field("applied", &self.keys().collect::<Vec<_>>())
            .finish()
    }
}
