//! Recording facet
//!
//! A facet with no ambient state of its own that records every provider call
//! into a shared [`CallLog`]. Several recording facets can share one log to
//! assert apply/restore ordering, and any of them can be told to fail at a
//! given phase.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use strand_context::{
    ContextError, ContextProvider, FacetKey, FacetRestorer, FacetSnapshot, FacetTracker, Result,
};

/// Provider lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// `ContextProvider::capture`
    Capture,
    /// `ContextProvider::cleared`
    Cleared,
    /// `ContextProvider::track`
    Track,
    /// `FacetSnapshot::apply`
    Apply,
    /// `FacetRestorer::restore`
    Restore,
}

/// One recorded provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCall {
    /// Facet the call concerned
    pub key: FacetKey,
    /// Phase of the call
    pub phase: Phase,
}

/// Shared, ordered log of provider calls
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<ProviderCall>>>,
}

impl CallLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, key: &FacetKey, phase: Phase) {
        self.calls.lock().push(ProviderCall {
            key: key.clone(),
            phase,
        });
    }

    /// All calls so far
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().clone()
    }

    /// Calls of one phase, as facet key strings
    pub fn keys_for(&self, phase: Phase) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.phase == phase)
            .map(|c| c.key.to_string())
            .collect()
    }

    /// Number of calls of `phase`
    pub fn count(&self, phase: Phase) -> usize {
        self.calls.lock().iter().filter(|c| c.phase == phase).count()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

/// Facet recording every call into a [`CallLog`]
#[derive(Debug, Clone)]
pub struct RecordingFacet {
    key: FacetKey,
    log: CallLog,
    fail_on: Option<Phase>,
}

impl RecordingFacet {
    /// Create a facet recording into `log`
    pub fn new(key: impl Into<FacetKey>, log: &CallLog) -> Self {
        Self {
            key: key.into(),
            log: log.clone(),
            fail_on: None,
        }
    }

    /// Fail every call of `phase` (the call is still recorded)
    pub fn failing_on(mut self, phase: Phase) -> Self {
        self.fail_on = Some(phase);
        self
    }

    fn enter(&self, phase: Phase) -> Result<()> {
        self.log.record(&self.key, phase);
        if self.fail_on != Some(phase) {
            return Ok(());
        }
        let message = format!("injected {phase:?} failure");
        Err(match phase {
            Phase::Capture | Phase::Cleared | Phase::Track => {
                ContextError::capture(&self.key, message)
            }
            Phase::Apply => ContextError::apply(&self.key, message),
            Phase::Restore => ContextError::restore(&self.key, message),
        })
    }

    fn snapshot(&self) -> Arc<dyn FacetSnapshot> {
        Arc::new(RecordedSnapshot {
            facet: self.clone(),
        })
    }
}

impl ContextProvider for RecordingFacet {
    fn key(&self) -> &FacetKey {
        &self.key
    }

    fn capture(&self) -> Result<Arc<dyn FacetSnapshot>> {
        self.enter(Phase::Capture)?;
        Ok(self.snapshot())
    }

    fn cleared(&self) -> Result<Arc<dyn FacetSnapshot>> {
        self.enter(Phase::Cleared)?;
        Ok(self.snapshot())
    }

    fn track(&self) -> Result<Arc<dyn FacetTracker>> {
        self.enter(Phase::Track)?;
        Ok(Arc::new(RecordedTracker {
            facet: self.clone(),
        }))
    }
}

struct RecordedSnapshot {
    facet: RecordingFacet,
}

impl fmt::Debug for RecordedSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordedSnapshot")
            .field("key", &self.facet.key)
            .finish()
    }
}

impl FacetSnapshot for RecordedSnapshot {
    fn apply(&self) -> Result<Box<dyn FacetRestorer>> {
        self.facet.enter(Phase::Apply)?;
        Ok(Box::new(RecordedRestorer {
            facet: self.facet.clone(),
        }))
    }
}

struct RecordedRestorer {
    facet: RecordingFacet,
}

impl FacetRestorer for RecordedRestorer {
    fn restore(self: Box<Self>) -> Result<()> {
        self.facet.enter(Phase::Restore)
    }
}

struct RecordedTracker {
    facet: RecordingFacet,
}

impl FacetTracker for RecordedTracker {
    fn capture(&self) -> Result<Arc<dyn FacetSnapshot>> {
        self.facet.enter(Phase::Capture)?;
        Ok(self.facet.snapshot())
    }
}
