//! Context provider contract
//!
//! A provider owns one facet. It knows how to read the facet's current value
//! on the calling thread, how to produce the facet's neutral value, and how to
//! install a captured value on another thread while remembering what it
//! replaced. The engine never looks inside the values: it only sequences the
//! calls.
//!
//! ```text
//! submitting thread            worker thread
//! -----------------            -------------
//! provider.capture()  ──────▶  snapshot.apply()  ──▶ task body ──▶ restorer.restore()
//! provider.cleared()
//! ```
//!
//! Providers are stateless with respect to the registry; everything tied to a
//! single invocation lives in the [`FacetSnapshot`] and [`FacetRestorer`]
//! values they hand out.

use std::fmt;
use std::sync::Arc;

use crate::errors::Result;
use crate::facet::FacetKey;

/// Capture/restore capability set for one facet
pub trait ContextProvider: Send + Sync + 'static {
    /// Key under which this provider is registered
    fn key(&self) -> &FacetKey;

    /// Capture the facet's value on the calling thread
    fn capture(&self) -> Result<Arc<dyn FacetSnapshot>>;

    /// Produce the facet's neutral value
    fn cleared(&self) -> Result<Arc<dyn FacetSnapshot>>;

    /// Bind a tracker to the calling thread's ambient value
    ///
    /// Each call to [`FacetTracker::capture`] observes the bound value as it is
    /// at that moment, from whichever thread asks. Providers whose storage is
    /// not observable across threads keep the default, which replays a single
    /// capture taken now.
    fn track(&self) -> Result<Arc<dyn FacetTracker>> {
        Ok(Arc::new(ReplayTracker::new(self.capture()?)))
    }
}

/// Immutable captured (or neutral) value of one facet
pub trait FacetSnapshot: Send + Sync + fmt::Debug {
    /// Install this value on the calling thread and return the restoration
    /// obligation for the value it replaced
    fn apply(&self) -> Result<Box<dyn FacetRestorer>>;
}

/// Prior per-facet state held while a task runs
///
/// Restorers are created and consumed on the same thread, so they carry no
/// `Send` bound.
pub trait FacetRestorer {
    /// Put the prior value back
    fn restore(self: Box<Self>) -> Result<()>;
}

/// Live view of a facet on the thread that created it
pub trait FacetTracker: Send + Sync {
    /// Capture the tracked value as it is now
    fn capture(&self) -> Result<Arc<dyn FacetSnapshot>>;
}

/// Tracker that always yields the same snapshot
#[derive(Debug, Clone)]
pub struct ReplayTracker {
    snapshot: Arc<dyn FacetSnapshot>,
}

impl ReplayTracker {
    /// Create a tracker replaying `snapshot`
    pub fn new(snapshot: Arc<dyn FacetSnapshot>) -> Self {
        Self { snapshot }
    }
}

impl FacetTracker for ReplayTracker {
    fn capture(&self) -> Result<Arc<dyn FacetSnapshot>> {
        Ok(Arc::clone(&self.snapshot))
    }
}

impl fmt::Debug for dyn ContextProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextProvider")
            .field("key", self.key())
            .finish()
    }
}
