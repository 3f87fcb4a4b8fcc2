//! Thread-local ambient storage for facet values
//!
//! An [`AmbientCell`] lives inside a `thread_local!`. The value itself sits in
//! an immutable slot; the cell holds a shared pointer to the slot currently
//! installed on its thread. Two properties follow:
//!
//! - a [`FacetTracker`] keeps the pointer, not a slot, so it always sees
//!   whatever is in effect on the owning thread now, including after a
//!   `scoped` block or an applied snapshot has been unwound
//! - `install` swaps the slot, so applying a snapshot on a worker never
//!   writes through to the submitter, and restoring puts back the exact slot
//!   that was there before
//!
//! No lock is held while a `with` closure runs, so the closure may call
//! `set` on the same cell; it keeps seeing the value it was handed.
//!
//! [`AmbientProvider`] turns any such cell into a [`ContextProvider`].

use std::fmt;
use std::sync::Arc;
use std::thread::LocalKey;

use parking_lot::RwLock;

use crate::errors::{ContextError, Result};
use crate::facet::FacetKey;
use crate::provider::{ContextProvider, FacetRestorer, FacetSnapshot, FacetTracker};

/// Immutable slot holding one value of a facet
pub type AmbientSlot<T> = Arc<T>;

/// Per-thread holder of a facet value
pub struct AmbientCell<T> {
    current: Arc<RwLock<AmbientSlot<T>>>,
}

impl<T> AmbientCell<T> {
    /// Create a cell holding `initial`
    pub fn new(initial: T) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(initial))),
        }
    }

    /// Make `value` the current value
    pub fn set(&self, value: T) {
        self.install(Arc::new(value));
    }

    /// Read the current value through a closure
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let slot = self.slot();
        f(&slot)
    }

    /// The slot currently installed on this thread
    pub fn slot(&self) -> AmbientSlot<T> {
        Arc::clone(&self.current.read())
    }

    /// Install `slot` and return the one it replaced
    pub fn install(&self, slot: AmbientSlot<T>) -> AmbientSlot<T> {
        std::mem::replace(&mut *self.current.write(), slot)
    }
}

impl<T: Clone> AmbientCell<T> {
    /// Clone of the current value
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Make `value` the current value, returning the previous one
    pub fn replace(&self, value: T) -> T {
        let prior = self.install(Arc::new(value));
        Arc::try_unwrap(prior).unwrap_or_else(|shared| T::clone(&shared))
    }
}

impl<T: Default> Default for AmbientCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for AmbientCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.with(|value| f.debug_tuple("AmbientCell").field(value).finish())
    }
}

/// Run `f` with `value` installed in `cell`, restoring the prior slot afterward
///
/// The prior slot is restored even if `f` unwinds.
pub fn scoped<T: 'static, R>(
    cell: &'static LocalKey<AmbientCell<T>>,
    value: T,
    f: impl FnOnce() -> R,
) -> R {
    struct Reinstall<T: 'static> {
        cell: &'static LocalKey<AmbientCell<T>>,
        prior: Option<AmbientSlot<T>>,
    }

    impl<T: 'static> Drop for Reinstall<T> {
        fn drop(&mut self) {
            if let Some(prior) = self.prior.take() {
                let _ = self.cell.try_with(|c| c.install(prior));
            }
        }
    }

    let prior = cell.with(|c| c.install(Arc::new(value)));
    let _reinstall = Reinstall {
        cell,
        prior: Some(prior),
    };
    f()
}

/// [`ContextProvider`] backed by a thread-local [`AmbientCell`]
pub struct AmbientProvider<T: 'static> {
    key: FacetKey,
    cell: &'static LocalKey<AmbientCell<T>>,
    neutral: fn() -> T,
}

impl<T> AmbientProvider<T>
where
    T: Clone + fmt::Debug + Send + Sync + 'static,
{
    /// Create a provider for `cell` whose neutral value is produced by `neutral`
    pub fn new(
        key: impl Into<FacetKey>,
        cell: &'static LocalKey<AmbientCell<T>>,
        neutral: fn() -> T,
    ) -> Self {
        Self {
            key: key.into(),
            cell,
            neutral,
        }
    }

    fn snapshot(&self, value: T) -> Arc<dyn FacetSnapshot> {
        Arc::new(AmbientSnapshot {
            key: self.key.clone(),
            cell: self.cell,
            value,
        })
    }
}

impl<T> fmt::Debug for AmbientProvider<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmbientProvider")
            .field("key", &self.key)
            .finish()
    }
}

impl<T> ContextProvider for AmbientProvider<T>
where
    T: Clone + fmt::Debug + Send + Sync + 'static,
{
    fn key(&self) -> &FacetKey {
        &self.key
    }

    fn capture(&self) -> Result<Arc<dyn FacetSnapshot>> {
        let value = self
            .cell
            .try_with(AmbientCell::get)
            .map_err(|_| ContextError::capture(&self.key, "thread-local storage unavailable"))?;
        Ok(self.snapshot(value))
    }

    fn cleared(&self) -> Result<Arc<dyn FacetSnapshot>> {
        Ok(self.snapshot((self.neutral)()))
    }

    fn track(&self) -> Result<Arc<dyn FacetTracker>> {
        let current = self
            .cell
            .try_with(|c| Arc::clone(&c.current))
            .map_err(|_| ContextError::capture(&self.key, "thread-local storage unavailable"))?;
        Ok(Arc::new(AmbientTracker {
            key: self.key.clone(),
            cell: self.cell,
            current,
        }))
    }
}

struct AmbientSnapshot<T: 'static> {
    key: FacetKey,
    cell: &'static LocalKey<AmbientCell<T>>,
    value: T,
}

impl<T: fmt::Debug> fmt::Debug for AmbientSnapshot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmbientSnapshot")
            .field("key", &self.key)
            .field("value", &self.value)
            .finish()
    }
}

impl<T> FacetSnapshot for AmbientSnapshot<T>
where
    T: Clone + fmt::Debug + Send + Sync + 'static,
{
    fn apply(&self) -> Result<Box<dyn FacetRestorer>> {
        let fresh = Arc::new(self.value.clone());
        let prior = self
            .cell
            .try_with(|c| c.install(fresh))
            .map_err(|_| ContextError::apply(&self.key, "thread-local storage unavailable"))?;
        Ok(Box::new(AmbientRestorer {
            key: self.key.clone(),
            cell: self.cell,
            prior,
        }))
    }
}

struct AmbientRestorer<T: 'static> {
    key: FacetKey,
    cell: &'static LocalKey<AmbientCell<T>>,
    prior: AmbientSlot<T>,
}

impl<T: 'static> FacetRestorer for AmbientRestorer<T> {
    fn restore(self: Box<Self>) -> Result<()> {
        let AmbientRestorer { key, cell, prior } = *self;
        cell.try_with(|c| {
            c.install(prior);
        })
        .map_err(|_| ContextError::restore(key, "thread-local storage unavailable"))
    }
}

/// Follows the owning thread's pointer, so it reads whichever slot that
/// thread has installed at capture time
struct AmbientTracker<T: 'static> {
    key: FacetKey,
    cell: &'static LocalKey<AmbientCell<T>>,
    current: Arc<RwLock<AmbientSlot<T>>>,
}

impl<T> FacetTracker for AmbientTracker<T>
where
    T: Clone + fmt::Debug + Send + Sync + 'static,
{
    fn capture(&self) -> Result<Arc<dyn FacetSnapshot>> {
        let value = T::clone(&self.current.read());
        Ok(Arc::new(AmbientSnapshot {
            key: self.key.clone(),
            cell: self.cell,
            value,
        }))
    }
}
