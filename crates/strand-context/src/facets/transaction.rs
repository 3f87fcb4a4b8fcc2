//! Transaction association facet
//!
//! Transactions are bound to the thread that began them. The default context
//! configuration clears this facet so a task never joins its submitter's
//! transaction.

use std::fmt;

use crate::ambient::{self, AmbientCell, AmbientProvider};
use crate::facet::FacetKey;

/// Identifier of an active transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

impl TransactionId {
    /// Wrap a raw identifier
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw identifier
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

thread_local! {
    static CURRENT: AmbientCell<Option<TransactionId>> = AmbientCell::new(None);
}

/// Provider for [`FacetKey::TRANSACTION`]; the neutral value is no transaction
pub fn provider() -> AmbientProvider<Option<TransactionId>> {
    AmbientProvider::new(FacetKey::TRANSACTION, &CURRENT, || None)
}

/// Transaction associated with the current thread
pub fn current() -> Option<TransactionId> {
    CURRENT.with(AmbientCell::get)
}

/// Associate `id` with the current thread, returning the previous association
pub fn begin(id: TransactionId) -> Option<TransactionId> {
    CURRENT.with(|c| c.replace(Some(id)))
}

/// End the current thread's association
pub fn end() -> Option<TransactionId> {
    CURRENT.with(|c| c.replace(None))
}

/// Run `f` inside transaction `id`
pub fn scope<R>(id: TransactionId, f: impl FnOnce() -> R) -> R {
    ambient::scoped(&CURRENT, Some(id), f)
}
