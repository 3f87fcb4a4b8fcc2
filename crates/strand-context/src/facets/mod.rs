//! Built-in facets
//!
//! Each facet keeps its value in a thread-local [`AmbientCell`](crate::ambient::AmbientCell)
//! and exposes a small free-function API for code that reads or changes the
//! ambient value directly. Registration order is the order of
//! [`builtin_providers`].

pub mod application;
pub mod naming;
pub mod security;
pub mod transaction;

use std::sync::Arc;

use crate::provider::ContextProvider;

pub use naming::Bindings;
pub use security::Principal;
pub use transaction::TransactionId;

/// Providers for every built-in facet, in registration order
pub fn builtin_providers() -> Vec<Arc<dyn ContextProvider>> {
    vec![
        Arc::new(application::provider()),
        Arc::new(security::provider()),
        Arc::new(naming::provider()),
        Arc::new(transaction::provider()),
    ]
}
