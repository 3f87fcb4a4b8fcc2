//! Application identity facet
//!
//! Carries the name of the application or component on whose behalf a thread
//! is running. Resource lookups that depend on the owning component read it.

use crate::ambient::{self, AmbientCell, AmbientProvider};
use crate::facet::FacetKey;

thread_local! {
    static CURRENT: AmbientCell<Option<String>> = AmbientCell::new(None);
}

/// Provider for [`FacetKey::APPLICATION`]; the neutral value is no application
pub fn provider() -> AmbientProvider<Option<String>> {
    AmbientProvider::new(FacetKey::APPLICATION, &CURRENT, || None)
}

/// Application name on the current thread
pub fn current() -> Option<String> {
    CURRENT.with(AmbientCell::get)
}

/// Set the application name on the current thread
pub fn set(name: impl Into<String>) {
    CURRENT.with(|c| c.set(Some(name.into())));
}

/// Remove the application name from the current thread
pub fn clear() {
    CURRENT.with(|c| c.set(None));
}

/// Run `f` as application `name`
pub fn scope<R>(name: impl Into<String>, f: impl FnOnce() -> R) -> R {
    ambient::scoped(&CURRENT, Some(name.into()), f)
}
