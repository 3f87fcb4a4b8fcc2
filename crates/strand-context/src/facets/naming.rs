//! Naming facet
//!
//! A thread's naming context is a flat set of name → value bindings that
//! lookups resolve against.

use std::collections::BTreeMap;

use crate::ambient::{self, AmbientCell, AmbientProvider};
use crate::facet::FacetKey;

/// Name → value bindings visible to the current thread
pub type Bindings = BTreeMap<String, String>;

thread_local! {
    static CURRENT: AmbientCell<Bindings> = AmbientCell::new(Bindings::new());
}

/// Provider for [`FacetKey::NAMING`]; the neutral value is an empty namespace
pub fn provider() -> AmbientProvider<Bindings> {
    AmbientProvider::new(FacetKey::NAMING, &CURRENT, Bindings::new)
}

/// Resolve `name` in the current thread's namespace
pub fn lookup(name: &str) -> Option<String> {
    CURRENT.with(|c| c.with(|bindings| bindings.get(name).cloned()))
}

/// Bind `name` to `value`, returning any previous binding
pub fn bind(name: impl Into<String>, value: impl Into<String>) -> Option<String> {
    let (name, value) = (name.into(), value.into());
    CURRENT.with(|c| {
        let mut bindings = c.get();
        let previous = bindings.insert(name, value);
        c.set(bindings);
        previous
    })
}

/// Remove the binding for `name`
pub fn unbind(name: &str) -> Option<String> {
    CURRENT.with(|c| {
        let mut bindings = c.get();
        let previous = bindings.remove(name);
        c.set(bindings);
        previous
    })
}

/// Every binding visible to the current thread
pub fn bindings() -> Bindings {
    CURRENT.with(AmbientCell::get)
}

/// Run `f` with exactly `bindings` visible
pub fn scope<R>(bindings: Bindings, f: impl FnOnce() -> R) -> R {
    ambient::scoped(&CURRENT, bindings, f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_lookup_unbind() {
        scope(Bindings::new(), || {
            assert_eq!(bind("env/queue", "orders"), None);
            assert_eq!(lookup("env/queue").as_deref(), Some("orders"));
            assert_eq!(unbind("env/queue").as_deref(), Some("orders"));
            assert_eq!(lookup("env/queue"), None);
        });
    }
}
