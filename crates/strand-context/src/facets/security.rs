//! Security principal facet

use std::collections::BTreeSet;
use std::fmt;

use crate::ambient::{self, AmbientCell, AmbientProvider};
use crate::facet::FacetKey;

/// Authenticated caller identity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal {
    name: String,
    roles: BTreeSet<String>,
}

impl Principal {
    /// Create a principal without roles
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            roles: BTreeSet::new(),
        }
    }

    /// Add a role
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    /// Principal name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the principal holds `role`
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// All roles
    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.roles.iter().map(String::as_str)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

thread_local! {
    static CURRENT: AmbientCell<Option<Principal>> = AmbientCell::new(None);
}

/// Provider for [`FacetKey::SECURITY`]; the neutral value is unauthenticated
pub fn provider() -> AmbientProvider<Option<Principal>> {
    AmbientProvider::new(FacetKey::SECURITY, &CURRENT, || None)
}

/// Principal on the current thread
pub fn current() -> Option<Principal> {
    CURRENT.with(AmbientCell::get)
}

/// Run as `principal` on the current thread
pub fn set(principal: Principal) {
    CURRENT.with(|c| c.set(Some(principal)));
}

/// Drop the current thread's principal
pub fn clear() {
    CURRENT.with(|c| c.set(None));
}

/// Whether the current thread's principal holds `role`
pub fn is_caller_in_role(role: &str) -> bool {
    CURRENT.with(|c| c.with(|p| p.as_ref().is_some_and(|p| p.has_role(role))))
}

/// Run `f` as `principal`
pub fn scope<R>(principal: Principal, f: impl FnOnce() -> R) -> R {
    ambient::scoped(&CURRENT, Some(principal), f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_checks() {
        let admin = Principal::new("ada").with_role("admin");
        scope(admin, || {
            assert!(is_caller_in_role("admin"));
            assert!(!is_caller_in_role("auditor"));
            assert_eq!(current().map(|p| p.name().to_string()), Some("ada".into()));
        });
        assert!(!is_caller_in_role("admin"));
    }
}
