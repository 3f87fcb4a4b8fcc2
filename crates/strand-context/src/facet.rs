//! Facet identifiers

use serde::{Deserialize, Serialize};
use std::borrow::{Borrow, Cow};
use std::fmt;

/// Stable string key identifying one pluggable kind of ambient thread state
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FacetKey(Cow<'static, str>);

impl FacetKey {
    /// Policy key standing for every registered facet not listed explicitly
    pub const REMAINING: FacetKey = FacetKey::from_static("Remaining");

    /// Application / component identity, the classloading analogue
    pub const APPLICATION: FacetKey = FacetKey::from_static("application");

    /// Security principal
    pub const SECURITY: FacetKey = FacetKey::from_static("security");

    /// Naming bindings
    pub const NAMING: FacetKey = FacetKey::from_static("naming");

    /// Transaction association
    pub const TRANSACTION: FacetKey = FacetKey::from_static("transaction");

    /// Create a key from a static string
    pub const fn from_static(key: &'static str) -> Self {
        Self(Cow::Borrowed(key))
    }

    /// Create a key from any string
    pub fn new(key: impl Into<String>) -> Self {
        Self(Cow::Owned(key.into()))
    }

    /// The key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the `Remaining` policy key
    pub fn is_remaining(&self) -> bool {
        self.as_str() == Self::REMAINING.as_str()
    }
}

impl fmt::Display for FacetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for FacetKey {
    fn from(key: &'static str) -> Self {
        Self::from_static(key)
    }
}

impl From<String> for FacetKey {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

impl From<&FacetKey> for FacetKey {
    fn from(key: &FacetKey) -> Self {
        key.clone()
    }
}

impl Borrow<str> for FacetKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for FacetKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_static_and_owned_keys_compare_equal() {
        let owned = FacetKey::new(String::from("security"));
        assert_eq!(owned, FacetKey::SECURITY);

        let mut set = HashSet::new();
        set.insert(owned);
        assert!(set.contains("security"));
    }

    #[test]
    fn test_remaining_detection() {
        assert!(FacetKey::REMAINING.is_remaining());
        assert!(FacetKey::from("Remaining").is_remaining());
        assert!(!FacetKey::NAMING.is_remaining());
    }
}
