//! Ambient test facets
//!
//! `IntFacet` carries an integer counter and `LabelFacet` a string label. Both
//! keep their value in a thread-local cell like the built-in facets do.

use strand_context::{AmbientCell, AmbientProvider, FacetKey};

thread_local! {
    static INT: AmbientCell<i64> = AmbientCell::new(0);
    static LABEL: AmbientCell<String> = AmbientCell::new(String::new());
}

/// Integer counter facet; neutral value `0`
pub struct IntFacet;

impl IntFacet {
    /// Registration key
    pub const KEY: FacetKey = FacetKey::from_static("int");

    /// Provider registered under [`Self::KEY`]
    pub fn provider() -> AmbientProvider<i64> {
        AmbientProvider::new(Self::KEY, &INT, || 0)
    }

    /// Value on the current thread
    pub fn get() -> i64 {
        INT.with(AmbientCell::get)
    }

    /// Set the value on the current thread
    pub fn set(value: i64) {
        INT.with(|c| c.set(value));
    }
}

/// String label facet; neutral value `""`
pub struct LabelFacet;

impl LabelFacet {
    /// Registration key
    pub const KEY: FacetKey = FacetKey::from_static("label");

    /// Provider registered under [`Self::KEY`]
    pub fn provider() -> AmbientProvider<String> {
        AmbientProvider::new(Self::KEY, &LABEL, String::new)
    }

    /// Value on the current thread
    pub fn get() -> String {
        LABEL.with(AmbientCell::get)
    }

    /// Set the value on the current thread
    pub fn set(value: impl Into<String>) {
        let value = value.into();
        LABEL.with(|c| c.set(value));
    }
}
