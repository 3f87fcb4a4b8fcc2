//! Strand Testing Infrastructure
//!
//! Test facets and fixtures shared by the integration tests of every Strand
//! crate.
//!
//! # Usage
//!
//! ```rust
//! use strand_testkit::{IntFacet, LabelFacet};
//!
//! let registry = strand_testkit::scenario_registry();
//! IntFacet::set(7);
//! LabelFacet::set("x");
//! assert_eq!(registry.len(), 2);
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod facets;
pub mod fixtures;
pub mod recording;

pub use facets::{IntFacet, LabelFacet};
pub use fixtures::{init_tracing, registry_with, scenario_registry, wait_until};
pub use recording::{CallLog, Phase, ProviderCall, RecordingFacet};
