//! # Strand Context - Layer 1: Context Propagation
//!
//! Thread context facets and the machinery that carries them across thread
//! boundaries.
//!
//! ## Purpose
//!
//! Layer 1 crate providing:
//! - Facet keys and the provider contract (capture, clear, apply, restore)
//! - Thread-local ambient storage with cross-thread tracking
//! - The write-once provider registry
//! - Context configuration and its resolution into dispositions
//! - Snapshots, live captures and the propagation handle
//! - The context propagator all managed components route through
//! - Built-in application, security, naming and transaction facets
//!
//! ## What Does NOT Belong Here
//!
//! - Worker pools, scheduling and thread creation (belong in strand-executor)
//! - Test facets and fixtures (belong in strand-testkit)
//!
//! ## Usage
//!
//! ```rust
//! use strand_context::{facets::security, ContextConfiguration, ContextPropagator, FacetKey};
//! use strand_context::{facets::Principal, ProviderRegistry};
//!
//! let registry = ProviderRegistry::builder().with_builtin_facets()?.build();
//! let config = ContextConfiguration::empty().propagate(FacetKey::SECURITY);
//! let propagator = ContextPropagator::new(registry, &config)?;
//!
//! security::set(Principal::new("ada"));
//! let task = propagator.wrap(|| security::current().map(|p| p.name().to_owned()))?;
//! let name = std::thread::spawn(move || task.run()).join().expect("worker")?;
//! assert_eq!(name.as_deref(), Some("ada"));
//! # Ok::<(), strand_context::ContextError>(())
//! ```

pub mod ambient;
pub mod config;
pub mod errors;
pub mod facet;
pub mod facets;
pub mod handle;
pub mod propagator;
pub mod provider;
pub mod registry;
pub mod snapshot;

pub use ambient::{AmbientCell, AmbientProvider, AmbientSlot};
pub use config::{ContextConfiguration, Disposition, ResolvedConfiguration};
pub use errors::{ContextError, Result};
pub use facet::FacetKey;
pub use handle::PropagationHandle;
pub use propagator::{ContextPropagator, Contextualized};
pub use provider::{ContextProvider, FacetRestorer, FacetSnapshot, FacetTracker, ReplayTracker};
pub use registry::{ProviderRegistry, ProviderRegistryBuilder, RegisteredProvider};
pub use snapshot::{ContextSnapshot, LiveCapture};
